use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::LazyLock;

pub const MAX_CHARS: usize = 2000;
pub const MIN_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub source_file: String,
    pub heading_path: String,
    pub domain: String,
    pub tags: BTreeSet<String>,
    pub related_files: BTreeSet<String>,
    pub is_instruction: bool,
    pub embedding: Option<Vec<f32>>,
    pub last_updated: DateTime<Utc>,
    pub chunk_index: u32,
}

static PASCAL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([A-Z][A-Za-z0-9_.]+)`").unwrap());
static PATH_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:^|[\s`'"])([A-Za-z0-9_./-]+\.[a-z]{1,5})(?:$|[\s`'"])"#).unwrap());
static RELATED_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*?\]\(([^)]+\.md)\)").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6}) (.*)$").unwrap());
static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^```").unwrap());

/// Stable chunk id = first 16 hex chars of SHA-256(`source_file::chunk_index`).
pub fn chunk_id(source_file: &str, chunk_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_file.as_bytes());
    hasher.update(b"::");
    hasher.update(chunk_index.to_string().as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], hex_chars: usize) -> String {
    let mut s = String::with_capacity(hex_chars);
    for b in bytes {
        if s.len() >= hex_chars {
            break;
        }
        s.push_str(&format!("{b:02x}"));
    }
    s.truncate(hex_chars);
    s
}

struct Section {
    breadcrumb: String,
    content: String,
}

/// Splits raw Markdown into Chunks per the heading-scoped, code-block-atomic
/// packing algorithm: headings define section breadcrumbs, fenced code
/// blocks (with their preceding paragraph) are atomic, and blocks are
/// greedily packed up to `MAX_CHARS`. Chunks under `MIN_CHARS` are dropped
/// without consuming a `chunk_index` ordinal.
pub fn chunk_markdown(text: &str, source_file: &str, domain: &str) -> Vec<Chunk> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let sections = split_sections(&normalized);

    let is_instruction = source_file.to_ascii_lowercase().ends_with(".instructions.md");
    let now = Utc::now();

    let mut chunks = Vec::new();
    let mut next_index: u32 = 0;

    for section in sections {
        for block in pack_section(&section.content) {
            let trimmed = block.trim();
            if trimmed.chars().count() < MIN_CHARS {
                continue;
            }
            let content = trimmed.to_string();
            let tags = extract_tags(&content);
            let related_files = extract_related_files(&content);
            let id = chunk_id(source_file, next_index);
            chunks.push(Chunk {
                id,
                content,
                source_file: source_file.to_string(),
                heading_path: section.breadcrumb.clone(),
                domain: domain.to_string(),
                tags,
                related_files,
                is_instruction,
                embedding: None,
                last_updated: now,
                chunk_index: next_index,
            });
            next_index += 1;
        }
    }

    chunks
}

/// Breaks text into heading-scoped sections. A stack of `(level, text)`
/// tracks heading ancestry; on each heading, entries with level >= current
/// are popped before pushing. The heading line stays at the top of its own
/// section's content.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(u8, String)> = Vec::new();
    let mut current = String::new();
    let mut current_breadcrumb = String::new();

    let flush = |sections: &mut Vec<Section>, breadcrumb: &str, content: &mut String| {
        if !content.is_empty() {
            sections.push(Section {
                breadcrumb: breadcrumb.to_string(),
                content: std::mem::take(content),
            });
        }
    };

    for line in text.lines() {
        if let Some(caps) = HEADING.captures(line) {
            flush(&mut sections, &current_breadcrumb, &mut current);

            let level = caps[1].len() as u8;
            let heading_text = caps[2].to_string();
            while let Some((lvl, _)) = stack.last() {
                if *lvl >= level {
                    stack.pop();
                } else {
                    break;
                }
            }
            stack.push((level, heading_text));
            current_breadcrumb = stack
                .iter()
                .map(|(_, t)| t.as_str())
                .collect::<Vec<_>>()
                .join(" > ");
            current.push_str(line);
            current.push('\n');
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    flush(&mut sections, &current_breadcrumb, &mut current);

    if sections.is_empty() {
        sections.push(Section {
            breadcrumb: String::new(),
            content: text.to_string(),
        });
    }
    sections
}

enum Block {
    Paragraph(String),
    Code(String),
}

/// Splits a section's content into atomic blocks: fenced code blocks
/// (absorbing their immediately preceding paragraph) and plain paragraphs
/// separated by blank lines. Sections already within `MAX_CHARS` skip this
/// split and are packed whole.
fn split_blocks(content: &str) -> Vec<Block> {
    let lines: Vec<&str> = content.lines().collect();
    let mut blocks = Vec::new();
    let mut paragraph = String::new();
    let mut i = 0;

    let flush_paragraph = |paragraph: &mut String, blocks: &mut Vec<Block>| {
        if !paragraph.trim().is_empty() {
            blocks.push(Block::Paragraph(std::mem::take(paragraph)));
        } else {
            paragraph.clear();
        }
    };

    while i < lines.len() {
        let line = lines[i];
        if FENCE.is_match(line) {
            let mut code = String::new();
            code.push_str(line);
            code.push('\n');
            i += 1;
            while i < lines.len() {
                code.push_str(lines[i]);
                code.push('\n');
                let closed = FENCE.is_match(lines[i]);
                i += 1;
                if closed {
                    break;
                }
            }
            // absorb the immediately preceding paragraph, if any, into the code block
            let preceding = std::mem::take(&mut paragraph);
            if !preceding.trim().is_empty() {
                blocks.push(Block::Code(format!("{preceding}{code}")));
            } else {
                blocks.push(Block::Code(code));
            }
            continue;
        }

        if line.trim().is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
        } else {
            paragraph.push_str(line);
            paragraph.push('\n');
        }
        i += 1;
    }
    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}

/// Greedily packs a section's blocks into chunks capped at `MAX_CHARS`. A
/// single block that itself exceeds `MAX_CHARS` is emitted alone, never
/// split mid-fence.
fn pack_section(content: &str) -> Vec<String> {
    if content.chars().count() <= MAX_CHARS {
        return vec![content.to_string()];
    }

    let blocks = split_blocks(content);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for block in blocks {
        let text = match block {
            Block::Paragraph(t) => t,
            Block::Code(t) => t,
        };
        if text.chars().count() > MAX_CHARS {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(text);
            continue;
        }
        if !current.is_empty() && current.chars().count() + text.chars().count() > MAX_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(&text);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn extract_tags(content: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for caps in PASCAL_TAG.captures_iter(content) {
        let m = &caps[1];
        if m.chars().count() > 2 && !m.contains('/') {
            tags.insert(m.to_string());
        }
    }
    for caps in PATH_TAG.captures_iter(content) {
        let m = &caps[1];
        if m.contains('/') || m.contains('.') {
            tags.insert(m.to_string());
        }
    }
    tags
}

fn extract_related_files(content: &str) -> BTreeSet<String> {
    let mut files = BTreeSet::new();
    for caps in RELATED_FILE.captures_iter(content) {
        let raw = &caps[1];
        let stripped = raw.split('#').next().unwrap_or(raw);
        let normalized = stripped.replace('\\', "/");
        if !normalized.is_empty() {
            files.insert(normalized);
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(text: &str) -> String {
        let mut s = text.to_string();
        while s.chars().count() < MIN_CHARS {
            s.push_str(" filler");
        }
        s
    }

    #[test]
    fn single_section_no_headings() {
        let text = pad("Just a paragraph with no heading at all.");
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, "");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn heading_breadcrumb_nesting() {
        let text = format!(
            "# A\n\n## B\n\n{}\n",
            pad("some content under B that is long enough to survive the minimum char floor")
        );
        let chunks = chunk_markdown(&text, "doc.md", "root");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, "A > B");
    }

    #[test]
    fn discarded_chunk_does_not_advance_index() {
        // Two sections: first short (discarded), second long enough to survive.
        let text = format!("# Tiny\n\nhi\n\n# Big\n\n{}\n", pad("enough content here"));
        let chunks = chunk_markdown(&text, "doc.md", "root");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].heading_path, "Big");
    }

    #[test]
    fn fenced_code_block_never_split_and_stays_atomic() {
        let code = "```rust\nfn main() {}\n```\n";
        let mut text = String::from("# Doc\n\n");
        text.push_str(code);
        text.push_str(&pad("trailing explanation paragraph"));
        let chunks = chunk_markdown(&text, "doc.md", "root");
        for chunk in &chunks {
            let opens = chunk.content.matches("```").count();
            assert_eq!(opens % 2, 0, "unbalanced fence in chunk");
        }
    }

    #[test]
    fn deterministic_id() {
        assert_eq!(chunk_id("a.md", 0), chunk_id("a.md", 0));
        assert_ne!(chunk_id("a.md", 0), chunk_id("a.md", 1));
    }

    #[test]
    fn is_instruction_detected_case_insensitively() {
        let text = pad("some instructions content");
        let chunks = chunk_markdown(&text, "Foo.INSTRUCTIONS.md", "root");
        assert!(chunks[0].is_instruction);
    }

    #[test]
    fn tag_extraction_backtick_pascal_and_paths() {
        let text = pad("See `ResourceProvider` and `src/lib.rs` for details on this topic");
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert!(chunks[0].tags.contains("ResourceProvider"));
        assert!(chunks[0].tags.contains("src/lib.rs"));
    }

    #[test]
    fn related_files_extraction_strips_fragment() {
        let text = pad("See [other doc](domains/rp/other.md#section) for more context here");
        let chunks = chunk_markdown(&text, "a.md", "root");
        assert!(chunks[0].related_files.contains("domains/rp/other.md"));
    }
}
