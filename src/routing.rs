use regex::Regex;
use std::sync::LazyLock;

static FENCE_INFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```\s*ya?ml\s*$").unwrap());
static DOMAIN_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+(\w+):\s*\[([^\]]+)\]").unwrap());
static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'([^']*)'").unwrap());

/// Ordered (domain, patterns) table parsed from a management file's fenced
/// `yaml`/`yml` block. Declaration order and duplicate domains are both
/// preserved as written.
#[derive(Debug, Clone, Default)]
pub struct RoutingMap {
    entries: Vec<(String, Vec<String>)>,
}

impl RoutingMap {
    /// Finds the first `yaml`/`yml` fenced block and extracts `domain: [..]`
    /// lines from it. Malformed or absent blocks yield an empty map; this is
    /// a non-fatal parse per the pipeline's error policy.
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();

        let Some(start) = FENCE_INFO.find(text) else {
            return RoutingMap { entries };
        };
        let body_start = start.end();
        let Some(rel_end) = text[body_start..].find("```") else {
            return RoutingMap { entries };
        };
        let body = &text[body_start..body_start + rel_end];

        for line in body.lines() {
            if let Some(caps) = DOMAIN_LINE.captures(line) {
                let domain = caps[1].to_string();
                let list = &caps[2];
                let patterns: Vec<String> = QUOTED
                    .captures_iter(list)
                    .map(|c| c[1].to_string())
                    .collect();
                entries.push((domain, patterns));
            }
        }

        RoutingMap { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `"root"` or the first path segment after `domains/`
    /// (case-insensitive match on the `domains/` prefix).
    pub fn domain_from_source_path(p: &str) -> String {
        let normalized = normalize_slashes(p);
        let lower = normalized.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("domains/") {
            let rel_start = normalized.len() - rest.len();
            let rel = &normalized[rel_start..];
            let mut parts = rel.splitn(2, '/');
            if let Some(first) = parts.next() {
                if parts.next().is_some() && !first.is_empty() {
                    return first.to_string();
                }
            }
        }
        "root".to_string()
    }

    /// Returns all domains whose patterns match `p`, in declaration order,
    /// each domain appearing at most once (first matching pattern wins).
    pub fn domains_for_code_path(&self, p: &str) -> Vec<String> {
        let normalized = normalize_slashes(p);
        let mut result = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (domain, patterns) in &self.entries {
            if seen.contains(domain) {
                continue;
            }
            for pattern in patterns {
                let normalized_pattern = normalize_slashes(pattern);
                if pattern_matches(&normalized_pattern, &normalized) {
                    result.push(domain.clone());
                    seen.insert(domain.clone());
                    break;
                }
            }
        }
        result
    }
}

fn normalize_slashes(p: &str) -> String {
    p.replace('\\', "/")
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if let Some((prefix, suffix)) = pattern.split_once("**") {
        let prefix = prefix.trim_end_matches('/');
        let suffix = suffix.trim();
        let prefix_ok = prefix.is_empty() || contains_ci(path, prefix);
        let suffix_ok = suffix.is_empty() || contains_ci(path, suffix);
        prefix_ok && suffix_ok
    } else {
        let trimmed = pattern.trim_end_matches('/');
        contains_ci(path, trimmed)
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANAGEMENT_FILE: &str = r#"
# Routing

```yaml
  rp: ['src/ResourceProvider/']
  da: ['src/DataAccess/', 'src/Da2/']
```
"#;

    #[test]
    fn parses_domains_in_declaration_order() {
        let map = RoutingMap::parse(MANAGEMENT_FILE);
        assert_eq!(map.entries.len(), 2);
        assert_eq!(map.entries[0].0, "rp");
        assert_eq!(map.entries[1].1, vec!["src/DataAccess/", "src/Da2/"]);
    }

    #[test]
    fn domain_from_source_path_root_default() {
        assert_eq!(RoutingMap::domain_from_source_path("a.md"), "root");
        assert_eq!(RoutingMap::domain_from_source_path("domains/"), "root");
        assert_eq!(
            RoutingMap::domain_from_source_path("DOMAINS/rp/b.md"),
            "rp"
        );
    }

    #[test]
    fn code_path_matching_is_case_insensitive_substring() {
        let map = RoutingMap::parse(MANAGEMENT_FILE);
        let domains = map.domains_for_code_path("src/ResourceProvider/Controllers/X.cs");
        assert_eq!(domains, vec!["rp"]);
    }

    #[test]
    fn no_match_returns_empty() {
        let map = RoutingMap::parse(MANAGEMENT_FILE);
        assert!(map.domains_for_code_path("src/Unrelated/Foo.cs").is_empty());
    }

    #[test]
    fn double_star_pattern_requires_both_halves() {
        let text = "```yaml\n  x: ['src/**/Tests/']\n```\n";
        let map = RoutingMap::parse(text);
        assert_eq!(
            map.domains_for_code_path("src/foo/Tests/bar.cs"),
            vec!["x".to_string()]
        );
        assert!(map.domains_for_code_path("other/Tests/bar.cs").is_empty());
    }

    #[test]
    fn missing_yaml_block_is_empty_not_error() {
        let map = RoutingMap::parse("# No routing info here\n");
        assert!(map.is_empty());
    }
}
