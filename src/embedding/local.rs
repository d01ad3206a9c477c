use ndarray::{Array2, ArrayD};
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tokenizers::Tokenizer;

use super::Embedder;
use crate::error::{CoreError, CoreResult};

pub const EMBEDDING_DIM: usize = 384;
pub const MAX_SEQ_LEN: usize = 256;

static PUNCT_SPACER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\p{P}\p{S}])").unwrap()
});

struct LoadedModel {
    tokenizer: Tokenizer,
    session: Session,
}

/// Subword tokenizer + on-device transformer inference + mean-pool +
/// normalize. The model session and vocabulary are loaded once, lazily, on
/// first use, guarded by a double-checked atomic flag so concurrent callers
/// never race the load.
pub struct LocalEmbedder {
    model_path: Option<PathBuf>,
    model: Arc<Mutex<Option<LoadedModel>>>,
    initialized: Arc<AtomicBool>,
}

impl LocalEmbedder {
    pub fn new(model_path: Option<&Path>) -> CoreResult<Self> {
        Ok(Self {
            model_path: model_path.map(|p| p.to_path_buf()),
            model: Arc::new(Mutex::new(None)),
            initialized: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Model file resolution order: explicit configured path; a `Models/`
    /// directory next to the binary; current working directory's `Models/`;
    /// else a clear "model not found" error.
    fn resolve_model_dir(&self) -> CoreResult<PathBuf> {
        if let Some(explicit) = &self.model_path {
            if explicit.exists() {
                return Ok(explicit.clone());
            }
        }

        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let candidate = dir.join("Models");
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }

        let cwd_candidate = std::env::current_dir()
            .unwrap_or_default()
            .join("Models");
        if cwd_candidate.exists() {
            return Ok(cwd_candidate);
        }

        Err(CoreError::Embedder(
            "model not found: set model_path, or place a Models/ directory next to the binary or in the current working directory".to_string(),
        ))
    }

    fn ensure_model(&self) -> CoreResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut guard = self.model.lock();
        if guard.is_some() {
            self.initialized.store(true, Ordering::Release);
            return Ok(());
        }

        let dir = self.resolve_model_dir()?;
        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| CoreError::Embedder(format!("failed to load tokenizer: {e}")))?;
        let session = Session::builder()
            .map_err(|e| CoreError::Embedder(format!("failed to create session builder: {e}")))?
            .commit_from_file(dir.join("model.onnx"))
            .map_err(|e| CoreError::Embedder(format!("failed to load model: {e}")))?;

        *guard = Some(LoadedModel { tokenizer, session });
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Basic tokenization pass: lowercase, space out punctuation/symbols,
    /// split on whitespace. The actual WordPiece segmentation and the
    /// `[CLS]`/`[SEP]`/`[PAD]` encoding are delegated to the loaded
    /// tokenizer, which implements the same algorithm described in step 2-3.
    fn preprocess(text: &str) -> String {
        let lowered = text.to_lowercase();
        PUNCT_SPACER.replace_all(&lowered, " $1 ").to_string()
    }
}

impl Embedder for LocalEmbedder {
    fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_model()?;
        let mut guard = self.model.lock();
        let model = guard
            .as_mut()
            .ok_or_else(|| CoreError::Embedder("model not initialized".to_string()))?;

        let preprocessed: Vec<String> = texts.iter().map(|t| Self::preprocess(t)).collect();

        let mut encodings = model
            .tokenizer
            .encode_batch(preprocessed, true)
            .map_err(|e| CoreError::Embedder(format!("tokenization failed: {e}")))?;

        let batch_size = encodings.len();
        let mut input_ids = Array2::<i64>::zeros((batch_size, MAX_SEQ_LEN));
        let mut attention_mask = Array2::<i64>::zeros((batch_size, MAX_SEQ_LEN));
        let mut token_type_ids = Array2::<i64>::zeros((batch_size, MAX_SEQ_LEN));

        for (row, encoding) in encodings.iter_mut().enumerate() {
            encoding.truncate(MAX_SEQ_LEN, 0, tokenizers::TruncationDirection::Right);
            encoding.pad(
                MAX_SEQ_LEN,
                0,
                0,
                "[PAD]",
                tokenizers::PaddingDirection::Right,
            );
            for (col, id) in encoding.get_ids().iter().take(MAX_SEQ_LEN).enumerate() {
                input_ids[[row, col]] = *id as i64;
            }
            for (col, m) in encoding
                .get_attention_mask()
                .iter()
                .take(MAX_SEQ_LEN)
                .enumerate()
            {
                attention_mask[[row, col]] = *m as i64;
            }
            for (col, t) in encoding
                .get_type_ids()
                .iter()
                .take(MAX_SEQ_LEN)
                .enumerate()
            {
                token_type_ids[[row, col]] = *t as i64;
            }
        }

        let input_ids_value = Value::from_array(input_ids.clone())
            .map_err(|e| CoreError::Embedder(format!("tensor build failed: {e}")))?;
        let attention_mask_value = Value::from_array(attention_mask.clone())
            .map_err(|e| CoreError::Embedder(format!("tensor build failed: {e}")))?;
        let token_type_ids_value = Value::from_array(token_type_ids.clone())
            .map_err(|e| CoreError::Embedder(format!("tensor build failed: {e}")))?;

        let outputs = model
            .session
            .run(ort::inputs![
                "input_ids" => input_ids_value,
                "attention_mask" => attention_mask_value,
                "token_type_ids" => token_type_ids_value,
            ])
            .map_err(|e| CoreError::Embedder(format!("inference failed: {e}")))?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| CoreError::Embedder(format!("failed to read output tensor: {e}")))?;
        let hidden: ArrayD<f32> = ArrayD::from_shape_vec(
            vec![batch_size, MAX_SEQ_LEN, EMBEDDING_DIM],
            raw.to_vec(),
        )
        .map_err(|e| CoreError::Embedder(format!("unexpected output shape: {e}")))?;

        let mut results = Vec::with_capacity(batch_size);
        for row in 0..batch_size {
            let mut sum = vec![0f32; EMBEDDING_DIM];
            let mut count = 0f32;
            for col in 0..MAX_SEQ_LEN {
                if attention_mask[[row, col]] == 0 {
                    continue;
                }
                count += 1.0;
                for (d, slot) in sum.iter_mut().enumerate() {
                    *slot += hidden[[row, col, d]];
                }
            }
            if count > 0.0 {
                for v in sum.iter_mut() {
                    *v /= count;
                }
            }
            let norm = sum.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in sum.iter_mut() {
                    *v /= norm;
                }
            }
            results.push(sum);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_spaces_punctuation() {
        let out = LocalEmbedder::preprocess("Hello, World!");
        assert!(out.contains(" , "));
        assert!(out.contains(" ! "));
        assert_eq!(out.to_lowercase(), out);
    }

    #[test]
    fn missing_model_dir_errors_clearly() {
        let embedder = LocalEmbedder::new(Some(Path::new("/nonexistent/path/for/sure"))).unwrap();
        let err = embedder.ensure_model().unwrap_err();
        assert!(matches!(err, CoreError::Embedder(_)));
    }
}
