use servebench_core::{Result, ServeBenchError, Tokenizer};
use std::path::Path;

/// A Hugging Face `tokenizer.json`, counting tokens the way the served model does.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    id: String,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            ServeBenchError::Tokenizer(format!("failed to load {}: {}", path.display(), e))
        })?;
        Ok(Self {
            inner,
            id: path.display().to_string(),
        })
    }
}

impl Tokenizer for HfTokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize> {
        self.inner
            .encode(text, true)
            .map(|encoding| encoding.len())
            .map_err(|e| ServeBenchError::Tokenizer(e.to_string()))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const WORD_LEVEL: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"[UNK]": 0, "hello": 1, "world": 2},
            "unk_token": "[UNK]"
        }
    }"#;

    #[test]
    fn test_counts_with_loaded_vocab() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(WORD_LEVEL.as_bytes()).unwrap();

        let tok = HfTokenizer::from_file(file.path()).unwrap();
        assert_eq!(tok.count_tokens("hello world").unwrap(), 2);
        assert_eq!(tok.count_tokens("hello unknown world").unwrap(), 3);
        assert_eq!(tok.id(), file.path().display().to_string());
    }

    #[test]
    fn test_missing_file_is_tokenizer_error() {
        let err = HfTokenizer::from_file(Path::new("/nonexistent/tokenizer.json"))
            .err()
            .unwrap();
        assert!(matches!(err, ServeBenchError::Tokenizer(_)));
    }
}
