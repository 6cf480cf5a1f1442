use crate::Result;

/// Converts text into a token count.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> Result<usize>;

    /// Identifier recorded in result files.
    fn id(&self) -> &str;
}

/// Approximates tokens as whitespace-separated words.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(text.split_whitespace().count())
    }

    fn id(&self) -> &str {
        "whitespace"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_counts_words() {
        let tok = WhitespaceTokenizer;
        assert_eq!(tok.count_tokens("the quick  brown\nfox").unwrap(), 4);
        assert_eq!(tok.count_tokens("").unwrap(), 0);
        assert_eq!(tok.count_tokens("   ").unwrap(), 0);
    }
}
