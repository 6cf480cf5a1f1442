use super::Sampler;
use crate::scheduler::seeded_rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use servebench_core::{RequestSpec, Result, ServeBenchError, Tokenizer};
use std::path::PathBuf;
use tracing::{info, instrument, warn};

const MIN_LEN: usize = 4;
const MAX_PROMPT_LEN: usize = 1024;
const MAX_TOTAL_LEN: usize = 2048;

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    conversations: Vec<Turn>,
}

#[derive(Debug, Deserialize)]
struct Turn {
    value: String,
}

/// Samples the opening exchange of ShareGPT conversations.
#[derive(Debug, Clone)]
pub struct ShareGptSampler {
    path: PathBuf,
    fixed_output_len: Option<usize>,
}

impl ShareGptSampler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fixed_output_len: None,
        }
    }

    /// Ignore the recorded completion length and request `len` tokens instead.
    pub fn with_output_len(mut self, len: usize) -> Result<Self> {
        if len < MIN_LEN {
            return Err(ServeBenchError::Config(format!(
                "output length {} is too small, must be at least {}",
                len, MIN_LEN
            )));
        }
        self.fixed_output_len = Some(len);
        Ok(self)
    }

    fn load(&self) -> Result<Vec<(String, String)>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ServeBenchError::Dataset(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let entries: Vec<Entry> = serde_json::from_str(&content).map_err(|e| {
            ServeBenchError::Dataset(format!("invalid ShareGPT file {}: {}", self.path.display(), e))
        })?;

        Ok(entries
            .into_iter()
            .filter(|e| e.conversations.len() >= 2)
            .map(|e| {
                let mut turns = e.conversations.into_iter();
                let prompt = turns.next().map(|t| t.value).unwrap_or_default();
                let completion = turns.next().map(|t| t.value).unwrap_or_default();
                (prompt, completion)
            })
            .collect())
    }
}

impl Sampler for ShareGptSampler {
    fn name(&self) -> &'static str {
        "sharegpt"
    }

    #[instrument(skip(self, tokenizer), fields(path = %self.path.display()))]
    fn sample(
        &self,
        count: usize,
        tokenizer: &dyn Tokenizer,
        seed: Option<u64>,
    ) -> Result<Vec<RequestSpec>> {
        let mut pairs = self.load()?;
        pairs.shuffle(&mut seeded_rng(seed));

        let mut sampled = Vec::with_capacity(count);
        for (prompt, completion) in pairs {
            if sampled.len() == count {
                break;
            }

            let prompt_len = tokenizer.count_tokens(&prompt)?;
            let output_len = match self.fixed_output_len {
                Some(len) => len,
                None => tokenizer.count_tokens(&completion)?,
            };
            if prompt_len < MIN_LEN || output_len < MIN_LEN {
                continue;
            }
            if prompt_len > MAX_PROMPT_LEN || prompt_len + output_len > MAX_TOTAL_LEN {
                continue;
            }
            sampled.push(RequestSpec::new(prompt, prompt_len, output_len));
        }

        if sampled.len() < count {
            warn!(
                requested = count,
                sampled = sampled.len(),
                "Dataset has fewer usable conversations than requested"
            );
        }
        info!(sampled = sampled.len(), "Sampled ShareGPT requests");
        Ok(sampled)
    }
}
