use super::Sampler;
use crate::scheduler::seeded_rng;
use rand::seq::SliceRandom;
use servebench_core::{RequestSpec, Result, ServeBenchError, Tokenizer};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const BASE_PROMPT: &str = "Pick as many lines as you can from these poem lines:\n";
const PLACEHOLDER: &str = "{prompt}";

/// A chat template with a single `{prompt}` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTemplate {
    template: String,
}

impl ChatTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(PLACEHOLDER) {
            return Err(ServeBenchError::Config(format!(
                "chat template must contain a {} placeholder",
                PLACEHOLDER
            )));
        }
        Ok(Self { template })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let template = std::fs::read_to_string(path).map_err(|e| {
            ServeBenchError::Config(format!(
                "failed to read chat template {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::new(template)
    }

    pub fn render(&self, prompt: &str) -> String {
        self.template.replace(PLACEHOLDER, prompt)
    }
}

/// Builds prompts from poem lines: a fixed shared prefix plus randomly
/// chosen lines, sized to roughly `input_len` tokens.
#[derive(Debug, Clone)]
pub struct SonnetSampler {
    path: PathBuf,
    input_len: usize,
    output_len: usize,
    prefix_len: usize,
    template: Option<ChatTemplate>,
    /// Chat backends get the raw prompt; others get the rendered template.
    chat_backend: bool,
}

impl SonnetSampler {
    pub const DEFAULT_INPUT_LEN: usize = 550;
    pub const DEFAULT_OUTPUT_LEN: usize = 150;
    pub const DEFAULT_PREFIX_LEN: usize = 200;

    /// Non-chat backends need a template to format prompts with.
    pub fn new(
        path: impl Into<PathBuf>,
        template: Option<ChatTemplate>,
        chat_backend: bool,
    ) -> Result<Self> {
        if template.is_none() && !chat_backend {
            return Err(ServeBenchError::Config(
                "sonnet dataset needs a chat template for non-chat backends".into(),
            ));
        }
        Ok(Self {
            path: path.into(),
            input_len: Self::DEFAULT_INPUT_LEN,
            output_len: Self::DEFAULT_OUTPUT_LEN,
            prefix_len: Self::DEFAULT_PREFIX_LEN,
            template,
            chat_backend,
        })
    }

    pub fn with_lengths(mut self, input_len: usize, output_len: usize, prefix_len: usize) -> Self {
        self.input_len = input_len;
        self.output_len = output_len;
        self.prefix_len = prefix_len;
        self
    }

    fn format(&self, prompt: &str) -> String {
        match &self.template {
            Some(t) => t.render(prompt),
            None => prompt.to_string(),
        }
    }

    fn load_lines(&self) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ServeBenchError::Dataset(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let lines: Vec<String> = content.split_inclusive('\n').map(str::to_string).collect();
        if lines.is_empty() {
            return Err(ServeBenchError::Dataset(format!(
                "{} contains no poem lines",
                self.path.display()
            )));
        }
        Ok(lines)
    }
}

impl Sampler for SonnetSampler {
    fn name(&self) -> &'static str {
        "sonnet"
    }

    #[instrument(skip(self, tokenizer), fields(path = %self.path.display()))]
    fn sample(
        &self,
        count: usize,
        tokenizer: &dyn Tokenizer,
        seed: Option<u64>,
    ) -> Result<Vec<RequestSpec>> {
        if self.output_len == 0 {
            return Err(ServeBenchError::Config(
                "sonnet output length must be positive".into(),
            ));
        }
        if self.input_len <= self.prefix_len {
            return Err(ServeBenchError::Config(format!(
                "sonnet input length ({}) must be greater than prefix length ({})",
                self.input_len, self.prefix_len
            )));
        }

        let lines = self.load_lines()?;
        let mut line_tokens = 0;
        for line in &lines {
            line_tokens += tokenizer.count_tokens(line)?;
        }
        let average = line_tokens as f64 / lines.len() as f64;
        if average == 0.0 {
            return Err(ServeBenchError::Dataset("poem lines contain no tokens".into()));
        }

        let offset = tokenizer.count_tokens(&self.format(BASE_PROMPT))?;
        if self.input_len <= offset {
            return Err(ServeBenchError::Config(format!(
                "sonnet input length must be greater than {}",
                offset
            )));
        }
        if self.prefix_len <= offset {
            return Err(ServeBenchError::Config(format!(
                "sonnet prefix length must be greater than {}",
                offset
            )));
        }

        let input_lines = ((self.input_len - offset) as f64 / average).round() as usize;
        let prefix_lines = ((self.prefix_len - offset) as f64 / average).round() as usize;
        let prefix_lines = prefix_lines.min(input_lines).min(lines.len());
        let sampled_lines = (input_lines - prefix_lines).min(lines.len());
        let prefix: String = lines[..prefix_lines].concat();
        debug!(input_lines, prefix_lines, average, "Sonnet prompt shape");

        let mut rng = seeded_rng(seed);
        let mut pool = Vec::with_capacity(count);
        for _ in 0..count {
            let mut prompt = String::from(BASE_PROMPT);
            prompt.push_str(&prefix);
            for line in lines.choose_multiple(&mut rng, sampled_lines) {
                prompt.push_str(line);
            }

            let formatted = self.format(&prompt);
            let prompt_len = tokenizer.count_tokens(&formatted)?;
            let prompt = if self.chat_backend { prompt } else { formatted };
            pool.push(RequestSpec::new(prompt, prompt_len, self.output_len));
        }
        Ok(pool)
    }
}
