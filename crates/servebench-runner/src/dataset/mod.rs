//! Prompt samplers: turn a corpus file into a pool of [`RequestSpec`]s.

mod sharegpt;
mod sonnet;

pub use sharegpt::ShareGptSampler;
pub use sonnet::{ChatTemplate, SonnetSampler};

use servebench_core::{RequestSpec, Result, Tokenizer};

pub trait Sampler {
    fn name(&self) -> &'static str;

    /// Draws up to `count` requests. The same seed yields the same pool.
    fn sample(
        &self,
        count: usize,
        tokenizer: &dyn Tokenizer,
        seed: Option<u64>,
    ) -> Result<Vec<RequestSpec>>;
}
