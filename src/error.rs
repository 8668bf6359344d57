//! Error types for the generation engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid model file: {0}")]
    InvalidModel(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// A token id or position landed outside the table it indexes.
    /// Always a caller bug; never clamped.
    #[error("{kind} {index} out of range (bound {bound})")]
    OutOfRange {
        kind: &'static str,
        index: usize,
        bound: usize,
    },

    /// Temperature/top-k configuration truncated the distribution to
    /// nothing.
    #[error("Invalid sampling config: {0}")]
    InvalidSamplingConfig(String),

    /// The prompt alone fills the context window, leaving no room to
    /// generate.
    #[error("prompt of {prompt} tokens overflows context window of {max}")]
    ContextOverflow { prompt: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, GptError>;
