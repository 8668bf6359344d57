//! GPT-style text generation library in Rust
//!
//! A from-scratch implementation of a decoder-only transformer text
//! generator: tokenizer, embedding table, attention stack, sampler,
//! generation loop, and per-session context management. All tensor math
//! is flat-array code; no machine learning framework is involved.

pub mod config;
pub mod engine;
pub mod error;
pub mod generate;
pub mod model;
pub mod ops;
pub mod sample;
pub mod session;
pub mod state;
pub mod tokenizer;
pub mod weights;

pub use config::{GenerationMode, GptConfig};
pub use engine::{GenerateOptions, GenerateOutcome, GptEngine};
pub use error::{GptError, Result};
pub use generate::{GenerationRequest, StopReason, run_generation};
pub use model::forward;
pub use sample::sample;
pub use session::{Session, SessionStore};
pub use state::GptState;
pub use tokenizer::{Tokenizer, Vocabulary, load_vocabulary};
pub use weights::{GptLayerWeights, GptWeights, load_model};
