//! Generation loop: prompt prefill, sampling steps, stop conditions.

use crate::config::GptConfig;
use crate::error::{GptError, Result};
use crate::model::forward;
use crate::sample::sample;
use crate::state::GptState;
use crate::tokenizer::EOS;
use crate::weights::GptWeights;
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Why a generation run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The `<eos>` token was sampled.
    EndOfSequence,
    /// The requested number of new tokens was produced.
    MaxTokens,
    /// The sequence filled the context window before `<eos>` appeared.
    ContextTruncated,
    /// The caller's cancellation signal was observed at a step boundary.
    Cancelled,
}

impl StopReason {
    /// Stable identifier reported to external callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndOfSequence => "end_of_sequence",
            StopReason::MaxTokens => "max_tokens",
            StopReason::ContextTruncated => "context_truncated",
            StopReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable inputs of one generation run.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Full model input: session window plus encoded prompt.
    pub input_tokens: Vec<u32>,
    /// Sampling temperature; 0 means greedy.
    pub temperature: f64,
    /// Upper bound on newly generated tokens.
    pub max_new_tokens: usize,
    /// Optional top-k logit truncation.
    pub top_k: Option<usize>,
    /// Nucleus cutoff; values outside (0, 1) disable it.
    pub top_p: f64,
}

/// Drive the model over `request.input_tokens` and then sample new tokens
/// until a stop condition is met. Returns the newly generated tokens (the
/// terminal `<eos>`, if any, excluded) and the reason generation stopped.
///
/// The cancellation flag is polled only at step boundaries, including once
/// before the first step; a set flag never interrupts a matrix multiply.
pub fn run_generation<R: Rng>(
    config: &GptConfig,
    weights: &GptWeights,
    state: &mut GptState,
    request: &GenerationRequest,
    cancel: Option<&AtomicBool>,
    rng: &mut R,
) -> Result<(Vec<u32>, StopReason)> {
    let input = &request.input_tokens;
    if input.is_empty() {
        return Err(GptError::Tokenizer(
            "cannot generate from an empty token sequence".into(),
        ));
    }
    if input.len() >= config.max_seq_len {
        return Err(GptError::ContextOverflow {
            prompt: input.len(),
            max: config.max_seq_len,
        });
    }

    let cancelled = || cancel.is_some_and(|c| c.load(Ordering::Relaxed));

    if cancelled() {
        return Ok((Vec::new(), StopReason::Cancelled));
    }

    // Prefill: feed every input token; the last step's logits seed sampling.
    for (pos, &tok) in input.iter().enumerate() {
        forward(tok, pos, config, state, weights)?;
        if cancelled() {
            return Ok((Vec::new(), StopReason::Cancelled));
        }
    }

    let mut generated: Vec<u32> = Vec::new();
    // Position the next sampled token will occupy.
    let mut pos = input.len();

    loop {
        if generated.len() >= request.max_new_tokens {
            return Ok((generated, StopReason::MaxTokens));
        }
        if cancelled() {
            return Ok((generated, StopReason::Cancelled));
        }

        let next = sample(
            &mut state.logits,
            request.temperature,
            request.top_k,
            request.top_p,
            rng,
        )?;

        if next == EOS {
            return Ok((generated, StopReason::EndOfSequence));
        }
        generated.push(next);

        if generated.len() >= request.max_new_tokens {
            return Ok((generated, StopReason::MaxTokens));
        }
        if pos == config.max_seq_len - 1 {
            // The window is now full; the next token would have no position.
            return Ok((generated, StopReason::ContextTruncated));
        }

        forward(next, pos, config, state, weights)?;
        pos += 1;
    }
}
