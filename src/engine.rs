//! Engine facade: the two entry points external callers see.

use crate::config::{GenerationMode, GptConfig};
use crate::error::{GptError, Result};
use crate::generate::{GenerationRequest, StopReason, run_generation};
use crate::session::SessionStore;
use crate::state::GptState;
use crate::tokenizer::{BOS, Tokenizer, Vocabulary};
use crate::weights::GptWeights;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Per-call generation settings.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Sampling temperature; 0 means greedy.
    pub temperature: f64,
    /// Upper bound on newly generated tokens.
    pub max_new_tokens: usize,
    /// Optional top-k logit truncation.
    pub top_k: Option<usize>,
    /// Nucleus cutoff; values outside (0, 1) disable it.
    pub top_p: f64,
    /// Seed for the sampling RNG; the same seed reproduces the same draw.
    pub seed: u64,
    /// Cooperative cancellation flag, polled at step boundaries.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            temperature: 0.9,
            max_new_tokens: 256,
            top_k: None,
            top_p: 0.0,
            seed: 0,
            cancel: None,
        }
    }
}

impl GenerateOptions {
    /// Options seeded with a mode's default temperature. The caller still
    /// prepends the mode's marker text to the prompt; the engine treats all
    /// modes identically.
    pub fn for_mode(mode: GenerationMode) -> Self {
        GenerateOptions {
            temperature: mode.temperature(),
            ..GenerateOptions::default()
        }
    }
}

/// Result of one `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    /// Decoded text of the newly generated tokens (prompt excluded).
    pub generated_text: String,
    /// Number of newly generated tokens.
    pub tokens_generated: usize,
    /// Number of prompt tokens after encoding.
    pub prompt_tokens: usize,
    /// Why generation stopped.
    pub stop_reason: StopReason,
}

/// The text generation engine: immutable weights and vocabulary shared
/// across calls, plus the session store. `generate` calls for different
/// sessions run fully in parallel; calls for the same session serialize.
pub struct GptEngine {
    config: GptConfig,
    weights: GptWeights,
    tokenizer: Tokenizer,
    sessions: SessionStore,
}

impl GptEngine {
    /// Build an engine from loaded parts. The vocabulary must match the
    /// configured vocabulary size, or sampled ids could fall outside the
    /// table.
    pub fn new(config: GptConfig, weights: GptWeights, vocab: Vocabulary) -> Result<Self> {
        if vocab.len() != config.vocab_size {
            return Err(GptError::InvalidModel(format!(
                "vocabulary has {} entries but config expects {}",
                vocab.len(),
                config.vocab_size
            )));
        }
        Ok(GptEngine {
            sessions: SessionStore::new(config.max_seq_len),
            tokenizer: Tokenizer::new(vocab),
            config,
            weights,
        })
    }

    /// Build an engine with seeded random weights over the builtin
    /// vocabulary. The weights carry no learned knowledge; output quality
    /// is not a goal of this engine.
    pub fn random(mut config: GptConfig, seed: u64) -> Self {
        let vocab = Vocabulary::builtin();
        config.vocab_size = vocab.len();
        let weights = GptWeights::random(&config, seed);
        GptEngine::new(config, weights, vocab).expect("vocab size was just aligned")
    }

    /// Load an engine from a binary checkpoint and vocabulary file.
    pub fn from_files<P: AsRef<std::path::Path>>(checkpoint: P, vocab_path: P) -> Result<Self> {
        let (config, weights) = crate::weights::load_model(checkpoint)?;
        let vocab = crate::tokenizer::load_vocabulary(vocab_path)?;
        GptEngine::new(config, weights, vocab)
    }

    /// Model hyperparameters.
    pub fn config(&self) -> &GptConfig {
        &self.config
    }

    /// The tokenizer, exposed for callers that pre-inspect prompts.
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Generate a continuation of `prompt_text` inside the named session.
    ///
    /// The prompt is encoded, prefixed with the session's context window
    /// (whole past turns, oldest dropped first when space runs out), driven
    /// through the model, and sampled until a stop condition. The full turn
    /// is then appended to the session history.
    ///
    /// Fails with [`GptError::ContextOverflow`] when the prompt alone
    /// leaves no room to generate a single token.
    pub fn generate(
        &self,
        session_id: &str,
        prompt_text: &str,
        options: &GenerateOptions,
    ) -> Result<GenerateOutcome> {
        let max = self.config.max_seq_len;
        let prompt_tokens = self.tokenizer.encode(prompt_text, max);

        // One slot for <bos> on a fresh session, one to generate into.
        if prompt_tokens.len() + 1 >= max {
            return Err(GptError::ContextOverflow {
                prompt: prompt_tokens.len(),
                max,
            });
        }

        let session = self.sessions.get_or_create(session_id);
        let mut session = session.lock().unwrap();

        let budget = max - prompt_tokens.len() - 1;
        let window = session.window_within(budget);

        let mut input = Vec::with_capacity(window.len() + prompt_tokens.len() + 1);
        if window.is_empty() {
            input.push(BOS);
        } else {
            input.extend_from_slice(&window);
        }
        input.extend_from_slice(&prompt_tokens);

        let request = GenerationRequest {
            input_tokens: input,
            temperature: options.temperature,
            max_new_tokens: options.max_new_tokens,
            top_k: options.top_k,
            top_p: options.top_p,
        };

        let mut state = GptState::new(&self.config);
        let mut rng = StdRng::seed_from_u64(options.seed);
        let (generated, stop_reason) = run_generation(
            &self.config,
            &self.weights,
            &mut state,
            &request,
            options.cancel.as_deref(),
            &mut rng,
        )?;

        let generated_text = self.tokenizer.decode(&generated);

        // Append the full turn: everything this call added beyond the
        // already-stored window (the <bos> on a fresh session, the prompt,
        // and the generated tokens).
        let mut turn: Vec<u32> = request.input_tokens[window.len()..].to_vec();
        turn.extend_from_slice(&generated);
        session.record_usage(prompt_tokens.len(), generated.len());
        session.append_turn(turn);

        Ok(GenerateOutcome {
            generated_text,
            tokens_generated: generated.len(),
            prompt_tokens: prompt_tokens.len(),
            stop_reason,
        })
    }

    /// Clear a session's history. Returns whether the session existed.
    pub fn reset_session(&self, session_id: &str) -> bool {
        self.sessions.reset(session_id)
    }
}
