//! Model configuration and generation modes.

/// Transformer hyperparameters for the decoder-only GPT-style stack.
#[derive(Debug, Clone, Copy)]
pub struct GptConfig {
    /// Vocabulary size
    pub vocab_size: usize,
    /// Transformer embedding dimension
    pub dim: usize,
    /// FFN intermediate dimension
    pub hidden_dim: usize,
    /// Number of decoder layers
    pub n_layers: usize,
    /// Number of attention heads
    pub n_heads: usize,
    /// Maximum context length
    pub max_seq_len: usize,
}

impl GptConfig {
    /// Returns the per-head dimension.
    #[inline]
    pub fn head_size(&self) -> usize {
        self.dim / self.n_heads
    }

    /// The full-size model: ~200M parameters.
    pub fn full() -> Self {
        GptConfig {
            vocab_size: 50_257,
            dim: 768,
            hidden_dim: 3072,
            n_layers: 24,
            n_heads: 12,
            max_seq_len: 8192,
        }
    }

    /// A small configuration for tests and smoke runs.
    pub fn tiny() -> Self {
        GptConfig {
            vocab_size: 256,
            dim: 16,
            hidden_dim: 32,
            n_layers: 2,
            n_heads: 4,
            max_seq_len: 64,
        }
    }
}

/// Prompt category selected by the caller. The engine itself is
/// mode-agnostic; a mode only supplies a default temperature and the
/// marker text prefixed to the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    General,
    Code,
    Analysis,
    Creative,
    Unrestricted,
}

impl GenerationMode {
    /// Default sampling temperature for this mode.
    pub fn temperature(&self) -> f64 {
        match self {
            GenerationMode::Code => 0.7,
            GenerationMode::Analysis => 0.8,
            GenerationMode::Creative => 1.2,
            GenerationMode::General | GenerationMode::Unrestricted => 0.9,
        }
    }

    /// Marker text the caller prepends to the prompt.
    pub fn prompt_prefix(&self) -> &'static str {
        match self {
            GenerationMode::General => "",
            GenerationMode::Code => "<code>",
            GenerationMode::Analysis => "<analysis>",
            GenerationMode::Creative => "<creative>",
            GenerationMode::Unrestricted => "<unrestricted>",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_size_divides_evenly() {
        let config = GptConfig::full();
        assert_eq!(config.head_size() * config.n_heads, config.dim);
        let config = GptConfig::tiny();
        assert_eq!(config.head_size() * config.n_heads, config.dim);
    }

    #[test]
    fn mode_prefixes_are_marker_tokens() {
        assert_eq!(GenerationMode::General.prompt_prefix(), "");
        assert_eq!(GenerationMode::Code.prompt_prefix(), "<code>");
        assert!(GenerationMode::Creative.temperature() > GenerationMode::Code.temperature());
    }
}
