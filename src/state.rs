//! Runtime state buffers for a single generation request.

use crate::config::GptConfig;

/// Per-request inference buffers. Each `generate` call owns one of these;
/// nothing here is shared between concurrent requests.
#[derive(Debug, Clone)]
pub struct GptState {
    /// Current hidden state
    pub x: Vec<f32>,
    /// Normalized input / attention output buffer
    pub xb: Vec<f32>,
    /// Projection output buffer
    pub xb2: Vec<f32>,
    /// FFN hidden activation buffer
    pub hb: Vec<f32>,
    /// Query vector
    pub q: Vec<f32>,
    /// Key vector
    pub k: Vec<f32>,
    /// Value vector
    pub v: Vec<f32>,
    /// Output logits
    pub logits: Vec<f32>,
    /// Key cache [n_layers][max_seq_len * dim]
    pub key_cache: Vec<Vec<f32>>,
    /// Value cache [n_layers][max_seq_len * dim]
    pub value_cache: Vec<Vec<f32>>,
}

impl GptState {
    /// Allocate inference buffers based on config.
    pub fn new(config: &GptConfig) -> Self {
        let dim = config.dim;
        let cache = |_| vec![0.0f32; config.max_seq_len * dim];
        GptState {
            x: vec![0.0; dim],
            xb: vec![0.0; dim],
            xb2: vec![0.0; dim],
            hb: vec![0.0; config.hidden_dim],
            q: vec![0.0; dim],
            k: vec![0.0; dim],
            v: vec![0.0; dim],
            logits: vec![0.0; config.vocab_size],
            key_cache: (0..config.n_layers).map(cache).collect(),
            value_cache: (0..config.n_layers).map(cache).collect(),
        }
    }
}
