//! Model weights: loading and initialization.

use crate::config::GptConfig;
use crate::error::{GptError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::io::Read;

/// Weights for a single decoder layer.
#[derive(Debug, Clone)]
pub struct GptLayerWeights {
    /// Pre-attention LayerNorm scale
    pub ln1_scale: Vec<f32>,
    /// Pre-attention LayerNorm shift
    pub ln1_shift: Vec<f32>,
    /// Query projection [dim, dim]
    pub wq: Vec<f32>,
    /// Key projection [dim, dim]
    pub wk: Vec<f32>,
    /// Value projection [dim, dim]
    pub wv: Vec<f32>,
    /// Attention output projection [dim, dim]
    pub wo: Vec<f32>,
    /// Pre-FFN LayerNorm scale
    pub ln2_scale: Vec<f32>,
    /// Pre-FFN LayerNorm shift
    pub ln2_shift: Vec<f32>,
    /// FFN up projection [hidden_dim, dim]
    pub w1: Vec<f32>,
    /// FFN up bias [hidden_dim]
    pub b1: Vec<f32>,
    /// FFN down projection [dim, hidden_dim]
    pub w2: Vec<f32>,
    /// FFN down bias [dim]
    pub b2: Vec<f32>,
}

/// All model parameters. Immutable after construction and shared read-only
/// across concurrent generation requests.
#[derive(Debug, Clone)]
pub struct GptWeights {
    /// Token embedding table [vocab_size, dim]
    pub token_embed: Vec<f32>,
    /// Learned positional embedding table [max_seq_len, dim]
    pub pos_embed: Vec<f32>,
    /// Decoder layers
    pub layers: Vec<GptLayerWeights>,
    /// Final LayerNorm scale
    pub final_norm_scale: Vec<f32>,
    /// Final LayerNorm shift
    pub final_norm_shift: Vec<f32>,
    /// Output projection [vocab_size, dim]
    pub output_proj: Vec<f32>,
}

impl GptWeights {
    /// Load weights from a binary reader, in declaration order: embedding
    /// blob, positional blob, flat per-layer blobs, final norm, output
    /// projection. All values little-endian f32.
    pub fn load<R: Read>(reader: &mut R, config: &GptConfig) -> Result<Self> {
        let dim = config.dim;
        let hdim = config.hidden_dim;
        let n_layers = config.n_layers;
        let vocab = config.vocab_size;

        let token_embed = read_f32_vec(reader, vocab * dim)?;
        let pos_embed = read_f32_vec(reader, config.max_seq_len * dim)?;

        let ln1_scale_flat = read_f32_vec(reader, n_layers * dim)?;
        let ln1_shift_flat = read_f32_vec(reader, n_layers * dim)?;
        let wq_flat = read_f32_vec(reader, n_layers * dim * dim)?;
        let wk_flat = read_f32_vec(reader, n_layers * dim * dim)?;
        let wv_flat = read_f32_vec(reader, n_layers * dim * dim)?;
        let wo_flat = read_f32_vec(reader, n_layers * dim * dim)?;
        let ln2_scale_flat = read_f32_vec(reader, n_layers * dim)?;
        let ln2_shift_flat = read_f32_vec(reader, n_layers * dim)?;
        let w1_flat = read_f32_vec(reader, n_layers * hdim * dim)?;
        let b1_flat = read_f32_vec(reader, n_layers * hdim)?;
        let w2_flat = read_f32_vec(reader, n_layers * dim * hdim)?;
        let b2_flat = read_f32_vec(reader, n_layers * dim)?;
        let final_norm_scale = read_f32_vec(reader, dim)?;
        let final_norm_shift = read_f32_vec(reader, dim)?;
        let output_proj = read_f32_vec(reader, vocab * dim)?;

        let mut layers = Vec::with_capacity(n_layers);
        for l in 0..n_layers {
            layers.push(GptLayerWeights {
                ln1_scale: ln1_scale_flat[l * dim..(l + 1) * dim].to_vec(),
                ln1_shift: ln1_shift_flat[l * dim..(l + 1) * dim].to_vec(),
                wq: wq_flat[l * dim * dim..(l + 1) * dim * dim].to_vec(),
                wk: wk_flat[l * dim * dim..(l + 1) * dim * dim].to_vec(),
                wv: wv_flat[l * dim * dim..(l + 1) * dim * dim].to_vec(),
                wo: wo_flat[l * dim * dim..(l + 1) * dim * dim].to_vec(),
                ln2_scale: ln2_scale_flat[l * dim..(l + 1) * dim].to_vec(),
                ln2_shift: ln2_shift_flat[l * dim..(l + 1) * dim].to_vec(),
                w1: w1_flat[l * hdim * dim..(l + 1) * hdim * dim].to_vec(),
                b1: b1_flat[l * hdim..(l + 1) * hdim].to_vec(),
                w2: w2_flat[l * dim * hdim..(l + 1) * dim * hdim].to_vec(),
                b2: b2_flat[l * dim..(l + 1) * dim].to_vec(),
            });
        }

        Ok(GptWeights {
            token_embed,
            pos_embed,
            layers,
            final_norm_scale,
            final_norm_shift,
            output_proj,
        })
    }

    /// Seeded random initialization (Xavier-uniform projections, unit norm
    /// scales, zero shifts and biases). The values encode no learned
    /// knowledge; the same seed always produces the same weights.
    pub fn random(config: &GptConfig, seed: u64) -> Self {
        let dim = config.dim;
        let hdim = config.hidden_dim;
        let vocab = config.vocab_size;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut layers = Vec::with_capacity(config.n_layers);
        for _ in 0..config.n_layers {
            layers.push(GptLayerWeights {
                ln1_scale: vec![1.0; dim],
                ln1_shift: vec![0.0; dim],
                wq: xavier(&mut rng, dim, dim),
                wk: xavier(&mut rng, dim, dim),
                wv: xavier(&mut rng, dim, dim),
                wo: xavier(&mut rng, dim, dim),
                ln2_scale: vec![1.0; dim],
                ln2_shift: vec![0.0; dim],
                w1: xavier(&mut rng, dim, hdim),
                b1: vec![0.0; hdim],
                w2: xavier(&mut rng, hdim, dim),
                b2: vec![0.0; dim],
            });
        }

        GptWeights {
            token_embed: xavier(&mut rng, vocab, dim),
            pos_embed: xavier(&mut rng, config.max_seq_len, dim),
            layers,
            final_norm_scale: vec![1.0; dim],
            final_norm_shift: vec![0.0; dim],
            output_proj: xavier(&mut rng, dim, vocab),
        }
    }
}

/// Xavier-uniform initialization for a [fan_out, fan_in]-shaped projection.
fn xavier(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> Vec<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    (0..fan_in * fan_out)
        .map(|_| rng.random_range(-limit..limit))
        .collect()
}

/// Load config and weights from a binary checkpoint file. The header is six
/// little-endian i32s: vocab_size, dim, hidden_dim, n_layers, n_heads,
/// max_seq_len.
pub fn load_model<P: AsRef<std::path::Path>>(path: P) -> Result<(GptConfig, GptWeights)> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);

    let vocab_size = reader.read_i32::<LittleEndian>()?;
    let dim = reader.read_i32::<LittleEndian>()?;
    let hidden_dim = reader.read_i32::<LittleEndian>()?;
    let n_layers = reader.read_i32::<LittleEndian>()?;
    let n_heads = reader.read_i32::<LittleEndian>()?;
    let max_seq_len = reader.read_i32::<LittleEndian>()?;

    for (name, value) in [
        ("vocab_size", vocab_size),
        ("dim", dim),
        ("hidden_dim", hidden_dim),
        ("n_layers", n_layers),
        ("n_heads", n_heads),
        ("max_seq_len", max_seq_len),
    ] {
        if value <= 0 {
            return Err(GptError::InvalidModel(format!(
                "header field {name} is {value}, must be positive"
            )));
        }
    }
    if dim % n_heads != 0 {
        return Err(GptError::InvalidModel(format!(
            "dim {dim} not divisible by n_heads {n_heads}"
        )));
    }

    let config = GptConfig {
        vocab_size: vocab_size as usize,
        dim: dim as usize,
        hidden_dim: hidden_dim as usize,
        n_layers: n_layers as usize,
        n_heads: n_heads as usize,
        max_seq_len: max_seq_len as usize,
    };

    let weights = GptWeights::load(&mut reader, &config)?;

    Ok((config, weights))
}

/// Read a vector of f32 values from the reader.
fn read_f32_vec<R: Read>(reader: &mut R, count: usize) -> Result<Vec<f32>> {
    let mut buf = vec![0f32; count];
    for v in buf.iter_mut() {
        *v = reader.read_f32::<LittleEndian>()?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_init_is_seed_deterministic() {
        let config = GptConfig::tiny();
        let a = GptWeights::random(&config, 7);
        let b = GptWeights::random(&config, 7);
        assert_eq!(a.token_embed, b.token_embed);
        assert_eq!(a.layers[0].wq, b.layers[0].wq);

        let c = GptWeights::random(&config, 8);
        assert_ne!(a.token_embed, c.token_embed);
    }

    #[test]
    fn random_init_shapes_match_config() {
        let config = GptConfig::tiny();
        let w = GptWeights::random(&config, 0);
        assert_eq!(w.token_embed.len(), config.vocab_size * config.dim);
        assert_eq!(w.pos_embed.len(), config.max_seq_len * config.dim);
        assert_eq!(w.layers.len(), config.n_layers);
        assert_eq!(w.layers[0].w1.len(), config.hidden_dim * config.dim);
        assert_eq!(w.layers[0].b1.len(), config.hidden_dim);
        assert_eq!(w.output_proj.len(), config.vocab_size * config.dim);
        assert!(w.final_norm_scale.iter().all(|&s| s == 1.0));
    }
}
