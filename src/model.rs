//! Decoder forward pass.

use crate::config::GptConfig;
use crate::error::{GptError, Result};
use crate::ops::{accum, layer_norm, matmul, matmul_bias, relu, softmax};
use crate::state::GptState;
use crate::weights::{GptLayerWeights, GptWeights};
use rayon::prelude::*;

/// Write the embedding for one token at one position into `state.x`:
/// token embedding plus learned positional embedding. Ids and positions
/// outside the tables are caller bugs and fail; they are never clamped.
fn embed(
    token: u32,
    pos: usize,
    config: &GptConfig,
    state: &mut GptState,
    weights: &GptWeights,
) -> Result<()> {
    let dim = config.dim;
    let token = token as usize;
    if token >= config.vocab_size {
        return Err(GptError::OutOfRange {
            kind: "token id",
            index: token,
            bound: config.vocab_size,
        });
    }
    if pos >= config.max_seq_len {
        return Err(GptError::OutOfRange {
            kind: "position",
            index: pos,
            bound: config.max_seq_len,
        });
    }

    let tok_off = token * dim;
    let pos_off = pos * dim;
    for i in 0..dim {
        state.x[i] = weights.token_embed[tok_off + i] + weights.pos_embed[pos_off + i];
    }
    Ok(())
}

/// Perform a single-token forward pass, filling `state.logits` with the
/// next-token distribution over the vocabulary.
///
/// Tokens are fed one position at a time against per-layer key/value
/// caches, so position `pos` can only ever attend to positions `<= pos`;
/// the causal mask holds by construction and matches what a full-sequence
/// recomputation with an explicit mask would produce.
pub fn forward(
    token: u32,
    pos: usize,
    config: &GptConfig,
    state: &mut GptState,
    weights: &GptWeights,
) -> Result<()> {
    embed(token, pos, config, state, weights)?;

    for l in 0..config.n_layers {
        attention(l, pos, config, state, &weights.layers[l]);
        feed_forward(config, state, &weights.layers[l]);
    }

    // Final norm
    layer_norm(
        &mut state.xb,
        &state.x,
        &weights.final_norm_scale,
        &weights.final_norm_shift,
    );

    // Output projection
    matmul(&mut state.logits, &state.xb, &weights.output_proj);

    Ok(())
}

/// Pre-norm self-attention for one layer.
fn attention(
    layer_idx: usize,
    pos: usize,
    config: &GptConfig,
    state: &mut GptState,
    layer_weights: &GptLayerWeights,
) {
    let dim = config.dim;
    let n_heads = config.n_heads;
    let head_size = config.head_size();

    // Input norm
    layer_norm(
        &mut state.xb,
        &state.x,
        &layer_weights.ln1_scale,
        &layer_weights.ln1_shift,
    );

    // QKV projections
    matmul(&mut state.q, &state.xb, &layer_weights.wq);
    matmul(&mut state.k, &state.xb, &layer_weights.wk);
    matmul(&mut state.v, &state.xb, &layer_weights.wv);

    // Cache K and V at this position
    let cache_offset = pos * dim;
    state.key_cache[layer_idx][cache_offset..cache_offset + dim].copy_from_slice(&state.k);
    state.value_cache[layer_idx][cache_offset..cache_offset + dim].copy_from_slice(&state.v);

    // Multi-head attention (parallelized over heads)
    let key_cache = &state.key_cache[layer_idx];
    let value_cache = &state.value_cache[layer_idx];

    let head_outputs: Vec<Vec<f32>> = (0..n_heads)
        .into_par_iter()
        .map(|h| {
            let q_off = h * head_size;
            let q = &state.q[q_off..q_off + head_size];

            // Scores against every cached position, scaled by sqrt(d_h)
            let mut att = vec![0.0f32; pos + 1];
            for t in 0..=pos {
                let k_off = t * dim + h * head_size;
                let k = &key_cache[k_off..k_off + head_size];

                let mut score = 0.0f32;
                for i in 0..head_size {
                    score += q[i] * k[i];
                }
                att[t] = score / (head_size as f32).sqrt();
            }

            softmax(&mut att);

            // Weighted sum of values
            let mut out = vec![0.0f32; head_size];
            for t in 0..=pos {
                let v_off = t * dim + h * head_size;
                let v = &value_cache[v_off..v_off + head_size];
                let a = att[t];
                for i in 0..head_size {
                    out[i] += a * v[i];
                }
            }
            out
        })
        .collect();

    // Concatenate heads back to dim
    for (h, out) in head_outputs.into_iter().enumerate() {
        let xb_off = h * head_size;
        state.xb[xb_off..xb_off + head_size].copy_from_slice(&out);
    }

    // Output projection
    matmul(&mut state.xb2, &state.xb, &layer_weights.wo);

    // Residual add
    accum(&mut state.x, &state.xb2);
}

/// Pre-norm position-wise FFN for one layer: w2 * relu(w1 * x + b1) + b2.
fn feed_forward(_config: &GptConfig, state: &mut GptState, layer_weights: &GptLayerWeights) {
    // Input norm
    layer_norm(
        &mut state.xb,
        &state.x,
        &layer_weights.ln2_scale,
        &layer_weights.ln2_shift,
    );

    // Up projection with ReLU
    matmul_bias(&mut state.hb, &state.xb, &layer_weights.w1, &layer_weights.b1);
    relu(&mut state.hb);

    // Down projection
    matmul_bias(&mut state.xb2, &state.hb, &layer_weights.w2, &layer_weights.b2);

    // Residual add
    accum(&mut state.x, &state.xb2);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::GptWeights;

    fn setup() -> (GptConfig, GptWeights, GptState) {
        let config = GptConfig::tiny();
        let weights = GptWeights::random(&config, 42);
        let state = GptState::new(&config);
        (config, weights, state)
    }

    #[test]
    fn rejects_out_of_range_token() {
        let (config, weights, mut state) = setup();
        let err = forward(config.vocab_size as u32, 0, &config, &mut state, &weights);
        assert!(matches!(err, Err(GptError::OutOfRange { .. })));
    }

    #[test]
    fn rejects_out_of_range_position() {
        let (config, weights, mut state) = setup();
        let err = forward(0, config.max_seq_len, &config, &mut state, &weights);
        assert!(matches!(err, Err(GptError::OutOfRange { .. })));
    }

    #[test]
    fn forward_is_deterministic() {
        let (config, weights, mut a) = setup();
        let mut b = GptState::new(&config);
        for (pos, &tok) in [5u32, 6, 7].iter().enumerate() {
            forward(tok, pos, &config, &mut a, &weights).unwrap();
            forward(tok, pos, &config, &mut b, &weights).unwrap();
        }
        assert_eq!(a.logits, b.logits);
    }

    #[test]
    fn future_tokens_do_not_change_earlier_outputs() {
        let (config, weights, mut a) = setup();
        let mut b = GptState::new(&config);

        // Two sequences sharing a two-token prefix, diverging afterwards.
        let seq_a = [5u32, 6, 7, 8];
        let seq_b = [5u32, 6, 9, 10];

        let mut logits_a = Vec::new();
        let mut logits_b = Vec::new();
        for pos in 0..seq_a.len() {
            forward(seq_a[pos], pos, &config, &mut a, &weights).unwrap();
            logits_a.push(a.logits.clone());
            forward(seq_b[pos], pos, &config, &mut b, &weights).unwrap();
            logits_b.push(b.logits.clone());
        }

        // Outputs over the shared prefix are identical; divergence only
        // appears from the first differing position on.
        assert_eq!(logits_a[0], logits_b[0]);
        assert_eq!(logits_a[1], logits_b[1]);
        assert_ne!(logits_a[2], logits_b[2]);
    }

    #[test]
    fn logits_are_finite() {
        let (config, weights, mut state) = setup();
        forward(1, 0, &config, &mut state, &weights).unwrap();
        assert!(state.logits.iter().all(|l| l.is_finite()));
    }
}
