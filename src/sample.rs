//! Token sampling with temperature, top-k, and top-p.

use crate::error::{GptError, Result};
use crate::ops::softmax;
use rand::{Rng, RngExt};

/// Used for sorting probabilities in top-p sampling.
#[derive(Clone, Copy)]
pub struct ProbIndex {
    pub prob: f32,
    pub index: usize,
}

/// Sample a token from logits.
///
/// - `temp == 0`: greedy (argmax), no randomness
/// - `top_k = Some(k)`: all but the k highest logits are dropped first
/// - `topp in (0, 1)`: nucleus sampling over the remaining distribution
/// - otherwise: standard multinomial sampling
///
/// Fails with [`GptError::InvalidSamplingConfig`] when truncation leaves an
/// empty distribution.
pub fn sample<R: Rng>(
    logits: &mut [f32],
    temp: f64,
    top_k: Option<usize>,
    topp: f64,
    rng: &mut R,
) -> Result<u32> {
    if logits.is_empty() {
        return Err(GptError::InvalidSamplingConfig(
            "empty logit vector".into(),
        ));
    }

    // Greedy decoding
    if temp == 0.0 {
        return Ok(argmax(logits) as u32);
    }

    // Drop everything outside the top k
    if let Some(k) = top_k {
        if k == 0 {
            return Err(GptError::InvalidSamplingConfig(
                "top-k of 0 leaves no tokens to sample".into(),
            ));
        }
        if k < logits.len() {
            let mut indexed: Vec<(usize, f32)> = logits.iter().copied().enumerate().collect();
            indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            for (i, _) in indexed.into_iter().skip(k) {
                logits[i] = f32::NEG_INFINITY;
            }
        }
    }

    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if max_val == f32::NEG_INFINITY {
        return Err(GptError::InvalidSamplingConfig(
            "all logits are -inf after truncation".into(),
        ));
    }

    // Scale by temperature
    let temp_f32 = temp as f32;
    for l in logits.iter_mut() {
        *l /= temp_f32;
    }
    softmax(logits);

    let r: f32 = rng.random();

    // Standard multinomial sampling
    if topp <= 0.0 || topp >= 1.0 {
        let mut cdf = 0.0f32;
        for (i, &p) in logits.iter().enumerate() {
            cdf += p;
            if r < cdf {
                return Ok(i as u32);
            }
        }
        return Ok((logits.len() - 1) as u32);
    }

    // Top-p (nucleus) sampling
    let mut prob_index: Vec<ProbIndex> = logits
        .iter()
        .enumerate()
        .map(|(i, &p)| ProbIndex { prob: p, index: i })
        .collect();

    // Sort descending by probability
    prob_index.sort_by(|a, b| {
        b.prob
            .partial_cmp(&a.prob)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Find cutoff
    let topp_f32 = topp as f32;
    let mut cum_prob = 0.0f32;
    let mut last_idx = prob_index.len() - 1;
    for (i, pi) in prob_index.iter().enumerate() {
        cum_prob += pi.prob;
        if cum_prob > topp_f32 {
            last_idx = i;
            break;
        }
    }

    // Sample from truncated distribution
    let r_scaled = r * cum_prob;
    let mut cdf = 0.0f32;
    for pi in prob_index.iter().take(last_idx + 1) {
        cdf += pi.prob;
        if r_scaled < cdf {
            return Ok(pi.index as u32);
        }
    }

    Ok(prob_index[last_idx].index as u32)
}

/// Returns the index of the maximum element.
#[inline]
fn argmax(x: &[f32]) -> usize {
    let mut max_idx = 0;
    let mut max_val = x[0];
    for (i, &v) in x.iter().enumerate().skip(1) {
        if v > max_val {
            max_val = v;
            max_idx = i;
        }
    }
    max_idx
}
