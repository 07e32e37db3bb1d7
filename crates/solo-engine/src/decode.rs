//! Autoregressive decode loop.
//!
//! Every requested sequence gets its own [`DecodeSession`] and its own seeded
//! sampler, and stops independently of its siblings on EOS, on a stop
//! sequence, or at `max_new_tokens`. The log-probability reported for a
//! token is the log-softmax of the scores it was actually sampled from
//! (after temperature scaling and nucleus filtering).

use crate::error::{RuntimeError, RuntimeResult};
use crate::params::{Completion, GenerationParameters, TokenScore};
use crate::runtime::{CausalModel, TextTokenizer};
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use tracing::debug;

/// Why a sequence stopped growing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxNewTokens,
    EndOfSequence,
    StopSequence,
}

/// Token-level stop sequences.
#[derive(Debug, Clone, Default)]
pub struct StopCriteria {
    sequences: Vec<Vec<u32>>,
}

impl StopCriteria {
    /// Encode each stop string without special tokens. Strings that encode
    /// to nothing can never match and are dropped.
    pub fn new(tokenizer: &dyn TextTokenizer, stops: &[String]) -> RuntimeResult<Self> {
        let mut sequences = Vec::with_capacity(stops.len());
        for stop in stops {
            let ids = tokenizer.encode(stop, false)?;
            if !ids.is_empty() {
                sequences.push(ids);
            }
        }
        Ok(Self { sequences })
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// True when the generated tokens end with any stop sequence. The
    /// prompt never takes part in a match.
    pub fn matches(&self, generated: &[u32]) -> bool {
        self.sequences.iter().any(|stop| generated.ends_with(stop))
    }
}

/// Temperature + nucleus sampler. Temperature `0.0` means greedy.
pub struct Sampler {
    temperature: f64,
    top_p: f64,
    rng: StdRng,
}

impl Sampler {
    pub fn new(temperature: f64, top_p: f64, seed: u64) -> Self {
        Self {
            temperature,
            top_p,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    /// Turn raw logits into the scores the next token is drawn from.
    pub fn process(&self, logits: &[f32]) -> RuntimeResult<Vec<f64>> {
        if logits.is_empty() {
            return Err(RuntimeError::Inference("model returned empty logits".into()));
        }
        if logits.iter().any(|l| l.is_nan()) {
            return Err(RuntimeError::Inference("model returned NaN logits".into()));
        }

        let raw: Vec<f64> = logits.iter().map(|&l| f64::from(l)).collect();
        if self.is_greedy() {
            return Ok(raw);
        }
        let mut scores: Vec<f64> = raw.iter().map(|s| s / self.temperature).collect();
        if scores.iter().zip(&raw).any(|(s, r)| !s.is_finite() && r.is_finite()) {
            // Temperature too small to represent: the distribution collapses
            // onto the argmax.
            return Ok(collapse_to_argmax(&raw));
        }
        if self.top_p < 1.0 {
            apply_top_p(&mut scores, self.top_p);
        }
        Ok(scores)
    }

    /// Pick the next token id from log-probabilities.
    pub fn choose(&mut self, log_probs: &[f64]) -> RuntimeResult<usize> {
        if self.is_greedy() {
            return argmax(log_probs)
                .ok_or_else(|| RuntimeError::Inference("no token to choose from".into()));
        }
        let weights: Vec<f64> = log_probs.iter().map(|lp| lp.exp()).collect();
        let dist = WeightedIndex::new(&weights)
            .map_err(|e| RuntimeError::Inference(format!("cannot sample next token: {e}")))?;
        Ok(dist.sample(&mut self.rng))
    }
}

/// Numerically stable log-softmax. `-inf` entries stay `-inf`.
pub fn log_softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![f64::NEG_INFINITY; scores.len()];
    }
    let sum: f64 = scores.iter().map(|s| (s - max).exp()).sum();
    let log_sum = max + sum.ln();
    scores.iter().map(|s| s - log_sum).collect()
}

/// Keep the smallest set of most likely tokens whose mass reaches `top_p`
/// (at least one token); mask the rest to `-inf`.
fn apply_top_p(scores: &mut [f64], top_p: f64) {
    let probs: Vec<f64> = log_softmax(scores).into_iter().map(f64::exp).collect();
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0;
    let mut keep = 0;
    for &idx in &order {
        keep += 1;
        cumulative += probs[idx];
        if cumulative >= top_p {
            break;
        }
    }
    for &idx in &order[keep..] {
        scores[idx] = f64::NEG_INFINITY;
    }
}

/// Point mass on the highest raw score: `0.0` there, `-inf` elsewhere.
fn collapse_to_argmax(raw: &[f64]) -> Vec<f64> {
    let best = argmax(raw);
    (0..raw.len())
        .map(|idx| if Some(idx) == best { 0.0 } else { f64::NEG_INFINITY })
        .collect()
}

fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, &v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((idx, v)),
        })
        .map(|(idx, _)| idx)
}

/// Raw output of one sequence before detokenization
struct DecodedSequence {
    ids: Vec<u32>,
    log_probs: Vec<f64>,
    reason: StopReason,
}

/// Generate `params.num_return_sequences` completions for `prompt`.
pub fn generate(
    model: &dyn CausalModel,
    tokenizer: &dyn TextTokenizer,
    prompt: &str,
    params: &GenerationParameters,
) -> RuntimeResult<Vec<Completion>> {
    let prompt_ids = tokenizer.encode(prompt, true)?;
    if prompt_ids.is_empty() {
        return Err(RuntimeError::Tokenizer("prompt encoded to zero tokens".into()));
    }
    let stop = StopCriteria::new(tokenizer, &params.stop_sequences)?;
    let eos = tokenizer.eos_token_id();
    let base_seed = params.seed.unwrap_or_else(rand::random);

    debug!(
        prompt_tokens = prompt_ids.len(),
        sequences = params.num_return_sequences,
        stop_sequences = params.stop_sequences.len(),
        "starting generation"
    );

    (0..params.num_return_sequences)
        .map(|index| {
            let mut sampler = Sampler::new(
                params.temperature,
                params.top_p,
                base_seed.wrapping_add(index as u64),
            );
            let decoded = decode_sequence(
                model,
                &prompt_ids,
                eos,
                &stop,
                params.max_new_tokens,
                &mut sampler,
            )?;
            debug!(
                sequence = index,
                new_tokens = decoded.ids.len(),
                reason = ?decoded.reason,
                "sequence finished"
            );
            render(tokenizer, decoded)
        })
        .collect()
}

fn decode_sequence(
    model: &dyn CausalModel,
    prompt_ids: &[u32],
    eos: Option<u32>,
    stop: &StopCriteria,
    max_new_tokens: usize,
    sampler: &mut Sampler,
) -> RuntimeResult<DecodedSequence> {
    let mut session = model.start_session()?;
    // max_new_tokens is caller-controlled; grow with what is generated.
    let mut ids = Vec::new();
    let mut log_probs = Vec::new();

    let mut logits = session.forward(prompt_ids)?;
    let reason = loop {
        let scores = sampler.process(&logits)?;
        let step_log_probs = log_softmax(&scores);
        let chosen = sampler.choose(&step_log_probs)?;
        let token = u32::try_from(chosen)
            .map_err(|_| RuntimeError::Inference(format!("token id {chosen} out of range")))?;

        ids.push(token);
        log_probs.push(step_log_probs[chosen]);

        if Some(token) == eos {
            break StopReason::EndOfSequence;
        }
        if stop.matches(&ids) {
            break StopReason::StopSequence;
        }
        if ids.len() >= max_new_tokens {
            break StopReason::MaxNewTokens;
        }
        logits = session.forward(&[token])?;
    };

    Ok(DecodedSequence {
        ids,
        log_probs,
        reason,
    })
}

fn render(tokenizer: &dyn TextTokenizer, decoded: DecodedSequence) -> RuntimeResult<Completion> {
    let text = tokenizer.decode(&decoded.ids, true)?;
    let tokens = decoded
        .ids
        .iter()
        .zip(decoded.log_probs)
        .map(|(&id, log_probability)| {
            Ok(TokenScore {
                text: tokenizer.decode(&[id], false)?,
                log_probability,
            })
        })
        .collect::<RuntimeResult<Vec<_>>>()?;
    Ok(Completion { text, tokens })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::WordTokenizer;

    #[test]
    fn test_log_softmax_normalizes() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f64 = lp.iter().map(|v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(lp[2] > lp[1] && lp[1] > lp[0]);
    }

    #[test]
    fn test_log_softmax_keeps_masked_entries() {
        let lp = log_softmax(&[0.0, f64::NEG_INFINITY]);
        assert_eq!(lp[0], 0.0);
        assert_eq!(lp[1], f64::NEG_INFINITY);
    }

    #[test]
    fn test_top_p_keeps_smallest_nucleus() {
        // probabilities ~ [0.665, 0.245, 0.090]
        let mut scores = vec![2.0, 1.0, 0.0];
        apply_top_p(&mut scores, 0.8);
        assert!(scores[0].is_finite());
        assert!(scores[1].is_finite());
        assert_eq!(scores[2], f64::NEG_INFINITY);
    }

    #[test]
    fn test_top_p_zero_keeps_one_token() {
        let mut scores = vec![0.5, 3.0, 1.0];
        apply_top_p(&mut scores, 0.0);
        assert_eq!(scores.iter().filter(|s| s.is_finite()).count(), 1);
        assert!(scores[1].is_finite());
    }

    #[test]
    fn test_greedy_picks_argmax_without_scaling() {
        let mut sampler = Sampler::new(0.0, 0.5, 7);
        let scores = sampler.process(&[0.1, 4.0, 2.0]).unwrap();
        assert_eq!(scores, vec![f64::from(0.1f32), 4.0, 2.0]);
        let lp = log_softmax(&scores);
        assert_eq!(sampler.choose(&lp).unwrap(), 1);

        let negative = sampler.process(&[-2.0, -5.0, -1.0]).unwrap();
        assert_eq!(negative, vec![f64::NEG_INFINITY, f64::NEG_INFINITY, 0.0]);
    }

    #[test]
    fn test_sampling_is_reproducible_with_seed() {
        let logits = [1.0f32, 1.1, 0.9, 1.05];
        let draw = |seed| {
            let mut sampler = Sampler::new(1.0, 1.0, seed);
            (0..16)
                .map(|_| {
                    let lp = log_softmax(&sampler.process(&logits).unwrap());
                    sampler.choose(&lp).unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
    }

    #[test]
    fn test_tiny_temperature_collapses_to_argmax() {
        let mut sampler = Sampler::new(1e-320, 0.9, 3);
        let scores = sampler.process(&[0.5, 3.0, 1.0]).unwrap();
        assert_eq!(scores, vec![f64::NEG_INFINITY, 0.0, f64::NEG_INFINITY]);

        let lp = log_softmax(&scores);
        assert_eq!(lp[1], 0.0);
        assert_eq!(sampler.choose(&lp).unwrap(), 1);
    }

    #[test]
    fn test_nan_logits_rejected() {
        let sampler = Sampler::new(0.7, 0.9, 1);
        assert!(matches!(
            sampler.process(&[0.0, f32::NAN]),
            Err(RuntimeError::Inference(_))
        ));
    }

    #[test]
    fn test_stop_criteria_matches_trailing_tokens() {
        let tokenizer = WordTokenizer::new(["a", "b", "STOP", "HERE"]);
        let stop = StopCriteria::new(&tokenizer, &["STOP HERE".to_string()]).unwrap();
        let a = tokenizer.id("a").unwrap();
        let s = tokenizer.id("STOP").unwrap();
        let h = tokenizer.id("HERE").unwrap();
        assert!(!stop.matches(&[a, s]));
        assert!(stop.matches(&[a, s, h]));
        assert!(!stop.matches(&[s, h, a]));
    }

    #[test]
    fn test_stop_criteria_drops_empty_encodings() {
        let tokenizer = WordTokenizer::new(["a"]);
        let stop = StopCriteria::new(&tokenizer, &["   ".to_string()]).unwrap();
        assert!(stop.is_empty());
        assert!(!stop.matches(&[tokenizer.id("a").unwrap()]));
    }
}
