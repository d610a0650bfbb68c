// ============================================================
// Layer 5 - Span Decoder
// ============================================================
// Turns per-token start/end scores for one context into ranked
// answer spans.
//
// A candidate span (s, e) is valid when
//   s <= e < context_len   and   e - s + 1 <= max_answer_len
// and is scored p_start[s] * p_end[e]. The top `n` candidates are
// returned best first; ties keep the earlier span.

/// One decoded span, end inclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanCandidate {
    pub start: usize,
    pub end:   usize,
    pub score: f32,
}

/// Numerically stable softmax over a row of logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.into_iter().map(|e| e / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

/// Log-softmax, used for gold-span log-likelihoods.
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = logits.iter().map(|&x| (x - max).exp()).sum::<f32>().ln() + max;
    logits.iter().map(|&x| x - log_sum).collect()
}

pub struct SpanDecoder {
    max_answer_len: usize,
    top_n:          usize,
}

impl SpanDecoder {
    pub fn new(max_answer_len: usize, top_n: usize) -> Self {
        Self { max_answer_len: max_answer_len.max(1), top_n: top_n.max(1) }
    }

    /// Best spans over the first `context_len` positions of the two
    /// probability rows.
    pub fn decode(&self, start_probs: &[f32], end_probs: &[f32], context_len: usize) -> Vec<SpanCandidate> {
        let len = context_len.min(start_probs.len()).min(end_probs.len());
        let mut candidates = Vec::new();

        for s in 0..len {
            for e in s..(s + self.max_answer_len).min(len) {
                candidates.push(SpanCandidate { start: s, end: e, score: start_probs[s] * end_probs[e] });
            }
        }

        // Stable sort keeps earlier spans first on equal scores
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(self.top_n);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_log_softmax_matches_softmax() {
        let logits = [0.5, -1.0, 2.0];
        let p  = softmax(&logits);
        let lp = log_softmax(&logits);
        for (a, b) in p.iter().zip(lp.iter()) {
            assert!((a.ln() - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_best_span_is_first() {
        let start = [0.1, 0.7, 0.1, 0.1];
        let end   = [0.1, 0.1, 0.6, 0.2];
        let spans = SpanDecoder::new(30, 3).decode(&start, &end, 4);
        assert_eq!(spans.len(), 3);
        assert_eq!((spans[0].start, spans[0].end), (1, 2));
        assert!(spans[0].score >= spans[1].score && spans[1].score >= spans[2].score);
    }

    #[test]
    fn test_end_never_before_start() {
        // Highest end prob sits before the highest start prob
        let start = [0.0, 0.0, 1.0];
        let end   = [1.0, 0.0, 0.0];
        for span in SpanDecoder::new(30, 10).decode(&start, &end, 3) {
            assert!(span.start <= span.end);
        }
    }

    #[test]
    fn test_respects_max_answer_len_and_context_len() {
        let start = [1.0, 0.0, 0.0, 0.0, 0.0];
        let end   = [0.0, 0.0, 0.0, 1.0, 1.0];
        let spans = SpanDecoder::new(2, 50).decode(&start, &end, 4);
        assert!(spans.iter().all(|s| s.end - s.start + 1 <= 2));
        assert!(spans.iter().all(|s| s.end < 4));
        // 4 single-token + 3 two-token spans
        assert_eq!(spans.len(), 7);
    }
}
