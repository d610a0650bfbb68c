// ============================================================
// Layer 4 - Batch Interleaver
// ============================================================
// Mixes two multi-batch streams into one training stream:
//
//   U - target-domain ("unsupervised") batches
//   S - baseline ("supervised") batches
//
// A counter `idx` starts at 0 and goes up by one per batch.
// Step `idx` pulls from U when idx % ratio == 0, otherwise from S:
//
//   ratio = 3:  idx 0 1 2 3 4 5 6 ...
//               src U S S U S S U ...
//
//   ratio = 1:  every step is U and S is never touched.
//
// U batches can be tagged with the target-domain marker so the
// model sees which domain an example belongs to.
//
// Every yielded example with a gold answer has its first span
// checked against its context. A malformed span stops the run:
// training on it would silently feed garbage positions to the
// margin loss.
//
// If either stream runs dry the interleaver returns
// DataError::Exhausted. There is no retry.

use crate::domain::{
    batch::{tag_shards, BatchOrigin, MultiBatch},
    error::{ConfigError, DataError},
};

/// A batch together with where it came from.
#[derive(Debug, Clone)]
pub struct InterleavedBatch {
    /// Position in the combined stream, starting at 0
    pub idx:    usize,
    pub origin: BatchOrigin,
    pub batch:  MultiBatch,
}

pub struct BatchInterleaver<U, S> {
    unsupervised: U,
    supervised:   S,
    ratio:        usize,
    idx:          usize,
    special_tag:  Option<String>,
}

impl<U, S> BatchInterleaver<U, S>
where
    U: Iterator<Item = MultiBatch>,
    S: Iterator<Item = MultiBatch>,
{
    pub fn new(unsupervised: U, supervised: S, ratio: usize) -> Result<Self, ConfigError> {
        if ratio == 0 {
            return Err(ConfigError::NotPositive { field: "sup_unsup_ratio" });
        }
        Ok(Self { unsupervised, supervised, ratio, idx: 0, special_tag: None })
    }

    /// Tag every U batch with `tag` before yielding it
    pub fn with_special_tag(mut self, tag: impl Into<String>) -> Self {
        self.special_tag = Some(tag.into());
        self
    }

    /// Counter value the next batch will carry
    pub fn position(&self) -> usize {
        self.idx
    }

    pub fn next_batch(&mut self) -> Result<InterleavedBatch, DataError> {
        let idx = self.idx;
        let origin = if idx % self.ratio == 0 {
            BatchOrigin::Unsupervised
        } else {
            BatchOrigin::Supervised
        };

        let mut batch = match origin {
            BatchOrigin::Unsupervised => self.unsupervised.next(),
            BatchOrigin::Supervised => self.supervised.next(),
        }
        .ok_or(DataError::Exhausted { origin, idx })?;

        if origin == BatchOrigin::Unsupervised {
            if let Some(tag) = &self.special_tag {
                tag_shards(&mut batch, tag);
            }
        }
        tracing::debug!("Yielding {} batch at step {}", origin, idx);

        validate_spans(&batch)?;
        self.idx += 1;
        Ok(InterleavedBatch { idx, origin, batch })
    }
}

fn validate_spans(batch: &MultiBatch) -> Result<(), DataError> {
    for (_, shard) in batch {
        for ex in &shard.examples {
            if let Some(gold) = ex.gold() {
                if !gold.fits(ex.context.len()) {
                    return Err(DataError::MalformedSpan {
                        id:          ex.id.clone(),
                        start:       gold.start,
                        end:         gold.end,
                        context_len: ex.context.len(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        batch::{Batch, TARGET_DOMAIN_TAG},
        example::{AnswerSpan, QaExample},
    };

    fn stream(data_type: &'static str) -> impl Iterator<Item = MultiBatch> {
        (0..).map(move |i| {
            let ex = QaExample {
                id:       format!("{data_type}{i}"),
                context:  vec!["a".into(), "b".into()],
                question: vec!["q".into()],
                answers:  vec![AnswerSpan::new("b", 1, 2)],
            };
            vec![(vec![i], Batch::new(data_type, vec![i], vec![ex]))]
        })
    }

    fn origins(ratio: usize, n: usize) -> Vec<BatchOrigin> {
        let mut it = BatchInterleaver::new(stream("u"), stream("s"), ratio).unwrap();
        (0..n).map(|_| it.next_batch().unwrap().origin).collect()
    }

    #[test]
    fn test_zero_ratio_is_an_error() {
        assert!(matches!(
            BatchInterleaver::new(stream("u"), stream("s"), 0).err(),
            Some(ConfigError::NotPositive { field: "sup_unsup_ratio" })
        ));
    }

    #[test]
    fn test_unsupervised_exactly_on_multiples_of_ratio() {
        for ratio in 1..=5 {
            for (idx, origin) in origins(ratio, 20).into_iter().enumerate() {
                let expected = if idx % ratio == 0 {
                    BatchOrigin::Unsupervised
                } else {
                    BatchOrigin::Supervised
                };
                assert_eq!(origin, expected, "ratio={ratio} idx={idx}");
            }
        }
    }

    #[test]
    fn test_ratio_one_never_touches_supervised() {
        let supervised = std::iter::from_fn(|| -> Option<MultiBatch> {
            panic!("supervised stream must not be consulted")
        });
        let mut it = BatchInterleaver::new(stream("u"), supervised, 1).unwrap();
        for _ in 0..10 {
            assert_eq!(it.next_batch().unwrap().origin, BatchOrigin::Unsupervised);
        }
    }

    #[test]
    fn test_counter_starts_at_zero_and_increments() {
        let mut it = BatchInterleaver::new(stream("u"), stream("s"), 3).unwrap();
        assert_eq!(it.position(), 0);
        let idxs: Vec<usize> = (0..6).map(|_| it.next_batch().unwrap().idx).collect();
        assert_eq!(idxs, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(it.position(), 6);
    }

    #[test]
    fn test_each_stream_advances_independently() {
        let mut it = BatchInterleaver::new(stream("u"), stream("s"), 2).unwrap();
        let ids: Vec<String> = (0..5)
            .map(|_| it.next_batch().unwrap().batch[0].1.examples[0].id.clone())
            .collect();
        assert_eq!(ids, vec!["u0", "s0", "u1", "s1", "u2"]);
    }

    #[test]
    fn test_special_tag_only_on_unsupervised() {
        let mut it = BatchInterleaver::new(stream("u"), stream("s"), 2).unwrap()
            .with_special_tag(TARGET_DOMAIN_TAG);
        let u = it.next_batch().unwrap();
        let s = it.next_batch().unwrap();
        assert_eq!(u.batch[0].1.dataset_type.as_deref(), Some(TARGET_DOMAIN_TAG));
        assert_eq!(s.batch[0].1.dataset_type, None);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let mut it = BatchInterleaver::new(stream("u").take(1), stream("s"), 1).unwrap();
        assert!(it.next_batch().is_ok());
        let err = it.next_batch().unwrap_err();
        assert!(matches!(err, DataError::Exhausted { origin: BatchOrigin::Unsupervised, idx: 1 }));
    }

    #[test]
    fn test_malformed_span_is_rejected() {
        let bad = std::iter::once(vec![(
            vec![0],
            Batch::new(
                "u",
                vec![0],
                vec![QaExample {
                    id:       "bad".into(),
                    context:  vec!["a".into()],
                    question: vec!["q".into()],
                    answers:  vec![AnswerSpan::new("x", 0, 4)],
                }],
            ),
        )]);
        let mut it = BatchInterleaver::new(bad, stream("s"), 1).unwrap();
        assert!(matches!(it.next_batch(), Err(DataError::MalformedSpan { .. })));
    }
}
