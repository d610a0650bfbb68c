// ============================================================
// Layer 3 - Evaluation Results
// ============================================================
// An EvalResult is what the evaluator returns for one batch.
// Results for many batches are combined with `merge` (or `+`):
//
//   total = r1 + r2 + r3 + ...
//
// The combination is associative and `EvalResult::empty` is its
// identity, so a pass can fold results in any grouping. Counts
// and sums add; index lists, answers and per-example records are
// concatenated in order. Metrics are only turned into averages
// when summaries are requested.

use std::{collections::BTreeMap, ops::Add};

use serde::{Deserialize, Serialize};

/// One scalar for the metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub tag:   String,
    pub value: f64,
}

impl Summary {
    pub fn new(tag: impl Into<String>, value: f64) -> Self {
        Self { tag: tag.into(), value }
    }
}

/// Everything the evaluator knows about one example, kept for
/// error analysis after a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleRecord {
    pub id:               String,
    pub idx:              usize,
    pub paragraph:        String,
    pub question:         String,
    pub gold_answers:     Vec<String>,
    pub predicted_answer: String,
    pub predicted_f1:     f64,
    /// Candidate span that best matches any gold answer
    pub best_answer:      String,
    pub best_f1:          f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub data_type:   String,
    pub global_step: usize,
    pub idxs:        Vec<usize>,
    /// Examples seen
    pub num_examples: usize,
    /// Examples with at least one gold answer
    pub num_labelled: usize,
    /// Examples whose gold span produced a loss value
    pub num_scored:   usize,
    pub loss_sum:     f64,
    pub f1_sum:       f64,
    pub em_sum:       f64,
    /// Predicted answer text by example id
    pub answers:      BTreeMap<String, String>,
    pub records:      Vec<ExampleRecord>,
}

impl EvalResult {
    /// The identity for `merge`
    pub fn empty(data_type: impl Into<String>, global_step: usize) -> Self {
        Self {
            data_type:    data_type.into(),
            global_step,
            idxs:         Vec::new(),
            num_examples: 0,
            num_labelled: 0,
            num_scored:   0,
            loss_sum:     0.0,
            f1_sum:       0.0,
            em_sum:       0.0,
            answers:      BTreeMap::new(),
            records:      Vec::new(),
        }
    }

    /// Combine two results. `self` keeps its data type and step.
    pub fn merge(mut self, other: EvalResult) -> EvalResult {
        self.idxs.extend(other.idxs);
        self.num_examples += other.num_examples;
        self.num_labelled += other.num_labelled;
        self.num_scored   += other.num_scored;
        self.loss_sum     += other.loss_sum;
        self.f1_sum       += other.f1_sum;
        self.em_sum       += other.em_sum;
        self.answers.extend(other.answers);
        self.records.extend(other.records);
        self
    }

    pub fn loss(&self) -> f64 {
        if self.num_scored == 0 { 0.0 } else { self.loss_sum / self.num_scored as f64 }
    }

    pub fn f1(&self) -> f64 {
        if self.num_labelled == 0 { 0.0 } else { self.f1_sum / self.num_labelled as f64 }
    }

    pub fn exact_match(&self) -> f64 {
        if self.num_labelled == 0 { 0.0 } else { self.em_sum / self.num_labelled as f64 }
    }

    /// Scalars for the metrics sink, tagged with the data type
    pub fn summaries(&self) -> Vec<Summary> {
        vec![
            Summary::new(format!("{}/loss", self.data_type), self.loss()),
            Summary::new(format!("{}/f1", self.data_type), self.f1()),
            Summary::new(format!("{}/em", self.data_type), self.exact_match()),
        ]
    }
}

impl Add for EvalResult {
    type Output = EvalResult;

    fn add(self, rhs: EvalResult) -> EvalResult {
        self.merge(rhs)
    }
}

impl std::fmt::Display for EvalResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} step {}: {} examples, loss={:.4}, f1={:.4}, em={:.4}",
            self.data_type,
            self.global_step,
            self.num_examples,
            self.loss(),
            self.f1(),
            self.exact_match(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sums use dyadic fractions so float addition is exact and
    // associativity can be checked with plain equality.
    fn result(idx: usize, f1: f64, loss: f64) -> EvalResult {
        let id = format!("q{idx}");
        EvalResult {
            idxs:         vec![idx],
            num_examples: 1,
            num_labelled: 1,
            num_scored:   1,
            loss_sum:     loss,
            f1_sum:       f1,
            em_sum:       if f1 == 1.0 { 1.0 } else { 0.0 },
            answers:      BTreeMap::from([(id.clone(), format!("answer {idx}"))]),
            records:      Vec::new(),
            ..EvalResult::empty("dev", 7)
        }
    }

    #[test]
    fn test_merge_is_associative() {
        let (a, b, c) = (result(0, 0.5, 1.25), result(1, 1.0, 0.5), result(2, 0.25, 2.0));
        let left  = (a.clone() + b.clone()) + c.clone();
        let right = a + (b + c);
        assert_eq!(left, right);
        assert_eq!(left.idxs, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_is_identity() {
        let a = result(3, 0.75, 1.0);
        assert_eq!(EvalResult::empty("dev", 7) + a.clone(), a);
        assert_eq!(a.clone() + EvalResult::empty("dev", 7), a);
    }

    #[test]
    fn test_summaries_do_not_depend_on_order() {
        let (a, b, c) = (result(0, 0.5, 1.25), result(1, 1.0, 0.5), result(2, 0.25, 2.0));
        let forward  = a.clone() + b.clone() + c.clone();
        let backward = c + b + a;
        assert_eq!(forward.summaries(), backward.summaries());
        assert_eq!(forward.answers, backward.answers);
    }

    #[test]
    fn test_averages() {
        let total = result(0, 0.5, 1.0) + result(1, 1.0, 3.0);
        assert_eq!(total.f1(), 0.75);
        assert_eq!(total.exact_match(), 0.5);
        assert_eq!(total.loss(), 2.0);
        assert_eq!(total.summaries()[1], Summary::new("dev/f1", 0.75));
    }

    #[test]
    fn test_empty_result_has_zero_metrics() {
        let e = EvalResult::empty("test", 0);
        assert_eq!(e.f1(), 0.0);
        assert_eq!(e.loss(), 0.0);
    }
}
