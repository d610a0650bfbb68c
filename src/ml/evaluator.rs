// ============================================================
// Layer 5 - Evaluator
// ============================================================
// Runs the current model (without autodiff) over a multi-batch
// and scores its answers against the gold answers.
//
// Per example:
//   - decode the top `num_candidates` spans
//   - predicted answer = best span, best answer = the candidate
//     with the highest F1 against any gold answer
//   - loss = -log p(gold start) - log p(gold end), only when the
//     gold span survived truncation
//
// F1/EM follow SQuAD: answers are normalised (lower-case, no
// punctuation, no articles) and F1 is token-overlap based.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    tensor::backend::AutodiffBackend,
};

use crate::data::preprocessor::Preprocessor;
use crate::domain::{
    batch::{Batch, MultiBatch},
    evaluation::{EvalResult, ExampleRecord},
    example::QaExample,
    traits::{Evaluator, Session},
};
use crate::ml::inferencer::{log_softmax, softmax};
use crate::ml::model::{to_host, QaSpanModel};
use crate::ml::trainer::QaSession;

// ─── Answer metrics ───────────────────────────────────────────────────────────
/// Token-overlap F1 between two answers after normalisation.
pub fn f1_score(prediction: &str, gold: &str, pre: &Preprocessor) -> f64 {
    let pred = pre.normalize_answer(prediction);
    let gold = pre.normalize_answer(gold);
    let pred_tokens: Vec<&str> = pred.split_whitespace().collect();
    let gold_tokens: Vec<&str> = gold.split_whitespace().collect();

    if pred_tokens.is_empty() || gold_tokens.is_empty() {
        return if pred_tokens == gold_tokens { 1.0 } else { 0.0 };
    }

    let mut gold_counts: HashMap<&str, usize> = HashMap::new();
    for t in &gold_tokens {
        *gold_counts.entry(t).or_insert(0) += 1;
    }
    let mut common = 0usize;
    for t in &pred_tokens {
        if let Some(c) = gold_counts.get_mut(t) {
            if *c > 0 {
                *c -= 1;
                common += 1;
            }
        }
    }
    if common == 0 {
        return 0.0;
    }

    let precision = common as f64 / pred_tokens.len() as f64;
    let recall    = common as f64 / gold_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

pub fn exact_match(prediction: &str, gold: &str, pre: &Preprocessor) -> f64 {
    if pre.normalize_answer(prediction) == pre.normalize_answer(gold) { 1.0 } else { 0.0 }
}

/// Best score of `prediction` over all gold answers, 0 when there are none
fn max_over_gold(prediction: &str, golds: &[String], metric: impl Fn(&str, &str) -> f64) -> f64 {
    golds.iter().map(|g| metric(prediction, g)).fold(0.0, f64::max)
}

// ─── Evaluator ────────────────────────────────────────────────────────────────
impl<B, O> Evaluator for QaSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<QaSpanModel<B>, B>,
{
    fn evaluate(&self, batch: &MultiBatch) -> Result<EvalResult> {
        let model = self.model.valid();
        let step  = self.global_step();
        let data_type = batch.first().map(|(_, b)| b.data_type.clone()).unwrap_or_default();

        let mut total = EvalResult::empty(data_type, step);
        for (_, shard) in batch {
            total = total + self.evaluate_shard(&model, shard, step);
        }
        tracing::debug!("{}", total);
        Ok(total)
    }
}

impl<B, O> QaSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<QaSpanModel<B>, B>,
{
    fn evaluate_shard(
        &self,
        model: &QaSpanModel<B::InnerBackend>,
        shard: &Batch,
        step:  usize,
    ) -> EvalResult {
        let mut result = EvalResult::empty(shard.data_type.clone(), step);
        if shard.is_empty() {
            return result;
        }

        let pre  = Preprocessor::new();
        let refs: Vec<&QaExample> = shard.examples.iter().collect();
        let span_batch = self.valid_batcher.batch(&refs, shard.dataset_type.as_deref());
        let width      = span_batch.context_len;
        let logits     = model.forward(&span_batch);
        let start      = to_host(logits.start);
        let end        = to_host(logits.end);

        result.idxs = shard.idxs.clone();
        result.num_examples = shard.len();
        let mut answers = BTreeMap::new();

        for (row, ex) in shard.examples.iter().enumerate() {
            let len = span_batch.context_lens[row];
            let start_row = &start[row * width..row * width + len];
            let end_row   = &end[row * width..row * width + len];

            let candidates = self.decoder.decode(&softmax(start_row), &softmax(end_row), len);
            let texts: Vec<String> = candidates
                .iter()
                .map(|c| ex.span_text(c.start, c.end + 1))
                .collect();
            let predicted = texts.first().cloned().unwrap_or_default();

            let golds: Vec<String> = ex.answers.iter().map(|a| a.text.clone()).collect();
            let f1 = |p: &str| max_over_gold(p, &golds, |a, b| f1_score(a, b, &pre));
            let predicted_f1 = f1(&predicted);
            let (best_answer, best_f1) = texts
                .iter()
                .map(|t| (t.clone(), f1(t)))
                .fold((predicted.clone(), predicted_f1), |best, cur| if cur.1 > best.1 { cur } else { best });

            if !golds.is_empty() {
                result.num_labelled += 1;
                result.f1_sum += predicted_f1;
                result.em_sum += max_over_gold(&predicted, &golds, |a, b| exact_match(a, b, &pre));
            }
            if let Some((s, e)) = span_batch.gold[row] {
                let ls = log_softmax(start_row);
                let le = log_softmax(end_row);
                result.num_scored += 1;
                result.loss_sum   -= f64::from(ls[s] + le[e]);
            }

            answers.insert(ex.id.clone(), predicted.clone());
            result.records.push(ExampleRecord {
                id:               ex.id.clone(),
                idx:              shard.idxs.get(row).copied().unwrap_or(row),
                paragraph:        ex.paragraph(),
                question:         ex.question_text(),
                gold_answers:     golds,
                predicted_answer: predicted,
                predicted_f1,
                best_answer,
                best_f1,
            });
        }
        result.answers = answers;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{QaDataSet, SharedData};
    use crate::domain::example::AnswerSpan;
    use crate::infra::vocab_store::VocabStore;
    use crate::ml::model::QaSpanConfig;
    use crate::ml::trainer::SessionSettings;
    use burn::{
        backend::{Autodiff, NdArray},
        optim::AdamConfig,
    };

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_f1_and_exact_match() {
        let pre = Preprocessor::new();
        assert_eq!(f1_score("The Eiffel Tower", "eiffel tower", &pre), 1.0);
        assert_eq!(exact_match("The Eiffel Tower!", "eiffel tower", &pre), 1.0);
        assert_eq!(f1_score("red car", "blue bike", &pre), 0.0);
        // precision 1/2, recall 1/1
        assert!((f1_score("big house", "house", &pre) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(exact_match("big house", "house", &pre), 0.0);
    }

    #[test]
    fn test_max_over_gold_uses_best_reference() {
        let pre   = Preprocessor::new();
        let golds = vec!["paris".to_string(), "in paris france".to_string()];
        assert_eq!(max_over_gold("Paris", &golds, |a, b| f1_score(a, b, &pre)), 1.0);
        assert_eq!(max_over_gold("Paris", &[], |a, b| f1_score(a, b, &pre)), 0.0);
    }

    #[test]
    fn test_evaluate_fills_records_and_answers() {
        let tmp = tempfile::tempdir().unwrap();
        let exs = vec![
            QaExample {
                id:       "q1".into(),
                context:  vec!["the".into(), "cat".into(), "sat".into()],
                question: vec!["who".into()],
                answers:  vec![AnswerSpan::new("cat", 1, 2)],
            },
            QaExample {
                id:       "q2".into(),
                context:  vec!["no".into(), "answer".into()],
                question: vec!["why".into()],
                answers:  Vec::new(),
            },
        ];
        let ds    = QaDataSet::new("dev", exs.clone(), SharedData::default());
        let vocab = VocabStore::new(tmp.path()).load_or_build(&[&ds], true, 0, false).unwrap();
        let settings = SessionSettings {
            learning_rate: 1e-3, margin: 1.0, ques_size_th: 8, para_size_th: 8,
            max_answer_len: 3, num_candidates: 5,
        };
        let device  = Default::default();
        let model   = QaSpanConfig::new(vocab.size(), 19, 8, 16, 2, 1, 32, 0.0).init::<TestBackend>(&device);
        let session = QaSession::new(model, AdamConfig::new().init(), vocab, device, &settings);

        let mb: MultiBatch = vec![(vec![10, 11], Batch::new("dev", vec![10, 11], exs))];
        let result = session.evaluate(&mb).unwrap();

        assert_eq!(result.data_type, "dev");
        assert_eq!(result.idxs, vec![10, 11]);
        assert_eq!(result.num_examples, 2);
        assert_eq!(result.num_labelled, 1);
        assert_eq!(result.num_scored, 1);
        assert!(result.loss() > 0.0);
        assert_eq!(result.answers.len(), 2);
        assert_eq!(result.records.len(), 2);
        for r in &result.records {
            assert!(r.best_f1 >= r.predicted_f1);
            assert!(!r.predicted_answer.is_empty());
        }
        assert_eq!(result.records[1].idx, 11);
    }
}
