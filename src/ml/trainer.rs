// ============================================================
// Layer 5 - Training Session
// ============================================================
// QaSession owns everything that changes while training:
//
//   model        QaSpanModel on an autodiff backend
//   optim        any Burn optimizer for that model (Adam in practice)
//   global_step  number of updates applied so far
//   unk_rows     pretrained vectors for words outside the trained
//                vocabulary, appended to the word embedding after
//                every restore (test/forward only)
//
// One training step is split in two, so the loop can decide
// what to learn from before touching the weights:
//
//   score        rank every example of a multi-batch by the
//                log-likelihood of its gold span under the current
//                model (no gradients) and keep the best K
//
//   margin_step  hinge loss on the selected examples only
//                  relu(margin + max_wrong_logit - gold_logit)
//                for start and end, then one optimizer update
//
// Burn 0.20 notes:
//   - model.valid() drops autodiff for scoring/evaluation, so the
//     session keeps a second batcher on the inner backend
//   - optim.step takes the model by value and returns the update

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::{activation::relu, backend::AutodiffBackend},
};

use crate::data::batcher::{SpanBatcher, MASK_VALUE};
use crate::domain::{
    batch::MultiBatch,
    evaluation::Summary,
    example::QaExample,
    traits::{SelectedExample, Selection, Session, StepOutput, Trainer},
};
use crate::infra::vocab_store::Vocab;
use crate::ml::inferencer::{log_softmax, SpanDecoder};
use crate::ml::model::{to_host, QaSpanModel};

/// Hyperparameters the session needs beyond the model itself.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub learning_rate:  f64,
    pub margin:         f64,
    pub ques_size_th:   usize,
    pub para_size_th:   usize,
    pub max_answer_len: usize,
    pub num_candidates: usize,
}

pub struct QaSession<B: AutodiffBackend, O> {
    pub(crate) model:         QaSpanModel<B>,
    optim:                    O,
    pub(crate) batcher:       SpanBatcher<B>,
    pub(crate) valid_batcher: SpanBatcher<B::InnerBackend>,
    pub(crate) decoder:       SpanDecoder,
    global_step:              usize,
    learning_rate:            f64,
    margin:                   f64,
    unk_rows:                 Vec<f32>,
    trained_rows:             usize,
}

impl<B, O> QaSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<QaSpanModel<B>, B>,
{
    pub fn new(model: QaSpanModel<B>, optim: O, vocab: Vocab, device: B::Device, settings: &SessionSettings) -> Self {
        let batcher = SpanBatcher::new(
            device.clone(), vocab.clone(), settings.ques_size_th, settings.para_size_th,
        );
        let valid_batcher = SpanBatcher::new(
            device, vocab, settings.ques_size_th, settings.para_size_th,
        );
        let trained_rows = model.num_word_rows();
        Self {
            model,
            optim,
            batcher,
            valid_batcher,
            decoder: SpanDecoder::new(settings.max_answer_len, settings.num_candidates),
            global_step: 0,
            learning_rate: settings.learning_rate,
            margin: settings.margin,
            unk_rows: Vec::new(),
            trained_rows,
        }
    }

    /// Extend the word embedding with fixed rows for words the
    /// trained vocabulary lacks. Checkpoints keep the trained rows only.
    pub fn with_unk_embeddings(mut self, rows: Vec<f32>) -> Result<Self> {
        self.model = self.model.append_word_rows(&rows)?;
        self.unk_rows = rows;
        Ok(self)
    }

    /// Margin loss summed over the rows that have a gold span.
    fn hinge_sum(&self, examples: &[&QaExample], dataset_type: Option<&str>) -> Tensor<B, 1> {
        let batch  = self.batcher.batch(examples, dataset_type);
        let n      = batch.batch_size();
        let logits = self.model.forward(&batch);

        let has_gold: Vec<f32> = batch.gold.iter().map(|g| if g.is_some() { 1.0 } else { 0.0 }).collect();
        let weights = Tensor::<B, 1>::from_floats(has_gold.as_slice(), &self.batcher.device);

        let start = self.hinge(logits.start, batch.start_onehot);
        let end   = self.hinge(logits.end, batch.end_onehot);
        ((start + end).reshape([n]) * weights).sum()
    }

    /// [n, P] logits and one-hot gold rows -> [n, 1] hinge values
    fn hinge(&self, logits: Tensor<B, 2>, onehot: Tensor<B, 2>) -> Tensor<B, 2> {
        let gold_logit = (logits.clone() * onehot.clone()).sum_dim(1);
        // Push the gold position out of the running for "best wrong"
        let max_wrong  = (logits + onehot * MASK_VALUE).max_dim(1);
        relu((max_wrong - gold_logit).add_scalar(self.margin))
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────
impl<B, O> Session for QaSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<QaSpanModel<B>, B>,
{
    fn global_step(&self) -> usize {
        self.global_step
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        let model = self.model.clone().truncate_word_rows(self.trained_rows);
        CompactRecorder::new()
            .record(model.into_record(), path.to_path_buf())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        tracing::debug!("Saved checkpoint '{}' at step {}", path.display(), self.global_step);
        Ok(())
    }

    fn load_checkpoint(&mut self, path: &Path, global_step: usize) -> Result<()> {
        let record = CompactRecorder::new()
            .load(path.to_path_buf(), &self.batcher.device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Was it saved by a training run?", path.display())
            })?;
        self.model = self
            .model
            .clone()
            .truncate_word_rows(self.trained_rows)
            .load_record(record)
            .append_word_rows(&self.unk_rows)?;
        self.global_step = global_step;
        tracing::info!("Restored checkpoint '{}' at step {}", path.display(), global_step);
        Ok(())
    }
}

// ─── Trainer ──────────────────────────────────────────────────────────────────
impl<B, O> Trainer for QaSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<QaSpanModel<B>, B>,
{
    fn score(&self, batch: &MultiBatch, k: usize) -> Result<Selection> {
        let model = self.model.valid();
        let mut scored: Selection = Vec::new();

        for (shard_idx, (_, shard)) in batch.iter().enumerate() {
            if shard.is_empty() {
                continue;
            }
            let refs: Vec<&QaExample> = shard.examples.iter().collect();
            let span_batch = self.valid_batcher.batch(&refs, shard.dataset_type.as_deref());
            let width      = span_batch.context_len;
            let logits     = model.forward(&span_batch);
            let start      = to_host(logits.start);
            let end        = to_host(logits.end);

            for (row, gold) in span_batch.gold.iter().enumerate() {
                // Examples without a usable gold span cannot be ranked
                let Some((s, e)) = *gold else { continue };
                let len = span_batch.context_lens[row];
                let ls  = log_softmax(&start[row * width..row * width + len]);
                let le  = log_softmax(&end[row * width..row * width + len]);
                scored.push(SelectedExample {
                    shard:   shard_idx,
                    example: row,
                    score:   f64::from(ls[s] + le[e]),
                });
            }
        }

        // Stable sort: equal scores keep batch order
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        tracing::debug!("Selected {} examples at step {}", scored.len(), self.global_step + 1);
        Ok(scored)
    }

    fn margin_step(
        &mut self,
        batch:        &MultiBatch,
        selection:    &Selection,
        want_summary: bool,
    ) -> Result<StepOutput> {
        if selection.is_empty() {
            tracing::warn!("Empty selection at step {}, skipping update", self.global_step + 1);
            return Ok(StepOutput { loss: 0.0, summaries: None, applied: false });
        }

        // Keep each shard's tag by batching the selection shard by shard
        let mut by_shard: BTreeMap<usize, Vec<&QaExample>> = BTreeMap::new();
        for sel in selection {
            let (_, shard) = batch
                .get(sel.shard)
                .with_context(|| format!("Selection refers to missing shard {}", sel.shard))?;
            let ex = shard
                .examples
                .get(sel.example)
                .with_context(|| format!("Selection refers to missing example {}", sel.example))?;
            by_shard.entry(sel.shard).or_default().push(ex);
        }

        let mut total: Option<Tensor<B, 1>> = None;
        for (shard_idx, examples) in &by_shard {
            let tag  = batch[*shard_idx].1.dataset_type.as_deref();
            let part = self.hinge_sum(examples, tag);
            total = Some(match total {
                None => part,
                Some(acc) => acc + part,
            });
        }
        let Some(total) = total else {
            return Ok(StepOutput { loss: 0.0, summaries: None, applied: false });
        };
        let loss = total.div_scalar(selection.len() as f64);
        let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();

        // Backward pass + optimizer update
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self.optim.step(self.learning_rate, self.model.clone(), grads);
        self.global_step += 1;

        let summaries = want_summary.then(|| {
            vec![
                Summary::new("loss", loss_val),
                Summary::new("num_selected", selection.len() as f64),
            ]
        });
        Ok(StepOutput { loss: loss_val, summaries, applied: true })
    }
}
