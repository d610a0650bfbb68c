// ============================================================
// Layer 3 - Core Traits (Collaborator Boundaries)
// ============================================================
// The training, test and forward loops only ever talk to the
// model through these traits. The real implementation lives in
// the ml layer (QaSession on top of Burn); the loops' unit tests
// plug in small fakes instead, so every periodic rule can be
// checked without a GPU.
//
//   Session   - owns model state and the global step
//   Trainer   - ranks examples and applies margin updates
//   Evaluator - turns batches into EvalResults
//
// Every method returns anyhow::Result: a failure anywhere in a
// collaborator ends the run.

use std::path::Path;

use anyhow::Result;

use crate::domain::{
    batch::MultiBatch,
    evaluation::{EvalResult, Summary},
};

// ─── Session ──────────────────────────────────────────────────────────────────
/// Model state that can be checkpointed.
pub trait Session {
    /// Number of optimisation updates applied so far
    fn global_step(&self) -> usize;

    /// Persist the model under `path` (the recorder picks the extension)
    fn save_checkpoint(&self, path: &Path) -> Result<()>;

    /// Restore the model saved at `path` after `global_step` updates
    fn load_checkpoint(&mut self, path: &Path, global_step: usize) -> Result<()>;
}

// ─── Trainer ──────────────────────────────────────────────────────────────────
/// One example chosen by `Trainer::score`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedExample {
    /// Index of the shard in the multi-batch
    pub shard:   usize,
    /// Index of the example inside that shard
    pub example: usize,
    pub score:   f64,
}

/// Top-K examples of a multi-batch, best first.
pub type Selection = Vec<SelectedExample>;

/// What one margin step reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub loss:      f64,
    /// Present only when the caller asked for summaries
    pub summaries: Option<Vec<Summary>>,
    /// False when the selection was empty and nothing was updated
    pub applied:   bool,
}

pub trait Trainer: Session {
    /// Rank the examples of `batch` and keep the best `k`
    fn score(&self, batch: &MultiBatch, k: usize) -> Result<Selection>;

    /// One optimisation update driven by `selection` only
    fn margin_step(
        &mut self,
        batch:        &MultiBatch,
        selection:    &Selection,
        want_summary: bool,
    ) -> Result<StepOutput>;
}

// ─── Evaluator ────────────────────────────────────────────────────────────────
pub trait Evaluator {
    /// Evaluate one multi-batch with the current model
    fn evaluate(&self, batch: &MultiBatch) -> Result<EvalResult>;

    /// Evaluate a sequence of multi-batches and fold the results.
    /// `data_type`/`global_step` label the identity used when the
    /// sequence is empty.
    fn evaluate_batches<I>(&self, batches: I, data_type: &str, global_step: usize) -> Result<EvalResult>
    where
        I: IntoIterator<Item = MultiBatch>,
    {
        let mut total: Option<EvalResult> = None;
        for batch in batches {
            let e = self.evaluate(&batch)?;
            total = Some(match total {
                None => e,
                Some(acc) => acc + e,
            });
        }
        Ok(total.unwrap_or_else(|| EvalResult::empty(data_type, global_step)))
    }
}
