// ============================================================
// Layer 2 - ForwardUseCase
// ============================================================
// Answers every question of one split with a restored model and
// writes the answers where the caller asked for them.
//
// Single shard only: ceil(n / batch_size) batches, capped by
// eval_num_batches. Answers go to config.answer_path, the full
// EvalResult (optionally) to the eval directory.

use anyhow::Result;

use crate::application::schedule::{eval_steps, progress_bar};
use crate::data::dataset::{BatchOrder, QaDataSet};
use crate::domain::{
    batch::MultiBatch,
    config::RunConfig,
    evaluation::EvalResult,
    traits::{Evaluator, Session},
};
use crate::infra::checkpoint::GraphHandler;

pub struct ForwardUseCase<'a> {
    config:  &'a RunConfig,
    handler: &'a GraphHandler,
}

impl<'a> ForwardUseCase<'a> {
    pub fn new(config: &'a RunConfig, handler: &'a GraphHandler) -> Self {
        Self { config, handler }
    }

    pub fn execute<S>(&self, session: &mut S, data: &QaDataSet) -> Result<EvalResult>
    where
        S: Session + Evaluator,
    {
        let cfg = self.config;
        self.handler.initialize(session)?;

        let num_batches = eval_steps(data.num_examples(), cfg.batch_size, 1, cfg.eval_num_batches);
        tracing::info!("Forward pass over '{}': {} batches", data.data_type(), num_batches);

        let pb = progress_bar(num_batches, data.data_type());
        let batches = data
            .get_batches(cfg.batch_size, num_batches, BatchOrder::sequential())
            .map(|batch| {
                pb.inc(1);
                let mb: MultiBatch = vec![(batch.idxs.clone(), batch)];
                mb
            });
        let e = session.evaluate_batches(batches, data.data_type(), session.global_step())?;
        pb.finish_and_clear();
        tracing::info!("{}", e);

        if cfg.dump_answer {
            tracing::info!("Dumping answers ...");
            self.handler.dump_answer(&e, cfg.answer_path.as_deref())?;
        }
        if cfg.dump_eval {
            tracing::info!("Dumping eval ...");
            self.handler.dump_eval(&e, None)?;
        }
        Ok(e)
    }
}
