// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// The margin-training loop. Every iteration runs, in this order:
//
//   Step 1: next batch from the interleaver (U every ratio-th step)
//   Step 2: global_step = session.global_step() + 1
//   Step 3: score the batch and keep the top-K examples
//   Step 4: margin update on the selection
//   Step 5: summaries        if global_step % log_period  == 0
//   Step 6: checkpoint       if global_step % save_period == 0
//   Step 7: train/dev eval   if eval is on and
//                            global_step % eval_period == 0
//
// Steps 5-7 only run when step 4 applied an update. A skipped
// update (empty selection) leaves global_step where it was, and
// the same step number is reached again by the next update.
//
// The loop runs exactly num_steps iterations. Any error (data
// exhausted, malformed span, I/O) ends the run immediately.
//
// The session is any Trainer + Evaluator, so the whole schedule
// can be exercised with a fake in the tests below.

use anyhow::{Context, Result};

use crate::application::schedule::{eval_steps, is_due, progress_bar, train_steps};
use crate::data::{
    dataset::{BatchOrder, QaDataSet},
    interleave::BatchInterleaver,
};
use crate::domain::{
    batch::TARGET_DOMAIN_TAG,
    config::RunConfig,
    traits::{Evaluator, Trainer},
};
use crate::infra::checkpoint::GraphHandler;

/// The three splits a training run reads.
pub struct TrainData {
    /// Target-domain training data (the U stream)
    pub train:    QaDataSet,
    pub dev:      QaDataSet,
    /// Baseline training data (the S stream)
    pub baseline: QaDataSet,
}

/// What a finished run did, mostly for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub steps:       usize,
    pub global_step: usize,
    pub evaluations: usize,
    pub last_loss:   f64,
}

pub struct TrainUseCase<'a> {
    config:  &'a RunConfig,
    handler: &'a GraphHandler,
}

impl<'a> TrainUseCase<'a> {
    pub fn new(config: &'a RunConfig, handler: &'a GraphHandler) -> Self {
        Self { config, handler }
    }

    pub fn execute<T>(&self, session: &mut T, data: &TrainData) -> Result<TrainSummary>
    where
        T: Trainer + Evaluator,
    {
        let cfg = self.config;
        self.handler.initialize(session)?;

        let num_steps = train_steps(
            cfg.num_steps,
            data.train.num_examples(),
            cfg.batch_size,
            cfg.num_gpus,
            cfg.num_epochs,
        );
        tracing::info!(
            "Training for {} steps (k={}, ratio={}, special token={})",
            num_steps, cfg.k, cfg.sup_unsup_ratio, cfg.use_special_token
        );

        // ── Batch streams ─────────────────────────────────────────────────────
        let order = BatchOrder { shuffle: cfg.shuffle, cluster: cfg.cluster, seed: cfg.seed };
        let unsupervised = data.train.get_multi_batches(cfg.batch_size, cfg.num_gpus, num_steps, order);
        let supervised = data.baseline.get_multi_batches(
            cfg.batch_size,
            cfg.num_gpus,
            num_steps,
            BatchOrder { seed: cfg.seed.wrapping_add(1), ..order },
        );
        let mut batches = BatchInterleaver::new(unsupervised, supervised, cfg.sup_unsup_ratio)?;
        if cfg.use_special_token {
            batches = batches.with_special_tag(TARGET_DOMAIN_TAG);
        }

        let mut summary = TrainSummary { steps: 0, global_step: session.global_step(), evaluations: 0, last_loss: 0.0 };
        let pb = progress_bar(num_steps, "train");

        for _ in 0..num_steps {
            let next = batches.next_batch().context("Training batch stream failed")?;

            let global_step  = session.global_step() + 1;
            let want_summary = is_due(global_step, cfg.log_period);

            let selection = session.score(&next.batch, cfg.k)?;
            let out = session.margin_step(&next.batch, &selection, want_summary)?;
            summary.steps += 1;
            pb.inc(1);
            if !out.applied {
                tracing::debug!("No update at step {}", global_step);
                continue;
            }
            summary.last_loss = out.loss;

            if want_summary {
                if let Some(summaries) = &out.summaries {
                    self.handler.add_summaries(summaries, global_step)?;
                }
            }

            if is_due(global_step, cfg.save_period) {
                self.handler.save(&*session, global_step)?;
            }

            if cfg.eval && is_due(global_step, cfg.eval_period) {
                self.evaluate(&*session, data, global_step)?;
                summary.evaluations += 1;
            }

            pb.set_message(format!("loss={:.4}", out.loss));
        }
        pb.finish_and_clear();

        summary.global_step = session.global_step();
        tracing::info!(
            "Training finished: {} steps, global step {}, {} evaluations",
            summary.steps, summary.global_step, summary.evaluations
        );
        Ok(summary)
    }

    /// Evaluate on a slice of train and dev, log both, dump dev.
    fn evaluate<E: Evaluator>(&self, session: &E, data: &TrainData, global_step: usize) -> Result<()> {
        let cfg   = self.config;
        let steps = eval_steps(data.dev.num_examples(), cfg.batch_size, cfg.num_gpus, cfg.eval_num_batches);
        let order = BatchOrder::sequential();

        let e_train = session.evaluate_batches(
            data.train.get_multi_batches(cfg.batch_size, cfg.num_gpus, steps, order),
            data.train.data_type(),
            global_step,
        )?;
        self.handler.add_summaries(&e_train.summaries(), global_step)?;

        let e_dev = session.evaluate_batches(
            data.dev.get_multi_batches(cfg.batch_size, cfg.num_gpus, steps, order),
            data.dev.data_type(),
            global_step,
        )?;
        self.handler.add_summaries(&e_dev.summaries(), global_step)?;
        tracing::info!("{}", e_train);
        tracing::info!("{}", e_dev);

        if cfg.dump_eval {
            self.handler.dump_eval(&e_dev, None)?;
        }
        if cfg.dump_answer {
            self.handler.dump_answer(&e_dev, None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::dataset::SharedData;
    use crate::domain::{
        batch::MultiBatch,
        evaluation::{EvalResult, Summary},
        example::{AnswerSpan, QaExample},
        traits::{SelectedExample, Selection, Session, StepOutput},
    };
    use crate::infra::dirs::prepare_output_dirs;
    use std::{cell::RefCell, fs, path::Path};

    /// Session that records every call and never fails.
    #[derive(Default)]
    pub(crate) struct FakeSession {
        pub step:        usize,
        /// (global step, dataset_type of first shard) per score call
        pub scored:      RefCell<Vec<(usize, Option<String>)>>,
        pub saves:       RefCell<Vec<usize>>,
        pub evaluations: RefCell<Vec<(String, usize)>>,
        /// Steps whose first update attempt is not applied
        pub skip_once:   Vec<usize>,
    }

    impl Session for FakeSession {
        fn global_step(&self) -> usize {
            self.step
        }

        fn save_checkpoint(&self, _path: &Path) -> Result<()> {
            self.saves.borrow_mut().push(self.step);
            Ok(())
        }

        fn load_checkpoint(&mut self, _path: &Path, global_step: usize) -> Result<()> {
            self.step = global_step;
            Ok(())
        }
    }

    impl Trainer for FakeSession {
        fn score(&self, batch: &MultiBatch, k: usize) -> Result<Selection> {
            self.scored
                .borrow_mut()
                .push((self.step + 1, batch[0].1.dataset_type.clone()));
            Ok((0..k.min(batch[0].1.len()))
                .map(|i| SelectedExample { shard: 0, example: i, score: -(i as f64) })
                .collect())
        }

        fn margin_step(&mut self, _batch: &MultiBatch, selection: &Selection, want_summary: bool) -> Result<StepOutput> {
            if let Some(pos) = self.skip_once.iter().position(|s| *s == self.step + 1) {
                self.skip_once.remove(pos);
                return Ok(StepOutput { loss: 0.0, summaries: None, applied: false });
            }
            self.step += 1;
            Ok(StepOutput {
                loss:      selection.len() as f64,
                summaries: want_summary.then(|| vec![Summary::new("loss", selection.len() as f64)]),
                applied:   true,
            })
        }
    }

    impl Evaluator for FakeSession {
        fn evaluate(&self, batch: &MultiBatch) -> Result<EvalResult> {
            let mut e = EvalResult::empty(batch[0].1.data_type.clone(), self.step);
            for (idxs, shard) in batch {
                e.idxs.extend(idxs);
                e.num_examples += shard.len();
                for ex in &shard.examples {
                    e.answers.insert(ex.id.clone(), ex.context[0].clone());
                }
            }
            self.evaluations.borrow_mut().push((e.data_type.clone(), self.step));
            Ok(e)
        }
    }

    pub(crate) fn dataset(data_type: &str, n: usize) -> QaDataSet {
        let examples = (0..n)
            .map(|i| QaExample {
                id:       format!("{data_type}-{i}"),
                context:  vec![format!("w{i}"), "x".into()],
                question: vec!["q".into()],
                answers:  vec![AnswerSpan::new(format!("w{i}"), 0, 1)],
            })
            .collect();
        QaDataSet::new(data_type, examples, SharedData::default())
    }

    fn config(out: &Path) -> RunConfig {
        RunConfig {
            out_dir:          out.to_path_buf(),
            baseline_dir:     Some("baseline".into()),
            batch_size:       2,
            num_steps:        12,
            log_period:       5,
            save_period:      4,
            eval_period:      6,
            eval_num_batches: 2,
            k:                1,
            sup_unsup_ratio:  3,
            use_special_token: true,
            ..RunConfig::default()
        }
    }

    fn data() -> TrainData {
        TrainData { train: dataset("train", 6), dev: dataset("dev", 7), baseline: dataset("squad", 8) }
    }

    fn run(cfg: &RunConfig, session: &mut FakeSession) -> TrainSummary {
        let dirs    = prepare_output_dirs(&cfg.out_dir, cfg.load).unwrap();
        let handler = GraphHandler::new(cfg, &dirs).unwrap();
        TrainUseCase::new(cfg, &handler).execute(session, &data()).unwrap()
    }

    #[test]
    fn test_runs_exactly_num_steps() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let mut s = FakeSession::default();
        let summary = run(&cfg, &mut s);
        assert_eq!(summary.steps, 12);
        assert_eq!(summary.global_step, 12);
        assert_eq!(s.scored.borrow().len(), 12);
    }

    #[test]
    fn test_periodic_actions_follow_global_step() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let mut s = FakeSession::default();
        let summary = run(&cfg, &mut s);

        assert_eq!(*s.saves.borrow(), vec![4, 8, 12]);
        assert_eq!(summary.evaluations, 2);
        // each evaluation covers train then dev
        let evals = s.evaluations.borrow();
        assert_eq!(evals.len(), 2 * 2 * 2);
        assert_eq!(evals[0], ("train".to_string(), 6));
        assert_eq!(evals[2], ("dev".to_string(), 6));

        let csv  = fs::read_to_string(tmp.path().join("log").join("summaries.csv")).unwrap();
        let loss_steps: Vec<&str> = csv
            .lines()
            .filter(|l| l.split(',').nth(1) == Some("loss"))
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(loss_steps, vec!["5", "10"]);
        assert!(csv.lines().any(|l| l.starts_with("12,dev/f1,")));

        assert!(tmp.path().join("eval").join("dev-000006.json").exists());
        assert!(tmp.path().join("answer").join("dev-000012.json").exists());
    }

    #[test]
    fn test_skipped_update_does_not_repeat_periodic_actions() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = RunConfig { num_steps: 6, eval: false, ..config(tmp.path()) };
        let mut s = FakeSession { skip_once: vec![4], ..FakeSession::default() };
        let summary = run(&cfg, &mut s);

        assert_eq!(summary.steps, 6);
        assert_eq!(summary.global_step, 5);
        assert_eq!(*s.saves.borrow(), vec![4]);
        let latest = fs::read_to_string(tmp.path().join("save").join("checkpoint.json")).unwrap();
        assert_eq!(latest.trim(), "4");
    }

    #[test]
    fn test_unsupervised_batches_are_tagged_on_ratio_multiples() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let mut s = FakeSession::default();
        run(&cfg, &mut s);

        for (i, (step, tag)) in s.scored.borrow().iter().enumerate() {
            assert_eq!(*step, i + 1);
            let expected = (i % 3 == 0).then(|| TARGET_DOMAIN_TAG.to_string());
            assert_eq!(*tag, expected, "idx {i}");
        }
    }

    #[test]
    fn test_eval_disabled_skips_evaluation() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = RunConfig { eval: false, ..config(tmp.path()) };
        let mut s = FakeSession::default();
        let summary = run(&cfg, &mut s);
        assert_eq!(summary.evaluations, 0);
        assert!(s.evaluations.borrow().is_empty());
    }

    #[test]
    fn test_empty_target_stream_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let dirs    = prepare_output_dirs(&cfg.out_dir, false).unwrap();
        let handler = GraphHandler::new(&cfg, &dirs).unwrap();
        let data    = TrainData { train: dataset("train", 0), ..data() };
        let err = TrainUseCase::new(&cfg, &handler)
            .execute(&mut FakeSession::default(), &data)
            .unwrap_err();
        assert!(err.chain().any(|c| c.to_string().contains("exhausted")));
    }
}
