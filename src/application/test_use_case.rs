// ============================================================
// Layer 2 - TestUseCase
// ============================================================
// One full pass over the test split with a restored model:
//
//   Step 1: restore the checkpoint            (GraphHandler)
//   Step 2: ceil(n / (batch_size * num_gpus)) multi-batches
//   Step 3: tag shards with [NEWSQA] if special tokens are on
//   Step 4: evaluate each multi-batch and merge the results
//           vis: also dump each batch's result to
//           <eval_dir>/<type>-<step:06>/<first idx:08>
//   Step 5: dump answers / eval / error analysis

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::application::schedule::{eval_steps, progress_bar};
use crate::data::dataset::{BatchOrder, QaDataSet};
use crate::domain::{
    batch::{tag_shards, TARGET_DOMAIN_TAG},
    config::RunConfig,
    evaluation::EvalResult,
    traits::{Evaluator, Session},
};
use crate::infra::{
    checkpoint::{result_stem, GraphHandler},
    dump::save_batch_results,
};

pub struct TestUseCase<'a> {
    config:  &'a RunConfig,
    handler: &'a GraphHandler,
}

impl<'a> TestUseCase<'a> {
    pub fn new(config: &'a RunConfig, handler: &'a GraphHandler) -> Self {
        Self { config, handler }
    }

    pub fn execute<S>(&self, session: &mut S, test: &QaDataSet) -> Result<EvalResult>
    where
        S: Session + Evaluator,
    {
        let cfg = self.config;
        self.handler.initialize(session)?;

        let num_steps = eval_steps(test.num_examples(), cfg.batch_size, cfg.num_gpus, 0);
        let order     = BatchOrder { shuffle: false, cluster: cfg.cluster, seed: cfg.seed };
        tracing::info!("Testing on {} examples in {} steps", test.num_examples(), num_steps);

        let pb = progress_bar(num_steps, test.data_type());
        let mut total: Option<EvalResult> = None;
        for mut multi_batch in test.get_multi_batches(cfg.batch_size, cfg.num_gpus, num_steps, order) {
            if cfg.use_special_token {
                tag_shards(&mut multi_batch, TARGET_DOMAIN_TAG);
            }
            let ei = session.evaluate(&multi_batch)?;
            if cfg.vis {
                self.dump_vis(&ei)?;
            }
            total = Some(match total {
                None => ei,
                Some(acc) => acc + ei,
            });
            pb.inc(1);
        }
        pb.finish_and_clear();

        let e = total.unwrap_or_else(|| EvalResult::empty(test.data_type(), session.global_step()));
        tracing::info!("{}", e);

        if cfg.dump_answer {
            tracing::info!("Dumping answers ...");
            self.handler.dump_answer(&e, None)?;
        }
        if cfg.dump_eval {
            tracing::info!("Dumping eval ...");
            self.handler.dump_eval(&e, None)?;
        }
        if cfg.dump_error_analysis {
            save_batch_results(&e.records, &self.error_dir(), cfg.error_f1_thres)?;
        }
        Ok(e)
    }

    fn dump_vis(&self, ei: &EvalResult) -> Result<()> {
        let Some(first) = ei.idxs.first() else { return Ok(()) };
        let subdir = self.handler.dirs().eval_dir.join(result_stem(ei));
        fs::create_dir_all(&subdir)
            .with_context(|| format!("Cannot create '{}'", subdir.display()))?;
        self.handler.dump_eval(ei, Some(&subdir.join(format!("{first:08}"))))?;
        Ok(())
    }

    /// error_dir from the config, else <out_dir>/error_results_k=<k>
    pub fn error_dir(&self) -> PathBuf {
        self.config
            .error_dir
            .clone()
            .unwrap_or_else(|| self.config.out_dir.join(format!("error_results_k={}", self.config.k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::tests::{dataset, FakeSession};
    use crate::infra::dirs::prepare_output_dirs;
    use std::path::Path;

    fn config(out: &Path) -> RunConfig {
        RunConfig {
            mode:        crate::domain::config::Mode::Test,
            out_dir:     out.to_path_buf(),
            load:        true,
            load_step:   Some(40),
            batch_size:  3,
            num_gpus:    2,
            ..RunConfig::default()
        }
    }

    fn run(cfg: &RunConfig, n: usize) -> (FakeSession, EvalResult) {
        let dirs    = prepare_output_dirs(&cfg.out_dir, cfg.load).unwrap();
        let handler = GraphHandler::new(cfg, &dirs).unwrap();
        let mut s   = FakeSession::default();
        let e = TestUseCase::new(cfg, &handler).execute(&mut s, &dataset("test", n)).unwrap();
        (s, e)
    }

    #[test]
    fn test_single_pass_covers_every_example() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let (s, e) = run(&cfg, 11);

        // ceil(11 / 6) = 2 multi-batches of 2 shards each
        assert_eq!(s.evaluations.borrow().len(), 2);
        assert_eq!(e.num_examples, 11);
        assert_eq!(e.idxs, (0..11).collect::<Vec<_>>());
        assert_eq!(e.global_step, 40);
        assert!(tmp.path().join("answer").join("test-000040.json").exists());
        assert!(tmp.path().join("eval").join("test-000040.json").exists());
    }

    #[test]
    fn test_vis_dumps_each_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = RunConfig { vis: true, ..config(tmp.path()) };
        run(&cfg, 11);

        let subdir = tmp.path().join("eval").join("test-000040");
        assert!(subdir.join("00000000").exists());
        assert!(subdir.join("00000006").exists());
    }

    #[test]
    fn test_error_analysis_goes_to_default_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = RunConfig { dump_error_analysis: true, k: 3, ..config(tmp.path()) };
        run(&cfg, 4);
        let dir = tmp.path().join("error_results_k=3");
        assert!(dir.join("f1_score_comparison.txt").exists());
        assert!(dir.join("gold_answers.txt").exists());
    }

    #[test]
    fn test_empty_split_yields_empty_result() {
        let tmp = tempfile::tempdir().unwrap();
        let (s, e) = run(&config(tmp.path()), 0);
        assert!(s.evaluations.borrow().is_empty());
        assert_eq!(e.num_examples, 0);
        assert_eq!(e.data_type, "test");
    }
}
