// ============================================================
// Layer 6 - Graph Handler
// ============================================================
// Everything a run persists besides the raw outputs of the
// result dumper goes through here:
//
//   <out_dir>/config.json           the config the run used
//   <save_dir>/<model>-<step>.mpk   model weights (CompactRecorder,
//                                   extension added by the recorder)
//   <save_dir>/checkpoint.json      step of the latest save
//   <log_dir>/summaries.csv         scalar summaries
//   <eval_dir>/<type>-<step>.json   dumped EvalResults
//   <answer_dir>/<type>-<step>.json dumped {id: answer} maps
//
// The model weights themselves are written by the Session, the
// handler only decides where they go and keeps the pointer to
// the latest one up to date.

use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::{
    config::RunConfig,
    evaluation::{EvalResult, Summary},
    traits::Session,
};
use crate::infra::{dirs::RunDirs, metrics::SummaryWriter};

const LATEST_FILE: &str = "checkpoint.json";
const CONFIG_FILE: &str = "config.json";

pub struct GraphHandler {
    config: RunConfig,
    dirs:   RunDirs,
    writer: SummaryWriter,
}

impl GraphHandler {
    pub fn new(config: &RunConfig, dirs: &RunDirs) -> Result<Self> {
        let writer = SummaryWriter::new(&dirs.log_dir)?;
        Ok(Self { config: config.clone(), dirs: dirs.clone(), writer })
    }

    /// Record the config and, when loading, restore the requested
    /// checkpoint (`load_step`, or the latest one saved).
    pub fn initialize(&self, session: &mut impl Session) -> Result<()> {
        write_json(&self.dirs.out_dir.join(CONFIG_FILE), &self.config)?;

        if self.config.load {
            let step = match self.config.load_step {
                Some(step) => step,
                None => self.latest_step()?.with_context(|| {
                    format!(
                        "'load' is set but '{}' has no {}. Has a training run saved a checkpoint?",
                        self.dirs.save_dir.display(),
                        LATEST_FILE
                    )
                })?,
            };
            session.load_checkpoint(&self.checkpoint_path(step), step)?;
        }
        Ok(())
    }

    /// Weights path for `step`, without the recorder's extension
    pub fn checkpoint_path(&self, step: usize) -> PathBuf {
        self.dirs.save_dir.join(format!("{}-{}", self.config.model_name, step))
    }

    /// Step of the most recent save, if any
    pub fn latest_step(&self) -> Result<Option<usize>> {
        let path = self.dirs.save_dir.join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        Ok(Some(serde_json::from_str::<usize>(&s)?))
    }

    /// Persist the session under `step`, the loop's global step.
    pub fn save(&self, session: &impl Session, step: usize) -> Result<()> {
        session.save_checkpoint(&self.checkpoint_path(step))?;

        let latest = self.dirs.save_dir.join(LATEST_FILE);
        fs::write(&latest, serde_json::to_string(&step)?)
            .with_context(|| format!("Failed to write '{}'", latest.display()))?;
        tracing::info!("Saved checkpoint at step {}", step);
        Ok(())
    }

    pub fn add_summary(&self, summary: &Summary, step: usize) -> Result<()> {
        self.writer.write(step, std::slice::from_ref(summary))
    }

    pub fn add_summaries(&self, summaries: &[Summary], step: usize) -> Result<()> {
        self.writer.write(step, summaries)
    }

    /// Write the whole result as JSON. Returns where it went.
    pub fn dump_eval(&self, e: &EvalResult, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.dirs.eval_dir.join(result_file_name(e)));
        write_json(&path, e)?;
        tracing::debug!("Dumped eval to '{}'", path.display());
        Ok(path)
    }

    /// Write the {id: answer} map as JSON. Returns where it went.
    pub fn dump_answer(&self, e: &EvalResult, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.dirs.answer_dir.join(result_file_name(e)));
        write_json(&path, &e.answers)?;
        tracing::debug!("Dumped answers to '{}'", path.display());
        Ok(path)
    }

    pub fn dirs(&self) -> &RunDirs {
        &self.dirs
    }
}

/// "<data_type>-<step:06>", shared by file and directory names
pub fn result_stem(e: &EvalResult) -> String {
    format!("{}-{:06}", e.data_type, e.global_step)
}

fn result_file_name(e: &EvalResult) -> String {
    format!("{}.json", result_stem(e))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create '{}'", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::dirs::prepare_output_dirs;
    use std::cell::RefCell;

    /// Records what the handler asked of it
    #[derive(Default)]
    struct FakeSession {
        step:   usize,
        saved:  RefCell<Vec<PathBuf>>,
        loaded: Vec<(PathBuf, usize)>,
    }

    impl Session for FakeSession {
        fn global_step(&self) -> usize {
            self.step
        }

        fn save_checkpoint(&self, path: &Path) -> Result<()> {
            self.saved.borrow_mut().push(path.to_path_buf());
            Ok(())
        }

        fn load_checkpoint(&mut self, path: &Path, global_step: usize) -> Result<()> {
            self.loaded.push((path.to_path_buf(), global_step));
            self.step = global_step;
            Ok(())
        }
    }

    fn handler(out: &Path, config: RunConfig) -> GraphHandler {
        let dirs = prepare_output_dirs(out, config.load).unwrap();
        GraphHandler::new(&config, &dirs).unwrap()
    }

    #[test]
    fn test_save_then_resume_from_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");

        let h = handler(&out, RunConfig::default());
        let session = FakeSession { step: 30, ..FakeSession::default() };
        h.initialize(&mut FakeSession::default()).unwrap();
        h.save(&session, session.global_step()).unwrap();
        assert_eq!(session.saved.borrow()[0], out.join("save").join("basic-30"));
        assert!(out.join("config.json").exists());

        let h = handler(&out, RunConfig { load: true, ..RunConfig::default() });
        let mut resumed = FakeSession::default();
        h.initialize(&mut resumed).unwrap();
        assert_eq!(resumed.loaded, vec![(out.join("save").join("basic-30"), 30)]);
        assert_eq!(resumed.global_step(), 30);
    }

    #[test]
    fn test_explicit_load_step_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let h = handler(tmp.path(), RunConfig { load: true, load_step: Some(7), ..RunConfig::default() });
        let mut s = FakeSession::default();
        h.initialize(&mut s).unwrap();
        assert_eq!(s.loaded[0].1, 7);
    }

    #[test]
    fn test_load_without_checkpoint_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let h = handler(tmp.path(), RunConfig { load: true, ..RunConfig::default() });
        assert!(h.initialize(&mut FakeSession::default()).is_err());
    }

    #[test]
    fn test_dump_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let h   = handler(tmp.path(), RunConfig::default());
        let mut e = EvalResult::empty("dev", 42);
        e.answers.insert("q1".into(), "paris".into());

        let eval_path = h.dump_eval(&e, None).unwrap();
        assert_eq!(eval_path, tmp.path().join("eval").join("dev-000042.json"));

        let answer_path = h.dump_answer(&e, None).unwrap();
        let text = fs::read_to_string(answer_path).unwrap();
        let back: std::collections::BTreeMap<String, String> = serde_json::from_str(&text).unwrap();
        assert_eq!(back["q1"], "paris");

        let explicit = tmp.path().join("custom").join("answers.json");
        assert_eq!(h.dump_answer(&e, Some(&explicit)).unwrap(), explicit);
        assert!(explicit.exists());
    }
}
