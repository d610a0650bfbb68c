// ============================================================
// Layer 6 - Output Directories
// ============================================================
// Every run writes under one output directory:
//
//   <out_dir>/
//     save/     checkpoints, vocab.json, checkpoint.json
//     log/      summaries.csv
//     eval/     dumped EvalResults
//     answer/   dumped answers
//
// A fresh run (load == false) starts from an empty out_dir:
// anything already there is removed first. A resumed or test
// run keeps the existing contents.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Paths derived from the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirs {
    pub out_dir:    PathBuf,
    pub save_dir:   PathBuf,
    pub log_dir:    PathBuf,
    pub eval_dir:   PathBuf,
    pub answer_dir: PathBuf,
}

impl RunDirs {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        let out_dir = out_dir.into();
        Self {
            save_dir:   out_dir.join("save"),
            log_dir:    out_dir.join("log"),
            eval_dir:   out_dir.join("eval"),
            answer_dir: out_dir.join("answer"),
            out_dir,
        }
    }
}

/// Create the four output subdirectories, wiping `out_dir`
/// first unless `load` is set.
pub fn prepare_output_dirs(out_dir: &Path, load: bool) -> Result<RunDirs> {
    if !load && out_dir.exists() {
        tracing::info!("Removing previous output in '{}'", out_dir.display());
        fs::remove_dir_all(out_dir)
            .with_context(|| format!("Cannot remove '{}'", out_dir.display()))?;
    }

    let dirs = RunDirs::new(out_dir);
    for dir in [&dirs.save_dir, &dirs.log_dir, &dirs.eval_dir, &dirs.answer_dir] {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
    }
    Ok(dirs)
}
