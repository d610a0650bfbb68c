// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// The binary takes exactly one argument: the path of a JSON run
// configuration. Everything else (mode, directories, schedule,
// model size) lives in that file.
//
//   bidaf-runner configs/newsqa_train.json
//
// All real work is delegated to Layer 2 (application).
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::domain::config::RunConfig;

/// The main CLI struct. clap generates the parser from the fields.
#[derive(Parser, Debug)]
#[command(
    name = "bidaf-runner",
    version = "0.1.0",
    about = "Train, test or run a span-extraction QA model from a JSON run config."
)]
pub struct Cli {
    /// Path to the run configuration (JSON)
    pub config_path: PathBuf,
}

impl Cli {
    /// Load the config and dispatch on its mode and device.
    pub fn run(self) -> Result<()> {
        let config = RunConfig::from_file(&self.config_path)
            .with_context(|| format!("Invalid run configuration '{}'", self.config_path.display()))?;
        tracing::info!("Loaded config '{}' (mode={})", self.config_path.display(), config.mode);
        commands::dispatch(config)
    }
}
