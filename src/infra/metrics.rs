// ============================================================
// Layer 6 - Summary Writer
// ============================================================
// Appends scalar summaries to a CSV file, one row per value:
//
//   step,tag,value
//   100,loss,0.734512
//   1000,dev/f1,0.412300
//   1000,dev/em,0.301000
//
// Output file: <log_dir>/summaries.csv
//
// A resumed run appends to the existing file, so the curve of
// one model stays in one place across restarts.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::evaluation::Summary;

const SUMMARY_FILE: &str = "summaries.csv";

pub struct SummaryWriter {
    csv_path: PathBuf,
}

impl SummaryWriter {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Cannot create '{}'", log_dir.display()))?;

        let csv_path = log_dir.join(SUMMARY_FILE);
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "step,tag,value")?;
            tracing::debug!("Created summary CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append all `summaries` for `step`
    pub fn write(&self, step: usize, summaries: &[Summary]) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        for s in summaries {
            writeln!(f, "{},{},{:.6}", step, s.tag, s.value)?;
        }
        tracing::debug!("Logged {} summaries at step {}", summaries.len(), step);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_appended_after_header() {
        let tmp = tempfile::tempdir().unwrap();
        let w   = SummaryWriter::new(tmp.path()).unwrap();
        w.write(5, &[Summary::new("loss", 0.5)]).unwrap();
        w.write(10, &[Summary::new("dev/f1", 0.25), Summary::new("dev/em", 0.0)]).unwrap();

        let text = fs::read_to_string(w.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            "step,tag,value",
            "5,loss,0.500000",
            "10,dev/f1,0.250000",
            "10,dev/em,0.000000",
        ]);
    }

    #[test]
    fn test_reopening_keeps_previous_rows() {
        let tmp = tempfile::tempdir().unwrap();
        SummaryWriter::new(tmp.path()).unwrap().write(1, &[Summary::new("loss", 1.0)]).unwrap();
        let w = SummaryWriter::new(tmp.path()).unwrap();
        w.write(2, &[Summary::new("loss", 2.0)]).unwrap();
        assert_eq!(fs::read_to_string(w.csv_path()).unwrap().lines().count(), 3);
    }
}
