// ============================================================
// Layer 6 - Result Dumper
// ============================================================
// Writes error-analysis files for the examples where the model
// had a much better answer among its candidates than the one it
// predicted (best_f1 - predicted_f1 > f1_thres).
//
// One line per selected example, same order in every file:
//
//   paragraphs.txt            context, trailing \r\n stripped
//   predicted_answers.txt
//   best_answers.txt
//   best_f1_scores.txt
//   predicted_f1_scores.txt
//   questions.txt
//   gold_answers.txt          all gold answers, tab separated
//
// plus f1_score_comparison.txt with a single line
//
//   PREDICTED <mean> BEST <mean> NUM_SAMPLES <selected> NUM_TOTAL <all>
//
// where both means run over every example, selected or not.
// Line breaks and tabs inside a field become spaces so the files
// stay line-aligned.

use anyhow::{Context, Result};
use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};

use crate::domain::evaluation::ExampleRecord;

pub const DEFAULT_F1_THRES: f64 = 0.1;

/// Write `lines` to `path`, one per line.
pub fn save_lines<S: AsRef<str>>(lines: &[S], path: &Path) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Cannot create '{}'", path.display()))?;
    let mut w = BufWriter::new(file);
    for line in lines {
        writeln!(w, "{}", line.as_ref())?;
    }
    w.flush()?;
    Ok(())
}

/// Write each group of fields on one line, separated by tabs.
pub fn save_tabbed_lines<S: AsRef<str>>(rows: &[Vec<S>], path: &Path) -> Result<()> {
    let lines: Vec<String> = rows
        .iter()
        .map(|row| row.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join("\t"))
        .collect();
    save_lines(&lines, path)
}

/// Summary of one dump, mirrors f1_score_comparison.txt
#[derive(Debug, Clone, PartialEq)]
pub struct DumpSummary {
    pub mean_predicted_f1: f64,
    pub mean_best_f1:      f64,
    pub num_samples:       usize,
    pub num_total:         usize,
}

impl DumpSummary {
    fn line(&self) -> String {
        format!(
            "PREDICTED {} BEST {} NUM_SAMPLES {} NUM_TOTAL {}",
            self.mean_predicted_f1, self.mean_best_f1, self.num_samples, self.num_total
        )
    }
}

pub fn save_batch_results(records: &[ExampleRecord], dir: &Path, f1_thres: f64) -> Result<DumpSummary> {
    fs::create_dir_all(dir).with_context(|| format!("Cannot create '{}'", dir.display()))?;

    let selected: Vec<&ExampleRecord> = records
        .iter()
        .filter(|r| r.best_f1 - r.predicted_f1 > f1_thres)
        .collect();

    let one_line = |s: &str| s.trim_end_matches(['\r', '\n']).replace(['\r', '\n', '\t'], " ");

    let paragraphs: Vec<String> = selected.iter().map(|r| one_line(r.paragraph.as_str())).collect();
    let predicted:  Vec<String> = selected.iter().map(|r| one_line(r.predicted_answer.as_str())).collect();
    let best:       Vec<String> = selected.iter().map(|r| one_line(r.best_answer.as_str())).collect();
    let best_f1:    Vec<String> = selected.iter().map(|r| r.best_f1.to_string()).collect();
    let pred_f1:    Vec<String> = selected.iter().map(|r| r.predicted_f1.to_string()).collect();
    let golds: Vec<Vec<String>> = selected
        .iter()
        .map(|r| r.gold_answers.iter().map(|a| one_line(a.as_str())).collect())
        .collect();
    let questions: Vec<Vec<String>> = selected.iter().map(|r| vec![one_line(r.question.as_str())]).collect();

    let mean = |f: fn(&ExampleRecord) -> f64| {
        if records.is_empty() {
            0.0
        } else {
            records.iter().map(f).sum::<f64>() / records.len() as f64
        }
    };
    let summary = DumpSummary {
        mean_predicted_f1: mean(|r| r.predicted_f1),
        mean_best_f1:      mean(|r| r.best_f1),
        num_samples:       selected.len(),
        num_total:         records.len(),
    };

    save_lines(&[summary.line()], &dir.join("f1_score_comparison.txt"))?;
    save_lines(&best_f1, &dir.join("best_f1_scores.txt"))?;
    save_lines(&pred_f1, &dir.join("predicted_f1_scores.txt"))?;
    save_lines(&best, &dir.join("best_answers.txt"))?;
    save_lines(&predicted, &dir.join("predicted_answers.txt"))?;
    save_lines(&paragraphs, &dir.join("paragraphs.txt"))?;
    save_tabbed_lines(&golds, &dir.join("gold_answers.txt"))?;
    save_tabbed_lines(&questions, &dir.join("questions.txt"))?;

    tracing::info!(
        "Error analysis: {} of {} examples written to '{}'",
        summary.num_samples,
        summary.num_total,
        dir.display()
    );
    Ok(summary)
}
