// ============================================================
// Layer 4 - Dataset Loader
// ============================================================
// Reads one split of a pre-tokenised dataset from a directory:
//
//   <data_dir>/data_<data_type>.json     (required)
//     { "examples": [ { "id", "context", "question", "answers" } ] }
//
//   <data_dir>/shared_<data_type>.json   (optional)
//     { "word2vec": { word: [f32] }, "lower_word2vec": { word: [f32] } }
//
// The shared file carries pretrained word vectors used to seed
// the embedding matrix. Splits without it simply get random
// vectors for every word.
//
// Training data goes through a DataFilter that drops examples
// the model cannot learn from (too long, or no answer). Dev,
// test and forward splits are read as they are.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::data::{
    dataset::{QaDataSet, SharedData},
    preprocessor::Preprocessor,
};
use crate::domain::{config::RunConfig, example::QaExample};

#[derive(Deserialize)]
struct DataFile {
    examples: Vec<QaExample>,
}

#[derive(Deserialize, Default)]
struct SharedFile {
    #[serde(default)]
    word2vec: HashMap<String, Vec<f32>>,
    #[serde(default)]
    lower_word2vec: HashMap<String, Vec<f32>>,
}

// ─── DataFilter ───────────────────────────────────────────────────────────────
/// Size limits applied to training examples.
#[derive(Debug, Clone, Copy)]
pub struct DataFilter {
    pub para_size_th: usize,
    pub ques_size_th: usize,
}

impl DataFilter {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            para_size_th: config.para_size_th,
            ques_size_th: config.ques_size_th,
        }
    }

    /// Keep examples that fit the model and have a usable gold span
    pub fn keep(&self, ex: &QaExample) -> bool {
        ex.context.len() <= self.para_size_th
            && ex.question.len() <= self.ques_size_th
            && ex.gold().is_some_and(|a| a.fits(ex.context.len()))
    }
}

// ─── DatasetLoader ────────────────────────────────────────────────────────────
pub struct DatasetLoader {
    dir: PathBuf,
}

impl DatasetLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load split `data_type`, optionally filtering its examples.
    pub fn load(&self, data_type: &str, filter: Option<&DataFilter>) -> Result<QaDataSet> {
        let data_path = self.dir.join(format!("data_{data_type}.json"));
        let raw = fs::read_to_string(&data_path)
            .with_context(|| format!("Cannot read dataset '{}'", data_path.display()))?;
        let file: DataFile = serde_json::from_str(&raw)
            .with_context(|| format!("Cannot parse dataset '{}'", data_path.display()))?;

        let prep  = Preprocessor::new();
        let total = file.examples.len();
        let examples: Vec<QaExample> = file
            .examples
            .into_iter()
            .map(|mut ex| {
                for token in ex.context.iter_mut().chain(ex.question.iter_mut()) {
                    *token = prep.clean(token);
                }
                for answer in &mut ex.answers {
                    answer.text = prep.clean(&answer.text);
                }
                ex
            })
            .filter(|ex| filter.map_or(true, |f| f.keep(ex)))
            .collect();

        if examples.len() < total {
            tracing::info!(
                "Filtered '{}': kept {}/{} examples",
                data_type,
                examples.len(),
                total
            );
        }

        let shared = load_shared(&self.dir.join(format!("shared_{data_type}.json")))?;
        tracing::info!(
            "Loaded {} '{}' examples from '{}' ({} pretrained vectors)",
            examples.len(),
            data_type,
            self.dir.display(),
            shared.word2vec.len()
        );

        Ok(QaDataSet::new(data_type, examples, shared))
    }
}

fn load_shared(path: &Path) -> Result<SharedData> {
    if !path.exists() {
        tracing::debug!("No shared file at '{}'", path.display());
        return Ok(SharedData::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Cannot read shared data '{}'", path.display()))?;
    let file: SharedFile = serde_json::from_str(&raw)
        .with_context(|| format!("Cannot parse shared data '{}'", path.display()))?;
    Ok(SharedData {
        word2vec:       file.word2vec,
        lower_word2vec: file.lower_word2vec,
    })
}

/// Convenience wrapper used by the use cases.
pub fn read_data(dir: &Path, data_type: &str, filter: Option<&DataFilter>) -> Result<QaDataSet> {
    DatasetLoader::new(dir).load(data_type, filter)
}
