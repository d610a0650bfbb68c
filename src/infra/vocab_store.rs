// ============================================================
// Layer 6 - Vocabulary Store
// ============================================================
// Builds, saves and reloads the word vocabulary.
//
// The vocabulary is a HuggingFace word-level tokenizer written
// as JSON next to the checkpoints (<save_dir>/vocab.json), so a
// resumed run, a test run and a forward run all map words to the
// same ids the model was trained with.
//
// Ids are contiguous from 0 so each one is a row of the
// embedding matrix:
//
//   0 [PAD]  1 [UNK]  2 [CLS]  3 [SEP]  4 [NEWSQA]  5.. words
//
// A word gets its own id when it occurs more than
// `word_count_th` times or has a pretrained vector.
//
// Test and forward runs may extend a reloaded vocabulary with
// words that only have a pretrained vector in the evaluated
// split. Those get ids after the saved ones and are never
// written back to vocab.json.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokenizers::Tokenizer;

use crate::data::dataset::QaDataSet;
use crate::domain::batch::TARGET_DOMAIN_TAG;

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
pub const CLS_ID: u32 = 2;
pub const SEP_ID: u32 = 3;

const VOCAB_FILE: &str = "vocab.json";

fn special_tokens() -> [String; 5] {
    [
        "[PAD]".to_string(),
        "[UNK]".to_string(),
        "[CLS]".to_string(),
        "[SEP]".to_string(),
        tag_token(TARGET_DOMAIN_TAG),
    ]
}

/// Vocabulary entry used for a dataset-type tag
pub fn tag_token(tag: &str) -> String {
    format!("[{tag}]")
}

// ─── Vocab ────────────────────────────────────────────────────────────────────
/// Word-to-id lookup shared by batching and embedding construction.
#[derive(Clone)]
pub struct Vocab {
    tokenizer:  Tokenizer,
    lower_word: bool,
    /// Words appended after the saved vocabulary
    extra:      HashMap<String, u32>,
}

impl Vocab {
    fn new(tokenizer: Tokenizer, lower_word: bool) -> Self {
        Self { tokenizer, lower_word, extra: HashMap::new() }
    }

    /// Id of a context/question word, [UNK] when unknown
    pub fn word_id(&self, word: &str) -> u32 {
        let word = self.normalize(word);
        self.tokenizer
            .token_to_id(&word)
            .or_else(|| self.extra.get(&word).copied())
            .unwrap_or(UNK_ID)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.word_id(word) != UNK_ID
    }

    fn normalize(&self, word: &str) -> String {
        if self.lower_word { word.to_lowercase() } else { word.to_string() }
    }

    /// Append `words` that are not known yet, ids continuing after
    /// the current ones in the order given.
    pub fn with_extra_words(mut self, words: impl IntoIterator<Item = String>) -> Self {
        for word in words {
            let word = self.normalize(&word);
            if self.tokenizer.token_to_id(&word).is_some() || self.extra.contains_key(&word) {
                continue;
            }
            let id = self.size() as u32;
            self.extra.insert(word, id);
        }
        self
    }

    /// Size of the saved vocabulary, extra words excluded
    pub fn base_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Id of the special token standing for a dataset-type tag
    pub fn tag_id(&self, tag: &str) -> u32 {
        self.tokenizer.token_to_id(&tag_token(tag)).unwrap_or(UNK_ID)
    }

    pub fn size(&self) -> usize {
        self.base_size() + self.extra.len()
    }

    /// (word, id) pairs in id order
    pub fn entries(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<(String, u32)> = self
            .tokenizer
            .get_vocab(true)
            .into_iter()
            .chain(self.extra.iter().map(|(w, id)| (w.clone(), *id)))
            .collect();
        entries.sort_by_key(|(_, id)| *id);
        entries
    }
}

// ─── VocabStore ───────────────────────────────────────────────────────────────
pub struct VocabStore {
    dir: PathBuf,
}

impl VocabStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(VOCAB_FILE)
    }

    /// Reuse a saved vocabulary when `reuse` is set and one exists,
    /// otherwise build one from `datasets` and save it.
    pub fn load_or_build(
        &self,
        datasets:      &[&QaDataSet],
        lower_word:    bool,
        word_count_th: usize,
        reuse:         bool,
    ) -> Result<Vocab> {
        if reuse && self.path().exists() {
            tracing::info!("Loading vocabulary from '{}'", self.path().display());
            self.load(lower_word)
        } else {
            self.build_and_save(datasets, lower_word, word_count_th)
        }
    }

    pub fn load(&self, lower_word: bool) -> Result<Vocab> {
        let path = self.path();
        let tokenizer = Tokenizer::from_file(&path).map_err(|e| {
            anyhow::anyhow!(
                "Cannot load vocabulary from '{}': {}. Has a training run saved one?",
                path.display(),
                e
            )
        })?;
        Ok(Vocab::new(tokenizer, lower_word))
    }

    fn build_and_save(
        &self,
        datasets:      &[&QaDataSet],
        lower_word:    bool,
        word_count_th: usize,
    ) -> Result<Vocab> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let words = select_words(datasets, lower_word, word_count_th);

        // ── Vocab map: specials first, then words ─────────────────────────────
        let mut vocab = serde_json::Map::new();
        for (id, token) in special_tokens().iter().enumerate() {
            vocab.insert(token.clone(), serde_json::json!(id));
        }
        for word in &words {
            if !vocab.contains_key(word) {
                let id = vocab.len();
                vocab.insert(word.clone(), serde_json::json!(id));
            }
        }
        let size = vocab.len();

        let added_tokens: Vec<serde_json::Value> = special_tokens()
            .iter()
            .enumerate()
            .map(|(id, token)| {
                serde_json::json!({
                    "id": id, "content": token, "single_word": false,
                    "lstrip": false, "rstrip": false, "normalized": false, "special": true
                })
            })
            .collect();

        // HuggingFace tokenizer format, what Tokenizer::from_file expects
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "[UNK]"
            }
        });

        let path = self.path();
        std::fs::write(&path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write vocabulary '{}'", path.display()))?;
        tracing::info!("Vocabulary built with {} entries, saved to '{}'", size, path.display());

        self.load(lower_word)
    }
}

/// Words that earn their own id, most frequent first (ties by word).
fn select_words(datasets: &[&QaDataSet], lower_word: bool, word_count_th: usize) -> Vec<String> {
    let norm = |w: &str| if lower_word { w.to_lowercase() } else { w.to_string() };

    let mut counts: HashMap<String, usize> = HashMap::new();
    for ds in datasets {
        for ex in ds.examples() {
            for w in ex.context.iter().chain(ex.question.iter()) {
                *counts.entry(norm(w.as_str())).or_insert(0) += 1;
            }
        }
    }

    let has_vector = |w: &str| {
        datasets.iter().any(|ds| {
            let table = if lower_word { &ds.shared().lower_word2vec } else { &ds.shared().word2vec };
            table.contains_key(w)
        })
    };

    let mut words: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(w, c)| *c > word_count_th || has_vector(w.as_str()))
        .collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.into_iter().map(|(w, _)| w).collect()
}

/// True when `dir` already holds a saved vocabulary.
pub fn has_vocab(dir: &Path) -> bool {
    dir.join(VOCAB_FILE).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::SharedData;
    use crate::domain::example::QaExample;

    fn dataset() -> QaDataSet {
        let ex = |id: &str, ctx: &str| QaExample {
            id:       id.into(),
            context:  ctx.split(' ').map(String::from).collect(),
            question: vec!["Who".into()],
            answers:  Vec::new(),
        };
        let mut shared = SharedData::default();
        shared.lower_word2vec.insert("rare".into(), vec![0.0; 4]);
        QaDataSet::new("train", vec![ex("a", "The cat sat"), ex("b", "the cat rare")], shared)
    }

    #[test]
    fn test_build_then_lookup() {
        let tmp   = tempfile::tempdir().unwrap();
        let store = VocabStore::new(tmp.path());
        let ds    = dataset();
        let vocab = store.load_or_build(&[&ds], true, 1, false).unwrap();

        // "the"/"cat"/"who" occur twice, "rare" has a vector, "sat" is dropped
        assert_eq!(vocab.size(), 5 + 4);
        assert_eq!(vocab.word_id("sat"), UNK_ID);
        assert_ne!(vocab.word_id("The"), UNK_ID);
        assert_eq!(vocab.word_id("THE"), vocab.word_id("the"));
        assert_ne!(vocab.word_id("rare"), UNK_ID);
        assert_eq!(vocab.tag_id(TARGET_DOMAIN_TAG), 4);
        assert!(has_vocab(tmp.path()));
    }

    #[test]
    fn test_saved_vocab_is_reused() {
        let tmp   = tempfile::tempdir().unwrap();
        let store = VocabStore::new(tmp.path());
        let ds    = dataset();
        let built = store.load_or_build(&[&ds], true, 1, false).unwrap();

        let empty    = QaDataSet::new("test", Vec::new(), SharedData::default());
        let reloaded = store.load_or_build(&[&empty], true, 1, true).unwrap();
        assert_eq!(reloaded.entries(), built.entries());
    }

    #[test]
    fn test_extra_words_follow_saved_ids() {
        let tmp   = tempfile::tempdir().unwrap();
        let ds    = dataset();
        let vocab = VocabStore::new(tmp.path()).load_or_build(&[&ds], true, 1, false).unwrap();
        let base  = vocab.size();
        assert_eq!(vocab.word_id("lion"), UNK_ID);

        let vocab = vocab.with_extra_words(["Lion".to_string(), "cat".to_string(), "tiger".to_string()]);
        assert_eq!(vocab.base_size(), base);
        assert_eq!(vocab.size(), base + 2);
        assert_eq!(vocab.word_id("lion"), base as u32);
        assert_eq!(vocab.word_id("TIGER"), base as u32 + 1);
        assert!(vocab.contains("cat"));
        let ids: Vec<u32> = vocab.entries().into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, (0..vocab.size() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_entries_are_contiguous() {
        let tmp   = tempfile::tempdir().unwrap();
        let ds    = dataset();
        let vocab = VocabStore::new(tmp.path()).load_or_build(&[&ds], true, 0, false).unwrap();
        let ids: Vec<u32> = vocab.entries().into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, (0..vocab.size() as u32).collect::<Vec<_>>());
    }
}
