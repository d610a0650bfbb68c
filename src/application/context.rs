// ============================================================
// Layer 2 - Run Context
// ============================================================
// Values derived once from the config and the loaded data, then
// shared read-only by the rest of the run:
//
//   dirs     <out_dir>/{save,log,eval,answer}
//   vocab    word ids (reused from save_dir when loading)
//   emb_mat  one row per vocab id: the pretrained vector when the
//            word has one, otherwise a standard normal sample
//
// With `use_glove_for_unk`, test and forward runs append every
// word of the evaluated split's pretrained table that the saved
// vocabulary lacks. Their rows go to `unk_emb_mat`, kept apart
// from `emb_mat` because checkpoints only hold the trained rows.
//
// The config itself is never modified; sizes the model needs
// (vocab size, sequence length) are read from here instead.

use anyhow::Result;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

use crate::data::{batcher::max_seq_len, dataset::QaDataSet};
use crate::domain::{
    config::{Mode, RunConfig},
    error::DataError,
};
use crate::infra::{
    dirs::RunDirs,
    vocab_store::{Vocab, VocabStore},
};
use crate::ml::{model::QaSpanConfig, trainer::SessionSettings};

pub struct RunContext {
    pub config:  RunConfig,
    pub dirs:    RunDirs,
    pub vocab:   Vocab,
    /// Row-major, vocab.base_size() x word_emb_size
    pub emb_mat: Vec<f32>,
    /// Rows for ids past the saved vocabulary, same layout
    pub unk_emb_mat: Vec<f32>,
}

impl RunContext {
    /// Build or reload the vocabulary over `datasets` and assemble
    /// the embedding matrix.
    pub fn resolve(config: RunConfig, dirs: RunDirs, datasets: &[&QaDataSet]) -> Result<Self> {
        let mut vocab = VocabStore::new(&dirs.save_dir).load_or_build(
            datasets,
            config.lower_word,
            config.word_count_th,
            config.load,
        )?;
        if config.use_glove_for_unk && config.mode != Mode::Train {
            let words = unk_glove_words(&vocab, datasets, config.lower_word);
            tracing::info!("{} words outside the vocabulary get pretrained vectors", words.len());
            vocab = vocab.with_extra_words(words);
        }
        let mut emb_mat = build_emb_mat(&vocab, datasets, &config)?;
        let unk_emb_mat = emb_mat.split_off(vocab.base_size() * config.word_emb_size);
        Ok(Self { config, dirs, vocab, emb_mat, unk_emb_mat })
    }

    pub fn model_config(&self) -> QaSpanConfig {
        let c = &self.config;
        QaSpanConfig::new(
            self.vocab.base_size(),
            max_seq_len(c.ques_size_th, c.para_size_th),
            c.word_emb_size,
            c.hidden_size,
            c.num_heads,
            c.num_layers,
            c.d_ff,
            c.dropout,
        )
    }

    pub fn session_settings(&self) -> SessionSettings {
        let c = &self.config;
        SessionSettings {
            learning_rate:  c.init_lr,
            margin:         c.margin,
            ques_size_th:   c.ques_size_th,
            para_size_th:   c.para_size_th,
            max_answer_len: c.max_answer_len,
            num_candidates: c.num_candidates,
        }
    }
}

/// Pretrained-table words the vocabulary has no id for, sorted.
fn unk_glove_words(vocab: &Vocab, datasets: &[&QaDataSet], lower_word: bool) -> Vec<String> {
    let mut words: Vec<String> = datasets
        .iter()
        .flat_map(|ds| {
            let table = if lower_word { &ds.shared().lower_word2vec } else { &ds.shared().word2vec };
            table.keys()
        })
        .filter(|w| !vocab.contains(w.as_str()))
        .cloned()
        .collect();
    words.sort();
    words.dedup();
    words
}

fn build_emb_mat(vocab: &Vocab, datasets: &[&QaDataSet], config: &RunConfig) -> Result<Vec<f32>> {
    let dim = config.word_emb_size;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut emb_mat = Vec::with_capacity(vocab.size() * dim);
    let mut pretrained = 0usize;

    for (word, _) in vocab.entries() {
        let vector = datasets.iter().find_map(|ds| {
            let table = if config.lower_word { &ds.shared().lower_word2vec } else { &ds.shared().word2vec };
            table.get(&word)
        });
        match vector {
            Some(v) if v.len() != dim => {
                return Err(DataError::VectorSize { word, found: v.len(), expected: dim }.into());
            }
            Some(v) => {
                emb_mat.extend_from_slice(v);
                pretrained += 1;
            }
            None => emb_mat.extend((0..dim).map(|_| {
                let x: f32 = StandardNormal.sample(&mut rng);
                x
            })),
        }
    }

    tracing::info!("{}/{} unique words have pretrained vectors", pretrained, vocab.size());
    Ok(emb_mat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::SharedData;
    use crate::domain::example::QaExample;

    fn dataset(vec_len: usize) -> QaDataSet {
        let mut shared = SharedData::default();
        shared.lower_word2vec.insert("cat".into(), vec![0.5; vec_len]);
        let ex = QaExample {
            id:       "a".into(),
            context:  vec!["cat".into(), "dog".into()],
            question: vec!["who".into()],
            answers:  Vec::new(),
        };
        QaDataSet::new("train", vec![ex], shared)
    }

    fn config() -> RunConfig {
        RunConfig { word_emb_size: 4, word_count_th: 0, ..RunConfig::default() }
    }

    #[test]
    fn test_pretrained_rows_are_copied() {
        let tmp = tempfile::tempdir().unwrap();
        let ds  = dataset(4);
        let ctx = RunContext::resolve(config(), RunDirs::new(tmp.path()), &[&ds]).unwrap();

        assert_eq!(ctx.emb_mat.len(), ctx.vocab.size() * 4);
        let row = ctx.vocab.word_id("cat") as usize;
        assert_eq!(&ctx.emb_mat[row * 4..row * 4 + 4], &[0.5; 4]);
        assert_eq!(ctx.model_config().vocab_size, ctx.vocab.size());
    }

    #[test]
    fn test_same_seed_same_matrix() {
        let tmp = tempfile::tempdir().unwrap();
        let ds  = dataset(4);
        let a = RunContext::resolve(config(), RunDirs::new(tmp.path()), &[&ds]).unwrap();
        let b = RunContext::resolve(config(), RunDirs::new(tmp.path()), &[&ds]).unwrap();
        assert_eq!(a.emb_mat, b.emb_mat);
    }

    #[test]
    fn test_glove_words_extend_a_reloaded_vocab() {
        let tmp  = tempfile::tempdir().unwrap();
        let dirs = RunDirs::new(tmp.path());
        let trained = RunContext::resolve(config(), dirs.clone(), &[&dataset(4)]).unwrap();
        let base    = trained.vocab.size();
        assert!(trained.unk_emb_mat.is_empty());

        let mut shared = SharedData::default();
        shared.lower_word2vec.insert("lion".into(), vec![0.25; 4]);
        shared.lower_word2vec.insert("cat".into(), vec![0.5; 4]);
        let ex = QaExample {
            id:       "t".into(),
            context:  vec!["Lion".into(), "cat".into()],
            question: vec!["who".into()],
            answers:  Vec::new(),
        };
        let test = QaDataSet::new("test", vec![ex], shared);
        let test_config = RunConfig { mode: Mode::Test, load: true, ..config() };

        let ctx = RunContext::resolve(test_config.clone(), dirs.clone(), &[&test]).unwrap();
        assert_eq!(ctx.vocab.word_id("Lion"), base as u32);
        assert_eq!(ctx.model_config().vocab_size, base);
        assert_eq!(ctx.emb_mat.len(), base * 4);
        assert_eq!(ctx.unk_emb_mat, vec![0.25f32; 4]);

        let off = RunConfig { use_glove_for_unk: false, ..test_config };
        let ctx = RunContext::resolve(off, dirs, &[&test]).unwrap();
        assert_eq!(ctx.vocab.word_id("Lion"), crate::infra::vocab_store::UNK_ID);
        assert!(ctx.unk_emb_mat.is_empty());
    }

    #[test]
    fn test_wrong_vector_size_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let ds  = dataset(3);
        let err = RunContext::resolve(config(), RunDirs::new(tmp.path()), &[&ds]).err().unwrap();
        assert!(matches!(err.downcast_ref::<DataError>(), Some(DataError::VectorSize { .. })));
    }
}
