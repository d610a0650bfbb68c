// ============================================================
// Layer 3 - Run Configuration
// ============================================================
// Every knob of a run lives in one JSON file passed on the
// command line. It is read exactly once, validated, and then
// never mutated: values derived later (output directories,
// vocabulary, embedding matrix) live in a separate RunContext.
//
// Missing keys fall back to the defaults below through
// #[serde(default)], so a config only has to name what differs.
// The one exception is `mode`: it must always be given.
//
// Example:
//   {
//     "mode": "train",
//     "data_dir": "data/newsqa",
//     "baseline_dir": "data/squad",
//     "out_dir": "out/newsqa",
//     "k": 4,
//     "sup_unsup_ratio": 3
//   }

use std::{fmt, fs, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// The three things a run can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    Train,
    Test,
    Forward,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Test => "test",
            Mode::Forward => "forward",
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "train" => Ok(Mode::Train),
            "test" => Ok(Mode::Test),
            "forward" => Ok(Mode::Forward),
            _ => Err(ConfigError::InvalidMode(value)),
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which compute device the session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Discrete GPU `gpu_idx` through the wgpu backend
    Gpu,
    /// Plain CPU through the ndarray backend
    Cpu,
}

/// All parameters of a single run, as read from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    // ── What to do ───────────────────────────────────────────────────────────
    pub mode: Mode,
    pub model_name: String,

    // ── Where things are ─────────────────────────────────────────────────────
    /// Target-domain data (train/dev/test/forward files)
    pub data_dir: PathBuf,
    /// Baseline (supervised) training data, train mode only
    pub baseline_dir: Option<PathBuf>,
    pub out_dir: PathBuf,
    /// Data type read in forward mode
    pub forward_name: String,
    /// Explicit answer file for forward mode
    pub answer_path: Option<PathBuf>,
    /// Error-analysis output of the test loop
    pub error_dir: Option<PathBuf>,

    // ── Resuming ─────────────────────────────────────────────────────────────
    /// Keep out_dir and restore the last (or `load_step`) checkpoint
    pub load: bool,
    pub load_step: Option<usize>,

    // ── Devices ──────────────────────────────────────────────────────────────
    pub device: DeviceKind,
    pub gpu_idx: usize,
    pub num_gpus: usize,

    // ── Schedule ─────────────────────────────────────────────────────────────
    pub batch_size: usize,
    pub num_epochs: usize,
    /// 0 means "derive from num_epochs"
    pub num_steps: usize,
    pub log_period: usize,
    pub save_period: usize,
    pub eval_period: usize,
    pub eval: bool,
    /// Upper bound on evaluation batches; 0 disables the cap
    pub eval_num_batches: usize,
    pub draft: bool,
    pub seed: u64,

    // ── Margin training ──────────────────────────────────────────────────────
    /// Number of examples per step that drive the update
    pub k: usize,
    /// One target-domain batch every `sup_unsup_ratio` steps
    pub sup_unsup_ratio: usize,
    pub use_special_token: bool,
    pub margin: f64,
    pub init_lr: f64,

    // ── Data shaping ─────────────────────────────────────────────────────────
    pub lower_word: bool,
    /// Words seen this many times or fewer (and without a pretrained
    /// vector) map to [UNK]
    pub word_count_th: usize,
    /// Test/forward: give words of the evaluated split that have a
    /// pretrained vector but no trained id their own embedding row
    pub use_glove_for_unk: bool,
    pub para_size_th: usize,
    pub ques_size_th: usize,
    pub shuffle: bool,
    pub cluster: bool,

    // ── Model ────────────────────────────────────────────────────────────────
    pub word_emb_size: usize,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub d_ff: usize,
    pub dropout: f64,

    // ── Decoding / outputs ───────────────────────────────────────────────────
    pub max_answer_len: usize,
    pub num_candidates: usize,
    pub dump_eval: bool,
    pub dump_answer: bool,
    pub vis: bool,
    pub dump_error_analysis: bool,
    pub error_f1_thres: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode:                Mode::Train,
            model_name:          "basic".to_string(),
            data_dir:            PathBuf::from("data/squad"),
            baseline_dir:        None,
            out_dir:             PathBuf::from("out/basic"),
            forward_name:        "test".to_string(),
            answer_path:         None,
            error_dir:           None,
            load:                false,
            load_step:           None,
            device:              DeviceKind::Gpu,
            gpu_idx:             0,
            num_gpus:            1,
            batch_size:          60,
            num_epochs:          12,
            num_steps:           0,
            log_period:          100,
            save_period:         1000,
            eval_period:         1000,
            eval:                true,
            eval_num_batches:    100,
            draft:               false,
            seed:                42,
            k:                   1,
            sup_unsup_ratio:     1,
            use_special_token:   false,
            margin:              1.0,
            init_lr:             1e-3,
            lower_word:          true,
            word_count_th:       10,
            use_glove_for_unk:   true,
            para_size_th:        256,
            ques_size_th:        30,
            shuffle:             true,
            cluster:             false,
            word_emb_size:       100,
            hidden_size:         128,
            num_heads:           4,
            num_layers:          2,
            d_ff:                256,
            dropout:             0.2,
            max_answer_len:      30,
            num_candidates:      20,
            dump_eval:           true,
            dump_answer:         true,
            vis:                 false,
            dump_error_analysis: false,
            error_f1_thres:      0.1,
        }
    }
}

impl RunConfig {
    /// Read, parse, fold in draft overrides and validate a config file.
    /// This is the only way the binary builds a RunConfig.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Same as `from_file` for an in-memory JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let parse = |source: serde_json::Error| ConfigError::Parse { path: PathBuf::new(), source };
        let value: serde_json::Value = serde_json::from_str(json).map_err(parse)?;
        if value.is_object() && value.get("mode").is_none() {
            return Err(ConfigError::MissingMode);
        }
        let config: RunConfig = serde_json::from_value(value).map_err(|source| {
            // serde wraps our own InvalidMode error as a message; surface it as-is
            if let Some(mode) = invalid_mode_in(&source) {
                return ConfigError::InvalidMode(mode);
            }
            parse(source)
        })?;
        let config = config.with_draft_overrides();
        config.validate()?;
        Ok(config)
    }

    /// A draft run is a smoke test: two steps with every periodic
    /// action firing on each of them.
    fn with_draft_overrides(self) -> Self {
        if !self.draft {
            return self;
        }
        Self {
            num_steps:        2,
            eval_period:      1,
            log_period:       1,
            save_period:      1,
            eval_num_batches: 2,
            ..self
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("batch_size", self.batch_size),
            ("num_gpus", self.num_gpus),
            ("log_period", self.log_period),
            ("save_period", self.save_period),
            ("eval_period", self.eval_period),
            ("sup_unsup_ratio", self.sup_unsup_ratio),
            ("k", self.k),
            ("num_candidates", self.num_candidates),
            ("max_answer_len", self.max_answer_len),
            ("para_size_th", self.para_size_th),
            ("ques_size_th", self.ques_size_th),
            ("hidden_size", self.hidden_size),
            ("num_heads", self.num_heads),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::NotPositive { field });
        }
        if self.hidden_size % self.num_heads != 0 {
            return Err(ConfigError::HeadsMismatch {
                hidden_size: self.hidden_size,
                num_heads:   self.num_heads,
            });
        }

        match self.mode {
            Mode::Train => {
                if self.baseline_dir.is_none() {
                    return Err(ConfigError::Missing { field: "baseline_dir", mode: "train" });
                }
            }
            Mode::Test => {
                if !self.load {
                    return Err(ConfigError::LoadRequired("test"));
                }
            }
            Mode::Forward => {
                if !self.load {
                    return Err(ConfigError::LoadRequired("forward"));
                }
                if self.dump_answer && self.answer_path.is_none() {
                    return Err(ConfigError::Missing { field: "answer_path", mode: "forward" });
                }
            }
        }
        Ok(())
    }

    /// Examples consumed by one multi-accelerator step.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size * self.num_gpus
    }
}

fn invalid_mode_in(err: &serde_json::Error) -> Option<String> {
    let msg = err.to_string();
    let rest = msg.strip_prefix("invalid value for 'mode': ")?;
    // serde_json may append " at line X column Y"
    let value = rest.rsplit_once(" at line ").map(|(v, _)| v).unwrap_or(rest);
    Some(value.to_string())
}
