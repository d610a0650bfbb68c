// ============================================================
// Layer 3 - Batches
// ============================================================
// A Batch is a group of examples plus the dataset indices they
// came from. The orchestration code never looks inside the
// examples; the only field it touches is `dataset_type`, a tag
// that marks target-domain batches so the model can condition
// on it through a special token.
//
// A MultiBatch is one Batch per accelerator:
//   [(idxs_0, batch_0), (idxs_1, batch_1), ...]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::example::QaExample;

/// Tag written onto target-domain batches when special tokens are on
pub const TARGET_DOMAIN_TAG: &str = "NEWSQA";

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Which dataset the examples came from (e.g. "train", "dev")
    pub data_type:    String,
    pub idxs:         Vec<usize>,
    pub examples:     Vec<QaExample>,
    pub dataset_type: Option<String>,
}

impl Batch {
    pub fn new(data_type: impl Into<String>, idxs: Vec<usize>, examples: Vec<QaExample>) -> Self {
        Self { data_type: data_type.into(), idxs, examples, dataset_type: None }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Overwrite the dataset-type tag
    pub fn tag(&mut self, dataset_type: &str) {
        self.dataset_type = Some(dataset_type.to_string());
    }
}

/// One shard per accelerator, each with the indices it covers.
pub type MultiBatch = Vec<(Vec<usize>, Batch)>;

/// Tag every shard of a multi-batch.
pub fn tag_shards(batch: &mut MultiBatch, dataset_type: &str) {
    for (_, shard) in batch.iter_mut() {
        shard.tag(dataset_type);
    }
}

/// Total number of examples across all shards.
pub fn example_count(batch: &MultiBatch) -> usize {
    batch.iter().map(|(_, shard)| shard.len()).sum()
}

/// Which of the two interleaved streams a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOrigin {
    /// Target-domain stream
    Unsupervised,
    /// Baseline stream
    Supervised,
}

impl fmt::Display for BatchOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOrigin::Unsupervised => f.write_str("unsupervised"),
            BatchOrigin::Supervised => f.write_str("supervised"),
        }
    }
}
