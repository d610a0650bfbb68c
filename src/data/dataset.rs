// ============================================================
// Layer 4 - QaDataSet
// ============================================================
// A loaded split plus the two ways the loops pull batches:
//
//   get_batches(batch_size, num_batches, order)
//       exactly `num_batches` single batches
//
//   get_multi_batches(batch_size, num_shards, num_steps, order)
//       exactly `num_steps` multi-batches of `num_shards` shards
//
// Both cycle through the data as many epochs as needed. An epoch
// is ceil(n / batch_size) batches; the last one may be short.
// With `shuffle` every epoch is reshuffled; with `cluster`
// examples are sorted by context length first so each batch
// holds similarly sized paragraphs (less padding), and only
// the ORDER of batches is shuffled.
//
// The iterators borrow the dataset: read once, iterate many times.

use std::collections::{HashMap, VecDeque};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::domain::{
    batch::{Batch, MultiBatch},
    example::QaExample,
};

/// Pretrained word vectors shipped with a split.
#[derive(Debug, Clone, Default)]
pub struct SharedData {
    pub word2vec:       HashMap<String, Vec<f32>>,
    pub lower_word2vec: HashMap<String, Vec<f32>>,
}

/// How batches are ordered within each epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOrder {
    pub shuffle: bool,
    pub cluster: bool,
    pub seed:    u64,
}

impl BatchOrder {
    /// Dataset order, no shuffling
    pub fn sequential() -> Self {
        Self::default()
    }
}

pub struct QaDataSet {
    data_type: String,
    examples:  Vec<QaExample>,
    shared:    SharedData,
}

impl QaDataSet {
    pub fn new(data_type: impl Into<String>, examples: Vec<QaExample>, shared: SharedData) -> Self {
        Self { data_type: data_type.into(), examples, shared }
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn num_examples(&self) -> usize {
        self.examples.len()
    }

    pub fn examples(&self) -> &[QaExample] {
        &self.examples
    }

    pub fn shared(&self) -> &SharedData {
        &self.shared
    }

    /// Batches needed to see every example once
    pub fn batches_per_epoch(&self, batch_size: usize) -> usize {
        self.examples.len().div_ceil(batch_size)
    }

    pub fn get_batches(&self, batch_size: usize, num_batches: usize, order: BatchOrder) -> BatchIter<'_> {
        BatchIter {
            dataset:   self,
            batch_size,
            remaining: num_batches,
            order,
            rng:       StdRng::seed_from_u64(order.seed),
            epoch:     VecDeque::new(),
        }
    }

    pub fn get_multi_batches(
        &self,
        batch_size: usize,
        num_shards: usize,
        num_steps:  usize,
        order:      BatchOrder,
    ) -> impl Iterator<Item = MultiBatch> + '_ {
        let mut inner = self.get_batches(batch_size, num_steps * num_shards, order);
        std::iter::from_fn(move || {
            let shards: MultiBatch = inner
                .by_ref()
                .take(num_shards)
                .map(|batch| (batch.idxs.clone(), batch))
                .collect();
            if shards.is_empty() { None } else { Some(shards) }
        })
    }

    /// Index groups for one epoch
    fn plan_epoch(&self, batch_size: usize, order: BatchOrder, rng: &mut StdRng) -> VecDeque<Vec<usize>> {
        let mut idxs: Vec<usize> = (0..self.examples.len()).collect();
        if order.shuffle {
            idxs.shuffle(rng);
        }
        if order.cluster {
            // Stable sort keeps the shuffled order among equal lengths
            idxs.sort_by_key(|&i| self.examples[i].context.len());
        }

        let mut groups: Vec<Vec<usize>> = idxs.chunks(batch_size).map(|c| c.to_vec()).collect();
        if order.cluster && order.shuffle {
            groups.shuffle(rng);
        }
        groups.into()
    }
}

/// Iterator returned by `QaDataSet::get_batches`.
pub struct BatchIter<'a> {
    dataset:    &'a QaDataSet,
    batch_size: usize,
    remaining:  usize,
    order:      BatchOrder,
    rng:        StdRng,
    epoch:      VecDeque<Vec<usize>>,
}

impl Iterator for BatchIter<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.remaining == 0 || self.dataset.examples.is_empty() {
            return None;
        }
        if self.epoch.is_empty() {
            self.epoch = self.dataset.plan_epoch(self.batch_size, self.order, &mut self.rng);
        }
        let idxs = self.epoch.pop_front()?;
        self.remaining -= 1;

        let examples = idxs.iter().map(|&i| self.dataset.examples[i].clone()).collect();
        Some(Batch::new(self.dataset.data_type.clone(), idxs, examples))
    }
}
