// ============================================================
// Layer 4 - Span Batcher
// ============================================================
// Turns a list of QaExamples into tensors for the span model.
//
// Every row uses the same layout:
//
//   [CLS] (tag) q_1 .. q_m [PAD].. [SEP] c_1 .. c_n [PAD]..
//   |<------- question_len -------->|    |<-- context_len -->|
//                                         ^ context_offset
//
// question_len and context_len are the longest question/context
// in the batch, capped at ques_size_th (+1 for the tag) and
// para_size_th. Because the layout is fixed per batch, the
// model can slice the context logits out with one offset.
//
// Besides ids, the batcher precomputes on the host:
//   - an additive mask (0 for real context tokens, -1e4 for pad)
//   - gold start/end positions (end inclusive) and their one-hot
//     rows, used by the margin loss
//
// Gold spans that were cut off by truncation are treated as
// "no gold" for that example.

use burn::prelude::*;

use crate::domain::example::QaExample;
use crate::infra::vocab_store::{Vocab, CLS_ID, PAD_ID, SEP_ID};

/// Value added to logits at padded context positions
pub const MASK_VALUE: f32 = -1.0e4;

/// Tensors for one batch, all with batch size as first dimension.
#[derive(Debug, Clone)]
pub struct SpanBatch<B: Backend> {
    /// [batch, seq_len]
    pub input_ids:       Tensor<B, 2, Int>,
    /// [batch, seq_len]
    pub position_ids:    Tensor<B, 2, Int>,
    /// [batch, context_len]
    pub context_mask:    Tensor<B, 2>,
    /// [batch]
    pub start_positions: Tensor<B, 1, Int>,
    /// [batch]
    pub end_positions:   Tensor<B, 1, Int>,
    /// [batch, context_len]
    pub start_onehot:    Tensor<B, 2>,
    /// [batch, context_len]
    pub end_onehot:      Tensor<B, 2>,
    pub context_offset:  usize,
    pub context_len:     usize,
    /// Inclusive gold span per row, None when absent or truncated
    pub gold:            Vec<Option<(usize, usize)>>,
    /// Real (unpadded) context length per row
    pub context_lens:    Vec<usize>,
}

impl<B: Backend> SpanBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.gold.len()
    }
}

#[derive(Clone)]
pub struct SpanBatcher<B: Backend> {
    pub device:   B::Device,
    vocab:        Vocab,
    ques_size_th: usize,
    para_size_th: usize,
}

impl<B: Backend> SpanBatcher<B> {
    pub fn new(device: B::Device, vocab: Vocab, ques_size_th: usize, para_size_th: usize) -> Self {
        Self { device, vocab, ques_size_th, para_size_th }
    }

    /// Build tensors for `examples`; `dataset_type` adds a tag token
    /// in front of every question.
    pub fn batch(&self, examples: &[&QaExample], dataset_type: Option<&str>) -> SpanBatch<B> {
        let n = examples.len();
        let tag_id = dataset_type.map(|t| self.vocab.tag_id(t));

        let question_len = examples
            .iter()
            .map(|e| e.question.len().min(self.ques_size_th))
            .max()
            .unwrap_or(0)
            + usize::from(tag_id.is_some());
        let context_len = examples
            .iter()
            .map(|e| e.context.len().min(self.para_size_th))
            .max()
            .unwrap_or(0)
            .max(1);
        let context_offset = question_len + 2;
        let seq_len        = context_offset + context_len;

        let mut ids       = Vec::with_capacity(n * seq_len);
        let mut positions = Vec::with_capacity(n * seq_len);
        let mut mask      = Vec::with_capacity(n * context_len);
        let mut starts    = Vec::with_capacity(n);
        let mut ends      = Vec::with_capacity(n);
        let mut start_hot = vec![0.0f32; n * context_len];
        let mut end_hot   = vec![0.0f32; n * context_len];
        let mut gold      = Vec::with_capacity(n);
        let mut lens      = Vec::with_capacity(n);

        for (row, ex) in examples.iter().enumerate() {
            // ── Question half ─────────────────────────────────────────────────
            let mut q_ids: Vec<u32> = tag_id.into_iter().collect();
            q_ids.extend(ex.question.iter().take(self.ques_size_th).map(|w| self.vocab.word_id(w)));
            q_ids.resize(question_len, PAD_ID);

            ids.push(CLS_ID as i32);
            ids.extend(q_ids.iter().map(|&id| id as i32));
            ids.push(SEP_ID as i32);

            // ── Context half ──────────────────────────────────────────────────
            let real = ex.context.len().min(self.para_size_th);
            for i in 0..context_len {
                let id = if i < real { self.vocab.word_id(&ex.context[i]) } else { PAD_ID };
                ids.push(id as i32);
                mask.push(if i < real { 0.0 } else { MASK_VALUE });
            }
            positions.extend((0..seq_len).map(|p| p as i32));
            lens.push(real);

            // ── Gold span ─────────────────────────────────────────────────────
            let span = ex
                .gold()
                .filter(|a| a.fits(real))
                .map(|a| (a.start, a.end - 1));
            let (s, e) = span.unwrap_or((0, 0));
            if span.is_some() {
                start_hot[row * context_len + s] = 1.0;
                end_hot[row * context_len + e]   = 1.0;
            }
            starts.push(s as i32);
            ends.push(e as i32);
            gold.push(span);
        }

        let device = &self.device;
        SpanBatch {
            input_ids: Tensor::<B, 1, Int>::from_ints(ids.as_slice(), device)
                .reshape([n, seq_len]),
            position_ids: Tensor::<B, 1, Int>::from_ints(positions.as_slice(), device)
                .reshape([n, seq_len]),
            context_mask: Tensor::<B, 1>::from_floats(mask.as_slice(), device)
                .reshape([n, context_len]),
            start_positions: Tensor::<B, 1, Int>::from_ints(starts.as_slice(), device),
            end_positions:   Tensor::<B, 1, Int>::from_ints(ends.as_slice(), device),
            start_onehot: Tensor::<B, 1>::from_floats(start_hot.as_slice(), device)
                .reshape([n, context_len]),
            end_onehot: Tensor::<B, 1>::from_floats(end_hot.as_slice(), device)
                .reshape([n, context_len]),
            context_offset,
            context_len,
            gold,
            context_lens: lens,
        }
    }

    /// Longest sequence this batcher can produce
    pub fn max_seq_len(&self) -> usize {
        max_seq_len(self.ques_size_th, self.para_size_th)
    }
}

/// [CLS] + tag + question + [SEP] + context
pub fn max_seq_len(ques_size_th: usize, para_size_th: usize) -> usize {
    ques_size_th + para_size_th + 3
}
