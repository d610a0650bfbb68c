use burn::{
    module::Param,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};

use crate::data::batcher::SpanBatch;
use crate::domain::error::DataError;
use crate::infra::vocab_store::PAD_ID;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally, do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct QaSpanConfig {
    pub vocab_size:    usize,
    pub max_seq_len:   usize,
    pub word_emb_size: usize,
    pub d_model:       usize,
    pub num_heads:     usize,
    pub num_layers:    usize,
    pub d_ff:          usize,
    pub dropout:       f64,
}

impl QaSpanConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> QaSpanModel<B> {
        let word_embedding     = EmbeddingConfig::new(self.vocab_size, self.word_emb_size).init(device);
        let input_proj         = LinearConfig::new(self.word_emb_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let span_head  = LinearConfig::new(self.d_model, 2).init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        QaSpanModel {
            word_embedding, input_proj, position_embedding, layers,
            final_norm, span_head, dropout,
        }
    }

    /// Same as `init`, with word vectors taken from `emb_mat`
    /// (row-major, vocab_size x word_emb_size).
    pub fn init_with_embeddings<B: Backend>(
        &self,
        emb_mat: &[f32],
        device:  &B::Device,
    ) -> Result<QaSpanModel<B>, DataError> {
        if emb_mat.len() != self.vocab_size * self.word_emb_size {
            return Err(DataError::EmbeddingShape {
                found: emb_mat.len(),
                rows:  self.vocab_size,
                dim:   self.word_emb_size,
            });
        }
        let mut model = self.init(device);
        let weights = Tensor::<B, 2>::from_data(
            TensorData::new(emb_mat.to_vec(), [self.vocab_size, self.word_emb_size]),
            device,
        );
        model.word_embedding.weight = Param::from_tensor(weights);
        Ok(model)
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `pad_mask` is true at [PAD] positions, which attention skips.
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let input = MhaInput::self_attn(x.clone()).mask_pad(pad_mask);
        let attn_output = self.self_attn.forward(input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct QaSpanModel<B: Backend> {
    pub word_embedding:     Embedding<B>,
    pub input_proj:         Linear<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub span_head:          Linear<B>,
    pub dropout:            Dropout,
}

/// Start/end scores over the context positions only, padding masked.
pub struct SpanLogits<B: Backend> {
    /// [batch, context_len]
    pub start: Tensor<B, 2>,
    /// [batch, context_len]
    pub end:   Tensor<B, 2>,
}

impl<B: Backend> QaSpanModel<B> {
    pub fn forward(&self, batch: &SpanBatch<B>) -> SpanLogits<B> {
        let [batch_size, seq_len] = batch.input_ids.dims();

        let words = self.input_proj.forward(self.word_embedding.forward(batch.input_ids.clone()));
        // Self-attention is permutation-invariant, so position must be injected explicitly.
        let pos_emb = self.position_embedding.forward(batch.position_ids.clone());

        let pad_mask = batch.input_ids.clone().equal_elem(PAD_ID as i32);

        let mut x = self.dropout.forward(words + pos_emb);
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
        }
        let x = self.final_norm.forward(x); // [batch, seq_len, d_model]

        // Two logits per token, keep the context part only.
        let logits = self.span_head.forward(x); // [batch, seq_len, 2]
        let (from, to) = (batch.context_offset, seq_len);
        let len = to - from;
        let start = logits.clone()
            .slice([0..batch_size, from..to, 0..1])
            .reshape([batch_size, len]);
        let end = logits
            .slice([0..batch_size, from..to, 1..2])
            .reshape([batch_size, len]);

        SpanLogits {
            start: start + batch.context_mask.clone(),
            end:   end + batch.context_mask.clone(),
        }
    }
}

// ─── Word rows past the trained vocabulary ────────────────────────────────────
impl<B: Backend> QaSpanModel<B> {
    pub fn num_word_rows(&self) -> usize {
        self.word_embedding.weight.val().dims()[0]
    }

    /// Append fixed word vectors (row-major, n x word_emb_size) after
    /// the existing embedding rows.
    pub fn append_word_rows(mut self, rows: &[f32]) -> Result<Self, DataError> {
        let weight = self.word_embedding.weight.val();
        let [n, dim] = weight.dims();
        if rows.is_empty() {
            return Ok(self);
        }
        if rows.len() % dim != 0 {
            return Err(DataError::RowWidth { found: rows.len(), dim });
        }
        let extra = Tensor::<B, 2>::from_data(
            TensorData::new(rows.to_vec(), [rows.len() / dim, dim]),
            &weight.device(),
        );
        let weight = Tensor::cat(vec![weight, extra], 0).detach();
        self.word_embedding.weight = Param::from_tensor(weight);
        tracing::debug!("Word embedding grown from {} to {} rows", n, self.num_word_rows());
        Ok(self)
    }

    /// Keep only the first `n` embedding rows.
    pub fn truncate_word_rows(mut self, n: usize) -> Self {
        let weight = self.word_embedding.weight.val();
        let [rows, dim] = weight.dims();
        if n < rows {
            self.word_embedding.weight = Param::from_tensor(weight.slice([0..n, 0..dim]).detach());
        }
        self
    }
}

/// Pull a float tensor back to the host as f32 values.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}
