// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// All Burn model code lives here. The loops in the application
// layer only see the Session/Trainer/Evaluator traits, which
// QaSession implements.
//
//   model.rs      - span model: word embeddings (pretrained
//                   init) -> projection -> positions -> encoder
//                   blocks -> start/end logits over the context
//
//   trainer.rs    - QaSession: top-K scoring, margin update,
//                   checkpoint save/restore, global step
//
//   evaluator.rs  - EvalResults with F1/EM, loss and
//                   per-example records
//
//   inferencer.rs - softmax helpers and top-N span decoding
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)

/// Span-extraction encoder model
pub mod model;

/// Training session (scoring, margin step, checkpoints)
pub mod trainer;

/// Evaluation against gold answers
pub mod evaluator;

/// Span decoding
pub mod inferencer;
