// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Everything that touches the filesystem on behalf of a run:
//
//   dirs.rs        - <out_dir>/{save,log,eval,answer}, wiped on a
//                    fresh run
//
//   vocab_store.rs - word-level tokenizer vocabulary, saved next
//                    to the checkpoints so every mode shares ids
//
//   checkpoint.rs  - GraphHandler: config record, checkpoint
//                    naming and restore, summaries, eval/answer
//                    dumps
//
//   metrics.rs     - summaries.csv writer
//
//   dump.rs        - error-analysis text files
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Output directory layout
pub mod dirs;

/// Vocabulary build, save and load
pub mod vocab_store;

/// Checkpoints, summaries and result dumps
pub mod checkpoint;

/// Scalar summary CSV
pub mod metrics;

/// Error-analysis dumper
pub mod dump;
