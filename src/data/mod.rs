// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// Everything from dataset files on disk to tensors:
//
//   data_<type>.json / shared_<type>.json
//       │
//       ▼
//   DatasetLoader     → reads a split, cleans answers, filters
//       │
//       ▼
//   QaDataSet         → epochs of (multi-)batches, shuffled or
//       │               clustered by paragraph length
//       ▼
//   BatchInterleaver  → mixes target-domain and baseline batches
//       │
//       ▼
//   SpanBatcher       → ids, masks and gold positions as tensors
//
// Each module is responsible for exactly one step.
//
// Reference: Rust Book §13 (Iterators and Closures)

/// Reads dataset splits and applies the training filter
pub mod loader;

/// Cleans answer text and normalises answers for scoring
pub mod preprocessor;

/// Batches and multi-batches over a loaded split
pub mod dataset;

/// Turns examples into model input tensors
pub mod batcher;

/// Ratio-based mixing of two batch streams
pub mod interleave;
