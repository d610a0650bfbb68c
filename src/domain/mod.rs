// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust types and traits that define the core concepts:
// the run configuration, examples and batches, evaluation
// results, and the boundaries the loops use to reach the model.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O apart from reading the config file
//   - Only plain Rust structs, enums, and traits

// Run parameters read from the JSON config file
pub mod config;

// Typed errors for configuration and data problems
pub mod error;

// A question over a paragraph with gold answer spans
pub mod example;

// Batches, multi-accelerator batches and their origin
pub mod batch;

// Mergeable evaluation results and summaries
pub mod evaluation;

// Session / Trainer / Evaluator boundaries
pub mod traits;
