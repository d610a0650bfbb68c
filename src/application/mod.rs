// ============================================================
// Layer 2 - Application / Use Cases
// ============================================================
// Orchestrates the other layers for the three run modes:
//
//   runner.rs            - reads the data, builds the context and
//                          the Burn session, picks the use case
//   train_use_case.rs    - interleaved margin-training loop
//   test_use_case.rs     - single evaluation pass + dumps
//   forward_use_case.rs  - answers for one split
//   context.rs           - vocabulary + embedding matrix
//   schedule.rs          - step counts and periodic gates
//
// Rules for this layer:
//   - No model math here (that's Layer 5)
//   - The loops only see the Session/Trainer/Evaluator traits
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

pub mod runner;

pub mod context;

pub mod schedule;

// The training workflow
pub mod train_use_case;

// Evaluation on the test split
pub mod test_use_case;

// Inference on an arbitrary split
pub mod forward_use_case;
