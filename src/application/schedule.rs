// ============================================================
// Layer 2 - Step Schedule
// ============================================================
// Step counts and periodic gates shared by the three loops.
//
//   train steps  config.num_steps, or
//                ceil(n_train / (batch_size * num_gpus)) * num_epochs
//
//   eval steps   ceil(n / (batch_size * num_gpus)), lowered to
//                eval_num_batches when 0 < eval_num_batches < steps
//
// Periodic actions fire on global steps that are multiples of
// their period. Global steps start at 1, so nothing fires
// before the first update.

use indicatif::{ProgressBar, ProgressStyle};

/// True when a `period`-periodic action fires at `global_step`.
pub fn is_due(global_step: usize, period: usize) -> bool {
    period > 0 && global_step % period == 0
}

/// Number of training iterations for a run
pub fn train_steps(
    num_steps:  usize,
    num_train:  usize,
    batch_size: usize,
    num_gpus:   usize,
    num_epochs: usize,
) -> usize {
    if num_steps > 0 {
        num_steps
    } else {
        num_train.div_ceil(batch_size * num_gpus) * num_epochs
    }
}

/// Number of batches for an evaluation pass, capped by `cap`
/// when the cap is positive and smaller.
pub fn eval_steps(num_examples: usize, batch_size: usize, num_gpus: usize, cap: usize) -> usize {
    let steps = num_examples.div_ceil(batch_size * num_gpus);
    if 0 < cap && cap < steps { cap } else { steps }
}

/// Progress bar for a loop of `len` iterations
pub fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(&format!(
        "  {label} {{bar:30.green/black}} {{pos}}/{{len}} [{{elapsed}}<{{eta}}] {{msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}
