// ============================================================
// Layer 2 - Runner
// ============================================================
// Wires one run together for a concrete Burn backend:
//
//   Step 1: prepare <out_dir>/{save,log,eval,answer}
//   Step 2: read the splits the mode needs          (Layer 4)
//   Step 3: vocabulary + embedding matrix           (RunContext)
//   Step 4: model + Adam -> QaSession               (Layer 5)
//           (+ rows for pretrained words the saved vocabulary
//            lacks, test/forward with use_glove_for_unk)
//   Step 5: GraphHandler                            (Layer 6)
//   Step 6: hand off to the mode's use case
//
//   mode     splits read
//   train    data_dir/train (filtered), data_dir/dev,
//            baseline_dir/train (filtered)
//   test     data_dir/test
//   forward  data_dir/<forward_name>

use anyhow::{Context, Result};
use burn::{
    optim::{AdamConfig, Optimizer},
    tensor::backend::AutodiffBackend,
};

use crate::application::{
    context::RunContext,
    forward_use_case::ForwardUseCase,
    test_use_case::TestUseCase,
    train_use_case::{TrainData, TrainUseCase},
};
use crate::data::loader::{read_data, DataFilter};
use crate::domain::config::{Mode, RunConfig};
use crate::infra::{checkpoint::GraphHandler, dirs::prepare_output_dirs};
use crate::ml::{model::QaSpanModel, trainer::QaSession};

pub fn run<B: AutodiffBackend>(config: RunConfig, device: B::Device) -> Result<()> {
    let dirs = prepare_output_dirs(&config.out_dir, config.load)?;
    tracing::info!("Mode '{}', output in '{}'", config.mode, dirs.out_dir.display());

    match config.mode {
        Mode::Train => {
            let filter = DataFilter::from_config(&config);
            let baseline_dir = config
                .baseline_dir
                .clone()
                .context("'baseline_dir' is required in train mode")?;
            let data = TrainData {
                train:    read_data(&config.data_dir, "train", Some(&filter))?,
                dev:      read_data(&config.data_dir, "dev", None)?,
                baseline: read_data(&baseline_dir, "train", Some(&filter))?,
            };

            let ctx = RunContext::resolve(config, dirs, &[&data.baseline, &data.train, &data.dev])?;
            let mut session = build_session::<B>(&ctx, device)?;
            let handler     = GraphHandler::new(&ctx.config, &ctx.dirs)?;
            let summary = TrainUseCase::new(&ctx.config, &handler).execute(&mut session, &data)?;
            println!("Training complete: {} steps, last loss {:.4}", summary.steps, summary.last_loss);
        }
        Mode::Test => {
            let test = read_data(&config.data_dir, "test", None)?;
            let ctx  = RunContext::resolve(config, dirs, &[&test])?;
            let mut session = build_session::<B>(&ctx, device)?;
            let handler     = GraphHandler::new(&ctx.config, &ctx.dirs)?;
            let e = TestUseCase::new(&ctx.config, &handler).execute(&mut session, &test)?;
            println!("{e}");
        }
        Mode::Forward => {
            let data = read_data(&config.data_dir, &config.forward_name, None)?;
            let ctx  = RunContext::resolve(config, dirs, &[&data])?;
            let mut session = build_session::<B>(&ctx, device)?;
            let handler     = GraphHandler::new(&ctx.config, &ctx.dirs)?;
            let e = ForwardUseCase::new(&ctx.config, &handler).execute(&mut session, &data)?;
            println!("{e}");
        }
    }
    Ok(())
}

fn build_session<B: AutodiffBackend>(
    ctx:    &RunContext,
    device: B::Device,
) -> Result<QaSession<B, impl Optimizer<QaSpanModel<B>, B>>> {
    let model_cfg = ctx.model_config();
    let model: QaSpanModel<B> = model_cfg
        .init_with_embeddings(&ctx.emb_mat, &device)
        .context("Embedding matrix does not fit the model")?;
    tracing::info!(
        "Model ready: vocab={}, {} layers, hidden={}",
        model_cfg.vocab_size, model_cfg.num_layers, model_cfg.d_model
    );

    // Adam: m = b1*m + (1-b1)*g, v = b2*v + (1-b2)*g^2, w -= lr * m / (sqrt(v) + eps)
    let optim = AdamConfig::new().with_epsilon(1e-8).init();
    QaSession::new(model, optim, ctx.vocab.clone(), device, &ctx.session_settings())
        .with_unk_embeddings(ctx.unk_emb_mat.clone())
}
