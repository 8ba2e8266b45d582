//! RBM training binary.
//!
//! Trains a Binary-Binary RBM by persistent contrastive divergence on
//! synthetic prototype-plus-noise data, one epoch at a time so the
//! fantasy particles carry over. Writes JSONL metrics and a final checkpoint.

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rbm::checkpoint::{load_checkpoint, save_checkpoint};
use rbm::data::{prototype_samples, train_test_split};
use rbm::training::evaluate_lpl;
use rbm::{pcd, Adam, Layer, Rbm, Regularization, TrainConfig};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "rbm-train",
    about = "Train a Binary-Binary RBM on synthetic prototype data"
)]
struct Args {
    /// Number of visible units
    #[arg(long, default_value_t = 20)]
    n_visible: usize,

    /// Number of hidden units
    #[arg(long, default_value_t = 10)]
    n_hidden: usize,

    /// Number of generated samples
    #[arg(long, default_value_t = 2000)]
    samples: usize,

    /// Number of prototypes the samples are drawn around
    #[arg(long, default_value_t = 4)]
    prototypes: usize,

    /// Bit-flip probability around each prototype
    #[arg(long, default_value_t = 0.05)]
    noise: f64,

    /// Fraction of data held out for evaluation
    #[arg(long, default_value_t = 0.1)]
    eval_fraction: f64,

    /// Number of training epochs
    #[arg(long, default_value_t = 20)]
    epochs: usize,

    /// Mini-batch size
    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// Gibbs steps per mini-batch
    #[arg(long, default_value_t = 10)]
    steps: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.01)]
    lr: f64,

    /// L2 penalty on the weights
    #[arg(long, default_value_t = 0.0)]
    l2_weights: f64,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Output metrics file (JSONL)
    #[arg(long, default_value = "data/output/metrics.jsonl")]
    metrics_file: PathBuf,

    /// Final checkpoint path
    #[arg(long, default_value = "data/checkpoints/rbm.json")]
    checkpoint: PathBuf,

    /// Resume from checkpoint file
    #[arg(long)]
    resume: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let data = prototype_samples(args.samples, args.n_visible, args.prototypes, args.noise, &mut rng);
    let (train, eval) = train_test_split(&data, args.eval_fraction);

    let (mut model, start_epoch) = match &args.resume {
        Some(path) => {
            eprintln!("Resuming from checkpoint: {}", path.display());
            let (ckpt, model) = load_checkpoint(path)?;
            eprintln!("  Resumed at epoch {}", ckpt.epoch);
            (model, ckpt.epoch)
        }
        None => {
            let mut model = Rbm::with_zero_weights(Layer::binary(&[args.n_visible]), Layer::binary(&[args.n_hidden]));
            model.initialize(&train, None, 1e-3, &mut rng)?;
            (model, 0)
        }
    };

    if let Some(parent) = args.metrics_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut metrics_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.metrics_file)?;

    eprintln!("RBM Training (PCD)");
    eprintln!("  Model: {} visible x {} hidden (Binary/Binary)", args.n_visible, args.n_hidden);
    eprintln!("  Data: {} train, {} eval", train.nrows(), eval.nrows());
    eprintln!("  Epochs: {}, Batch: {}, Gibbs steps: {}", args.epochs, args.batch_size, args.steps);
    eprintln!("  Learning rate: {}", args.lr);
    eprintln!("  Metrics: {}", args.metrics_file.display());
    eprintln!();

    let config = TrainConfig {
        batch_size: args.batch_size.min(train.nrows().max(1)),
        epochs: 1,
        steps: args.steps,
        regularization: Regularization {
            l2_weights: args.l2_weights,
            ..Regularization::default()
        },
        ..TrainConfig::default()
    };
    let mut optimizer = Adam::new(args.lr);
    let mut fantasy = None;
    let started = Instant::now();

    for epoch in start_epoch + 1..=start_epoch + args.epochs {
        let outcome = pcd(&mut model, &train, None, &config, &mut optimizer, fantasy.take(), &mut rng)?;
        fantasy = Some(outcome.fantasy);
        let train_lpl = outcome.history.last("lpl").unwrap_or(f64::NAN);
        let eval_lpl = if eval.nrows() > 0 {
            evaluate_lpl(&model, &eval, None, true, &mut rng)?
        } else {
            f64::NAN
        };
        let recon = model.reconstruction_error(&train)?;

        eprintln!(
            "  Epoch {epoch:>4}: train lpl {train_lpl:>9.4} | eval lpl {eval_lpl:>9.4} | recon {recon:.4} | {:.1}s",
            started.elapsed().as_secs_f64()
        );
        let epoch_event = serde_json::json!({
            "type": "epoch",
            "epoch": epoch,
            "train_lpl": train_lpl,
            "eval_lpl": eval_lpl,
            "reconstruction_error": recon,
            "cd_loss": outcome.history.last("cd_loss"),
            "elapsed_secs": started.elapsed().as_secs_f64(),
        });
        writeln!(metrics_file, "{}", epoch_event)?;
    }

    let final_epoch = start_epoch + args.epochs;
    save_checkpoint(&model, &args.checkpoint, final_epoch)?;
    let ckpt_event = serde_json::json!({
        "type": "checkpoint",
        "epoch": final_epoch,
        "path": args.checkpoint.display().to_string(),
    });
    writeln!(metrics_file, "{}", ckpt_event)?;
    eprintln!();
    eprintln!("Saved checkpoint: {}", args.checkpoint.display());
    Ok(())
}
