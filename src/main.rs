use clap::{Parser, Subcommand};
use neuron_view::{AppConfig, AppContext, NetworkKind, logging::setup_logging};
use serde::Serialize;
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "neuron-view")]
#[command(about = "Lays out dense neural networks and picks the links worth drawing", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the layout of a network as JSON
    Layout {
        #[arg(short, long, value_enum)]
        network: Option<NetworkKind>,

        /// Output file, stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Train a network, then print the links kept for one test sample as JSON
    Train {
        #[arg(short, long, value_enum)]
        network: Option<NetworkKind>,

        /// Number of training rounds
        #[arg(short, long)]
        rounds: Option<usize>,

        /// Samples per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Output file, stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> neuron_view::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    setup_logging(cli.log_level.as_deref().unwrap_or(&config.log_level))?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    match cli.command {
        Commands::Layout { network, output } => {
            let kind = network.unwrap_or(config.network);
            let shape = kind.shape()?;
            info!(?kind, neurons = shape.neuron_count(), "laid out network");
            write_json(&shape, output)?;
        }

        Commands::Train {
            network,
            rounds,
            batch_size,
            learning_rate,
            output,
        } => {
            if let Some(network) = network {
                config.network = network;
            }
            if let Some(rounds) = rounds {
                config.training.rounds = rounds;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if learning_rate.is_some() {
                config.learning_rate = learning_rate;
            }
            config.validate()?;
            train(&config, output)?;
        }
    }

    Ok(())
}

fn train(config: &AppConfig, output: Option<PathBuf>) -> neuron_view::Result<()> {
    let mut context = AppContext::new(config)?;
    let training = &config.training;
    let playground = context.active_mut();

    for round in 1..=training.rounds {
        let result = playground.train_round(training.batches_per_round, training.batch_size);
        playground.test(training.test_size);
        let stats = playground.stats();
        info!(
            round,
            loss = result.mean_loss,
            samples = stats.samples_seen,
            training_accuracy = ?stats.training_accuracy,
            test_accuracy = ?stats.test_accuracy,
            test_error = ?stats.test_error,
            "finished round"
        );
    }

    let link_filter = config.links.build(playground.shape())?;
    let sample = playground.next_test_batch(1);
    let snapshot =
        playground.snapshot(sample.xs.row(0), link_filter.as_ref(), config.filter_scope)?;
    info!(links = snapshot.links.len(), "derived links");
    write_json(&snapshot, output)
}

fn write_json<T: Serialize>(value: &T, output: Option<PathBuf>) -> neuron_view::Result<()> {
    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
