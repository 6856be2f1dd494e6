use anyhow::Context;
use clap::{Parser, Subcommand};
use pipe_flow::config::FlowConfig;
use pipe_flow::pipeline::ops::{AGGREGATE_OPS, ELEMENT_OPS};
use pipe_flow::{logging, metrics};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pipe_flow")]
#[command(about = "Route numeric CSV columns through configured transform stages")]
#[command(version)]
struct Cli {
    /// Skip writing JSON log files
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow over an input file
    Run {
        /// Flow file describing stages and junctions
        #[arg(short, long)]
        config: PathBuf,
        /// Input CSV with a header row of column names
        #[arg(short, long)]
        input: PathBuf,
        /// Output file, overrides the flow file's destination
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
        /// Print collected metrics in Prometheus text format after the run
        #[arg(long)]
        metrics: bool,
    },
    /// Validate a flow file without running it
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List the available operations
    Ops,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_logging((!cli.no_log_file).then(logging::default_log_dir));

    match cli.command {
        Commands::Run {
            config,
            input,
            output,
            json,
            metrics: print_metrics,
        } => {
            if print_metrics {
                metrics::init_metrics();
            }
            let flow_config = FlowConfig::load(&config)
                .with_context(|| format!("loading flow file {}", config.display()))?;
            let flow = flow_config
                .build(&input, output)
                .with_context(|| format!("building flow from {}", config.display()))?;

            let outcome = flow.run().await;
            let elapsed = outcome.elapsed_display();
            match outcome.result {
                Ok(summary) => {
                    info!(run_id = %summary.run_id, "Run finished");
                    if json {
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    } else {
                        println!("\n📊 Flow results{}:", describe(&summary.description));
                        for timing in &summary.stages {
                            println!("   {:<24} {:>10.3} ms", timing.stage, timing.elapsed_ms);
                        }
                        println!("   Junctions continued: {}", summary.junctions_continued);
                        println!("   Rows written: {}", summary.rows_written);
                        println!("   Output file: {}", summary.destination.display());
                        println!("   Total time: {}", elapsed);
                    }
                }
                Err(e) => {
                    error!("Run failed: {}", e);
                    println!("❌ Run failed after {}: {}", elapsed, e);
                    if print_metrics {
                        print_rendered_metrics();
                    }
                    return Err(e.into());
                }
            }
            if print_metrics {
                print_rendered_metrics();
            }
        }
        Commands::Check { config } => {
            let flow_config = FlowConfig::load(&config)?;
            flow_config.validate()?;
            println!(
                "✅ {} is valid: {} stages, {} junctions",
                config.display(),
                flow_config.stages.len(),
                flow_config.junctions.len()
            );
        }
        Commands::Ops => {
            println!("Elementwise operations:");
            for op in ELEMENT_OPS {
                println!("   {:<14} {}", op.usage, op.help);
            }
            println!("Aggregate operations:");
            for op in AGGREGATE_OPS {
                println!("   {:<14} {}", op.usage, op.help);
            }
        }
    }
    Ok(())
}

fn describe(description: &str) -> String {
    if description.is_empty() {
        String::new()
    } else {
        format!(" for '{}'", description)
    }
}

fn print_rendered_metrics() {
    if let Some(rendered) = metrics::render() {
        println!("\n{}", rendered);
    }
}
