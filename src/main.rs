use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use iev_engine::pipeline::{PipelineBuilder, PipelineLoader};
use iev_engine::state::State;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a pipeline once and print the final state
    Run {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        config: PathBuf,

        /// Initial state as a JSON object, or @path to read it from a file
        #[arg(short, long, conflicts_with = "event")]
        input: Option<String>,

        /// Shorthand for --input '{"event": "<text>"}'
        #[arg(short, long)]
        event: Option<String>,
    },
    /// Validate a pipeline file and print its DAG
    Check {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn initial_state(input: Option<String>, event: Option<String>) -> anyhow::Result<State> {
    let value = match (input, event) {
        (Some(raw), _) => {
            let text = match raw.strip_prefix('@') {
                Some(path) => fs::read_to_string(path).with_context(|| format!("reading input file {}", path))?,
                None => raw,
            };
            serde_json::from_str::<Value>(&text).context("input is not valid JSON")?
        }
        (None, Some(event)) => json!({ "event": event }),
        (None, None) => bail!("either --input or --event is required"),
    };
    Ok(State::from_json(value)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Run { config, input, event } => {
            let state = initial_state(input, event)?;
            let pipeline = PipelineLoader::load(&config)?;
            let options = pipeline.invoke_options();
            let workflow = PipelineBuilder::new(pipeline).build()?;

            log::info!("Running pipeline '{}'", workflow.name());
            let outcome = workflow.invoke_with(state, options).await;
            match outcome {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result.state.to_json())?);
                    println!();
                    println!("{}", result.metrics.report());
                    println!();
                    println!("{}", workflow.visualize());
                }
                Err(failure) => {
                    eprintln!("{}", failure.metrics.report());
                    eprintln!();
                    eprintln!("{}", workflow.visualize());
                    return Err(failure.into());
                }
            }
        }
        Commands::Check { config } => {
            let pipeline = PipelineLoader::load(&config)?;
            let workflow = PipelineBuilder::new(pipeline).build()?;
            println!("Pipeline '{}' is valid", workflow.name());
            println!("{}", workflow.visualize());
        }
    }

    Ok(())
}
