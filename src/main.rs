use anyhow::Context;
use brigade_rs::adk::approval::{ApprovalBroker, ConsoleApprover};
use brigade_rs::adk::model::gemini::GeminiModel;
use brigade_rs::adk::model::GenerationConfig;
use brigade_rs::brigade::kitchen::{self, Kitchen, WORKFLOWS};
use brigade_rs::brigade::server::{self, AppState};
use brigade_rs::brigade::workflow::config::RunConfig;
use brigade_rs::brigade::workflow::loader::ConfigLoader;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the available workflows
    List,
    /// Run a workflow, answering approval gates on the console
    Run {
        /// Workflow name
        #[arg(short, long)]
        workflow: String,

        /// JSON request; defaults to the workflow's sample
        #[arg(short, long)]
        input: Option<String>,

        /// YAML run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Serve workflows over HTTP
    Serve {
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        /// YAML run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn generator(config: &RunConfig) -> anyhow::Result<Arc<GeminiModel>> {
    log::info!("Using model: {}", config.model.name);
    let model = GeminiModel::new(config.model.name.clone())?.with_config(GenerationConfig {
        temperature: config.model.temperature,
        max_output_tokens: None,
    });
    Ok(Arc::new(model))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::List => {
            for name in WORKFLOWS {
                println!("{}", name);
            }
        }
        Commands::Run {
            workflow,
            input,
            config,
        } => {
            let config = ConfigLoader::new().load(config.as_deref())?;
            let kitchen = Kitchen::new(generator(&config)?, Arc::new(ConsoleApprover), config);
            let workflow = kitchen::build(&workflow, &kitchen)?;

            let input = match input {
                Some(raw) => serde_json::from_str(&raw).context("--input is not valid JSON")?,
                None => kitchen::sample_input(&workflow.name).unwrap_or_default(),
            };

            println!("Running workflow: {}", workflow.name);
            let report = workflow.run(input).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Serve { port, config } => {
            let config = ConfigLoader::new().load(config.as_deref())?;
            let broker = match config.approval_timeout() {
                Some(timeout) => ApprovalBroker::new().with_timeout(timeout),
                None => ApprovalBroker::new(),
            };
            let broker = Arc::new(broker);
            let kitchen = Kitchen::new(generator(&config)?, broker.clone(), config);
            server::serve(port, AppState::new(kitchen, broker)).await?;
        }
    }

    Ok(())
}
