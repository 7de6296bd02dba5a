use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use nl2sql_engine::execution::cancellation_pair;
use nl2sql_engine::visualization::TransformOptions;
use nl2sql_engine::{EngineConfig, Invocation, Nl2SqlPipeline, QueryRequest, QuerySpec};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(about = "Answer banking KPI questions in Spanish with validated SQL")]
struct Args {
    /// The question in natural language, e.g. "IMOR de INVEX vs Sistema en 2024"
    query: String,

    /// Prior QuerySpec (JSON file) to refine with a follow-up question
    #[arg(long)]
    context: Option<PathBuf>,

    /// Engine config file (JSON); environment variables otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides NL2SQL_DATABASE_URL / DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    /// Emit null points for months without data
    #[arg(long)]
    dense: bool,

    /// Parse instant (YYYY-MM-DD); defaults to today
    #[arg(long)]
    now: Option<NaiveDate>,

    /// Most recent period loaded in the store (YYYY-MM-DD); defaults to last month
    #[arg(long)]
    latest_period: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::from_env()?,
    };
    if args.database_url.is_some() {
        config.database_url = args.database_url.clone();
    }

    let mut request = QueryRequest::new(&args.query);
    if let Some(path) = &args.context {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read context from {}", path.display()))?;
        let prior: QuerySpec = serde_json::from_str(&raw).context("Context is not a valid QuerySpec")?;
        request = request.with_context(prior);
    }

    let pipeline = Nl2SqlPipeline::bootstrap(&config)
        .await?
        .with_transform_options(TransformOptions { dense: args.dense });

    let today = args.now.unwrap_or_else(|| chrono::Local::now().date_naive());
    let (cancel_handle, cancel) = cancellation_pair();
    let invocation = Invocation::new(today, args.latest_period).with_cancel(cancel);

    info!(query = %args.query, "nl2sql starting");
    let running = pipeline.handle(request, invocation);
    tokio::pin!(running);
    let response = tokio::select! {
        response = &mut running => response,
        _ = tokio::signal::ctrl_c() => {
            cancel_handle.cancel();
            running.await
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
