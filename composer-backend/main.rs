mod api;
mod client;
mod config;
mod documents;
mod error;
mod flows;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::client::FlowBackend;
use crate::client::catalog::FlowCatalog;
use crate::client::http::HttpFlowBackend;
use crate::config::Config;
use crate::documents::file_repository::FileDocumentRepository;
use crate::documents::repository::DocumentRepository;
use crate::flows::NewFlowDefinition;
use crate::flows::file_repository::FileFlowRepository;
use crate::flows::repository::FlowRepository;
use crate::flows::session::{ActionResult, ExecutionSession};

#[derive(Parser)]
#[command(name = "composer", about = "Document flow editor and execution backend")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve,
    /// Rewrite stored flows and executions whose attached forms were
    /// repaired on load
    MigrateForms,
    /// Manage flow definitions through the API
    #[command(subcommand)]
    Flow(FlowCommand),
    /// Execute one node of a running execution through the API
    Execute {
        #[arg(long)]
        execution: String,
        #[arg(long)]
        node: String,
    },
}

#[derive(Subcommand)]
enum FlowCommand {
    /// Create a flow with an empty graph
    Create {
        /// Code in the XXX-99 format; typed input is masked
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        flow_type_id: String,
    },
    /// Toggle the lock of a flow
    Lock { id: String },
    /// Toggle whether a flow is offered for new executions
    Enable { id: String },
    Duplicate { id: String },
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    // Default to Serve when no subcommand is given, but still allow
    // --help and --version to work.
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve
    } else {
        Cli::parse()
    };

    let config = Config::from_env();
    init_tracing();
    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: true,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    match cli {
        Cli::Serve => run_server(&config).await,
        Cli::MigrateForms => {
            let flow_repo = FileFlowRepository::new(&config.data_dir);
            flow_repo
                .load_all()
                .await
                .context("failed to load flow repository")?;
            let written = flow_repo.migrate_legacy_forms().await?;
            println!("Rewrote {written} record(s) with legacy attached forms");
            Ok(())
        }
        Cli::Flow(command) => run_flow_command(&config, command).await,
        Cli::Execute { execution, node } => run_execute(&config, &execution, &node).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("composer=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();
}

async fn run_server(config: &Config) -> Result<(), Box<dyn Error>> {
    let flow_repo: Arc<dyn FlowRepository> = Arc::new(FileFlowRepository::new(&config.data_dir));
    flow_repo
        .load_all()
        .await
        .context("failed to load flow repository")?;

    let document_repo: Arc<dyn DocumentRepository> =
        Arc::new(FileDocumentRepository::new(&config.data_dir));
    document_repo
        .load_all()
        .await
        .context("failed to load document repository")?;

    let app_state = api::AppState::new(flow_repo, document_repo);

    let app = api::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let port = config.port;
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(data_dir = %config.data_dir.display(), "Listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

fn http_backend(config: &Config) -> Result<HttpFlowBackend> {
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    Ok(HttpFlowBackend::new(client, config.api_url.clone()))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_flow_command(config: &Config, command: FlowCommand) -> Result<(), Box<dyn Error>> {
    let catalog = FlowCatalog::new(Arc::new(http_backend(config)?));

    match command {
        FlowCommand::Create {
            code,
            name,
            description,
            flow_type_id,
        } => {
            let flow = catalog
                .create(NewFlowDefinition {
                    code: flows::code::mask(&code),
                    name,
                    description,
                    flow_type_id,
                    created_by: std::env::var("USER").ok(),
                })
                .await?;
            print_json(&flow)
        }
        FlowCommand::Lock { id } => {
            let mut editor = catalog.open(&id).await?;
            let locked = catalog.toggle_lock(&mut editor).await?;
            print_json(&flows::wire::LockState { is_locked: locked })
        }
        FlowCommand::Enable { id } => {
            let enabled = catalog.toggle_enabled(&id).await?;
            print_json(&flows::wire::EnabledState {
                is_enabled: enabled,
            })
        }
        FlowCommand::Duplicate { id } => print_json(&catalog.duplicate(&id).await?),
        FlowCommand::Delete { id } => {
            catalog.delete(&id).await?;
            println!("Deleted flow {id}");
            Ok(())
        }
    }
}

async fn run_execute(config: &Config, execution_id: &str, node_id: &str) -> Result<(), Box<dyn Error>> {
    let backend = http_backend(config)?;
    let result = execute_remote(&backend, execution_id, node_id).await?;
    print_json(&result)?;
    ensure_executed(&result, node_id)
}

async fn execute_remote(
    backend: &dyn FlowBackend,
    execution_id: &str,
    node_id: &str,
) -> Result<ActionResult> {
    let execution = backend
        .get_execution(execution_id)
        .await
        .context("failed to load execution")?;

    let mut session = ExecutionSession::new(execution);
    Ok(session.execute_node(backend, node_id).await)
}

/// A refused step is reported through `main`'s error so the process exits
/// non-zero after the sentry guard has flushed.
fn ensure_executed(result: &ActionResult, node_id: &str) -> Result<(), Box<dyn Error>> {
    if !result.is_success() {
        return Err(format!("node {node_id} was not executed: {}", result.message).into());
    }
    Ok(())
}
