//! facecrawl MCP server and CLI: entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;

use facecrawl::CrawlRequest;
use facecrawl_mcp::config::{resolve_data_dir, resolve_model_path};
use facecrawl_mcp::protocol::ProtocolHandler;
use facecrawl_mcp::session::ScoutSession;
use facecrawl_mcp::tools::ToolRegistry;
use facecrawl_mcp::transport::StdioTransport;

#[derive(Parser)]
#[command(
    name = "facecrawl-mcp",
    about = "Crawl one website for images, index detected faces, and query them by face size",
    version
)]
struct Cli {
    /// Data directory holding the catalog and downloaded images.
    #[arg(short, long, global = true)]
    data_dir: Option<String>,

    /// Path to the SCRFD ONNX model.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server over stdio (default).
    Serve,

    /// Crawl a site and print the session summary as JSON.
    Crawl {
        /// Start URL (http or https).
        url: String,

        #[arg(long, default_value_t = 10)]
        max_pages: usize,

        #[arg(long, default_value_t = 200)]
        max_images: usize,

        /// Delay between page fetches, in milliseconds.
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,

        /// Concurrent image downloads.
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },

    /// Detect faces in downloaded images not yet indexed.
    Scan {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Find indexed faces closest in size to the largest face in an image.
    Search {
        /// Query image file.
        image: PathBuf,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print catalog and index statistics as JSON.
    Stats,

    /// Print server capabilities as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   facecrawl-mcp completions bash > ~/.local/share/bash-completion/completions/facecrawl-mcp
    ///   facecrawl-mcp completions zsh > ~/.zfunc/_facecrawl-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn open_session(cli: &Cli) -> anyhow::Result<ScoutSession> {
    let data_dir = resolve_data_dir(cli.data_dir.as_deref());
    let model_path = resolve_model_path(cli.model.as_deref());
    Ok(ScoutSession::open(&data_dir, &model_path)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.as_ref().unwrap_or(&Commands::Serve) {
        Commands::Serve => {
            let session = Arc::new(open_session(&cli)?);
            tracing::info!("facecrawl MCP server");
            tracing::info!("Data dir: {}", session.data_dir().display());
            let handler = ProtocolHandler::new(session);
            let transport = StdioTransport::new(handler);
            transport.run().await?;
        }

        Commands::Crawl {
            url,
            max_pages,
            max_images,
            delay_ms,
            workers,
        } => {
            let session = open_session(&cli)?;
            let mut crawl_config = facecrawl::CrawlConfig::default();
            crawl_config.workers = (*workers).max(1);
            let session = session.with_crawl_config(crawl_config)?;

            let request = CrawlRequest {
                start_url: url.clone(),
                max_pages: *max_pages,
                max_images: *max_images,
                politeness_delay: Duration::from_millis(*delay_ms),
            };

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted; finishing in-flight downloads");
                    on_interrupt.cancel();
                }
            });

            let summary = session.crawl(&request, cancel).await?;
            print_json(&summary)?;
        }

        Commands::Scan { limit } => {
            let session = open_session(&cli)?;
            let report = session.scan(*limit).await?;
            print_json(&report)?;
        }

        Commands::Search { image, limit } => {
            let session = open_session(&cli)?;
            let bytes = std::fs::read(image)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", image.display()))?;
            let result = session.search(bytes, *limit).await?;
            print_json(&result)?;
        }

        Commands::Stats => {
            let session = open_session(&cli)?;
            print_json(&session.stats().await?)?;
        }

        Commands::Info => {
            let capabilities = facecrawl_mcp::types::InitializeResult::default_result();
            let tools = ToolRegistry::list_tools();
            let info = serde_json::json!({
                "server": capabilities.server_info,
                "protocol_version": capabilities.protocol_version,
                "capabilities": capabilities.capabilities,
                "tools": tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "tool_count": tools.len(),
            });
            print_json(&info)?;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "facecrawl-mcp", &mut std::io::stdout());
        }
    }

    Ok(())
}
