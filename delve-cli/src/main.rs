//! Delve CLI: terminal front end for recursive deep research.
//!
//! Runs one research session per invocation, or hosts the MCP server over
//! stdio or HTTP.

mod commands;
mod research;

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Delve: recursive deep research with an LLM and web search
#[derive(Parser, Debug)]
#[command(name = "delve", version, about, long_about = None)]
struct Cli {
    /// Research topic (prompts interactively if omitted)
    query: Option<String>,

    /// Sub-queries generated per level
    #[arg(short, long)]
    breadth: Option<usize>,

    /// Levels of recursion
    #[arg(short, long)]
    depth: Option<usize>,

    /// Soft cap on research tokens (the final report is not counted)
    #[arg(long)]
    token_budget: Option<u64>,

    /// Sources to avoid, in plain language (e.g. "forums, listicles")
    #[arg(long)]
    avoid: Option<String>,

    /// Model override as provider:model
    #[arg(short, long)]
    model: Option<String>,

    /// Where to write the Markdown report
    #[arg(short, long, default_value = "output.md")]
    output: PathBuf,

    /// Also write the full session outcome as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Build on the learnings of a session saved with --json
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Skip the clarifying questions
    #[arg(long)]
    no_feedback: bool,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the MCP server on stdin/stdout
    Mcp,
    /// Run the MCP server over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default .delve/config.toml in the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable logs on stderr, JSON logs to a daily file. Stdout stays
    // free for reports and MCP frames.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "delve.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(command) = cli.command {
        return commands::handle_command(command, &workspace).await;
    }

    let args = research::ResearchArgs {
        query: cli.query,
        breadth: cli.breadth,
        depth: cli.depth,
        token_budget: cli.token_budget,
        avoid: cli.avoid,
        model: cli.model,
        output: cli.output,
        json: cli.json,
        seed: cli.seed,
        feedback: !cli.no_feedback,
        quiet: cli.quiet,
    };
    research::run(args, &workspace).await
}
