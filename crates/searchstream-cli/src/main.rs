//! SearchStream CLI - ask a question or serve the streaming endpoint

use clap::{Parser, Subcommand};
use futures::StreamExt;
use searchstream::{bridge, server, Config, Orchestrator};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// SearchStream - streaming answers with live web search
#[derive(Parser, Debug)]
#[command(name = "searchstream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve POST /chat-stream over HTTP
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(long, short, default_value_t = 8000)]
        port: u16,
    },
    /// Answer one query and stream the result to stdout
    Ask {
        /// Question to answer
        query: String,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so `ask` output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let orchestrator = match Config::from_env().and_then(|c| c.build_orchestrator()) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve { host, port } => run_server(orchestrator, &host, port).await,
        Commands::Ask { query } => run_ask(orchestrator, query).await,
    }
}

async fn run_server(orchestrator: Orchestrator, host: &str, port: u16) {
    let addr: SocketAddr = match format!("{}:{}", host, port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Error: invalid listen address {}:{}: {}", host, port, e);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!(%addr, "Listening");
    let app = server::router(Arc::new(orchestrator));
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
    info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }
}

async fn run_ask(orchestrator: Orchestrator, query: String) {
    let mut chunks = Box::pin(bridge(orchestrator.run(query)));
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) => write_safe(&bytes),
            Err(never) => match never {},
        }
    }
    write_safe(b"\n");
}

/// Write to stdout and flush, exit silently on broken pipe
fn write_safe(bytes: &[u8]) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = handle.write_all(bytes).and_then(|_| handle.flush()) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        eprintln!("Error writing to stdout: {}", e);
        std::process::exit(1);
    }
}
