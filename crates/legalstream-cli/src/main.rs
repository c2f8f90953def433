//! LegalStream CLI - drive the streaming client against a live endpoint.
//!
//! Every sink event is printed to stdout as one JSON line; logs go to stderr.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use legalstream_core::{ClientConfig, StreamingClient, TcpChannel};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "legalstream")]
#[command(about = "Streaming client for the legal inference service")]
struct Args {
    /// Service endpoint (host:port)
    #[arg(short, long, default_value = "127.0.0.1:50051")]
    endpoint: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Seconds to wait for streams to wind down on Ctrl-C
    #[arg(long, default_value = "5")]
    grace_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream text chunks through an embedding session
    Embed {
        /// Session id (generated when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Text chunks, sent in order; the last one is final
        #[arg(required = true)]
        chunks: Vec<String>,
    },

    /// Send one search vector through a duplex session
    SearchVector {
        /// Session id (generated when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Comma-separated vector components
        #[arg(long, value_delimiter = ',', required = true)]
        vector: Vec<f32>,
    },

    /// Process one document
    Document {
        #[arg(long)]
        id: String,

        /// Document type ("contract" enables clause detection)
        #[arg(long, default_value = "contract")]
        doc_type: String,

        /// File holding the document text
        #[arg(long)]
        file: std::path::PathBuf,
    },

    /// Run a semantic search
    Search {
        query: String,

        #[arg(long, default_value = "case_law")]
        collection: String,

        #[arg(long, default_value = "10")]
        top_k: u32,
    },

    /// Compare one case against others
    Similarity {
        base: String,

        #[arg(long, value_delimiter = ',', required = true)]
        compare: Vec<String>,
    },
}

fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let addr: SocketAddr = args
        .endpoint
        .parse()
        .with_context(|| format!("invalid endpoint {:?}", args.endpoint))?;
    info!("Connecting to {}", addr);

    let config = ClientConfig::default().shutdown_grace(Duration::from_secs(args.grace_secs));
    let client = StreamingClient::with_config(TcpChannel::new(addr), config);

    let run = commands::run(&client, args.command);
    let succeeded = tokio::select! {
        result = run => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, closing streams");
            false
        }
    };

    client.shutdown().await;

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
