use std::time::Instant;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, instrument};

use crate::config::load_config_from_path;
use crate::errors::Result;
use crate::pipeline::CrmSource;
use crate::writer::{JsonLinesWriter, RecordWriter};

/// CLI
#[derive(Parser, Debug)]
#[command(
    name = "crmtap",
    version,
    about = "Extract CRM objects over a HubSpot-style REST API as JSON lines.",
    long_about = "Extract CRM objects over a HubSpot-style REST API as JSON lines.\n\n\
Large property schemas are split into several requests per page and the partial\n\
records are merged back by id before being emitted on stdout."
)]
pub struct Cli {
    #[arg(
        long = "config",
        short = 'c',
        value_name = "FILE",
        default_value = "crmtap.yaml",
        global = true
    )]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify that the API is reachable with the configured credentials.
    Check,
    /// List the streams this source can read.
    Streams,
    /// Read streams and print records as JSON lines.
    Read {
        /// Stream names; all catalog streams when omitted.
        #[arg(long = "stream", short = 's')]
        streams: Vec<String>,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut cfg = load_config_from_path(&cli.config)?;
    cfg.apply_env_overrides();
    let source = CrmSource::new(cfg)?;

    match cli.command {
        Command::Check => {
            let status = source.check_connection().await;
            println!("{}", serde_json::to_string(&status)?);
        }
        Command::Streams => {
            for stream in source.streams() {
                println!("{}", serde_json::to_string(stream.def())?);
            }
        }
        Command::Read { streams } => {
            let names = if streams.is_empty() {
                source.streams().iter().map(|s| s.name().to_string()).collect()
            } else {
                streams
            };
            let writer = JsonLinesWriter::new(std::io::stdout());
            run_read(&source, &names, &writer).await?;
        }
    }
    Ok(())
}

#[instrument(skip_all, fields(streams = names.len()))]
pub async fn run_read<W: RecordWriter>(source: &CrmSource, names: &[String], writer: &W) -> Result<u64> {
    let t0 = Instant::now();
    writer.begin().await?;

    let mut count = 0u64;
    let mut records = source.read(names);
    while let Some(item) = records.next().await {
        let item = item?;
        writer.write_record(&item.stream, &item.record).await?;
        count += 1;
    }

    writer.commit().await?;
    info!(
        records = count,
        total_ms = t0.elapsed().as_millis() as u64,
        "read finished"
    );
    Ok(count)
}
