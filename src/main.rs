//! CLI entry point for dataq-stream
//!
//! # Usage
//!
//! List attached instruments:
//! ```bash
//! dataq-stream ports
//! ```
//!
//! Configure an instrument and stream records (keys: g = go, s = stop,
//! r = reset counter, q = quit):
//! ```bash
//! dataq-stream run --config config/dataq.toml
//! ```
//!
//! Decode a captured binary stream:
//! ```bash
//! dataq-stream decode --model di2008 --scan-list 0x0A00,0x1303 capture.bin
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::Level;

use dataq_stream::config::DataqConfig;
use dataq_stream::logging::{self, LoggingConfig};
use dataq_stream::profile::DATAQ_VENDOR_ID;
use dataq_stream::range::GainPolicy;
use dataq_stream::serial::{discover_ports, find_instrument, open_serial_async};
use dataq_stream::{
    AcquisitionSession, DecoderOptions, ModelProfile, OutputRecord, ScanDecoder, ScanList,
    SessionCommand,
};

/// Capacity of the record channel between the session and the printer.
const RECORD_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "dataq-stream")]
#[command(about = "Configure DATAQ instruments and decode their binary sample stream", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports with the DATAQ USB vendor id
    Ports,

    /// Configure an instrument and stream decoded records to stdout
    Run {
        /// TOML configuration file
        #[arg(long)]
        config: PathBuf,

        /// Serial port, overriding the configuration
        #[arg(long)]
        port: Option<String>,

        /// Instrument model, overriding the configuration
        #[arg(long)]
        model: Option<ModelProfile>,
    },

    /// Decode a captured binary stream file
    Decode {
        /// Instrument model (e.g. di2008, DI-245)
        #[arg(long)]
        model: ModelProfile,

        /// Channel codes in scan order, decimal or 0x-prefixed hex
        #[arg(long, value_delimiter = ',', value_parser = parse_code, required = true)]
        scan_list: Vec<u16>,

        /// Passes averaged into one record
        #[arg(long, default_value_t = 1)]
        decimation: u32,

        /// Accept reserved gain codes with a zero full scale
        #[arg(long)]
        lenient: bool,

        /// The capture includes the trailing digital status word
        #[arg(long)]
        digital_inputs: bool,

        /// Raw capture file
        file: PathBuf,
    },
}

fn parse_code(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid channel code '{s}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Run {
            config,
            port,
            model,
        } => run(config, port, model).await,
        Commands::Decode {
            model,
            scan_list,
            decimation,
            lenient,
            digital_inputs,
            file,
        } => {
            let policy = if lenient {
                GainPolicy::Lenient
            } else {
                GainPolicy::Strict
            };
            let options = DecoderOptions::default()
                .decimation(decimation)
                .gain_policy(policy)
                .digital_inputs(digital_inputs);
            decode_file(model, &scan_list, options, file).await
        }
    }
}

fn list_ports() -> Result<()> {
    logging::init(LoggingConfig::new(Level::WARN)).map_err(anyhow::Error::msg)?;
    let ports = discover_ports(DATAQ_VENDOR_ID).context("Port discovery failed")?;
    if ports.is_empty() {
        println!("No DATAQ instruments found");
        return Ok(());
    }
    for port in ports {
        println!(
            "{}  {:04x}:{:04x}  {}{}",
            port.path,
            port.vendor_id,
            port.product_id,
            port.product.as_deref().unwrap_or("unknown product"),
            port.serial_number
                .map(|s| format!("  (serial {s})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn run(path: PathBuf, port: Option<String>, model: Option<ModelProfile>) -> Result<()> {
    let mut config = DataqConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(port) = port {
        config.device.port = Some(port);
    }
    if let Some(model) = model {
        config.device.model = model;
    }
    config.validate().context("Invalid configuration")?;

    let logging_config = LoggingConfig::from_config(&config).map_err(anyhow::Error::msg)?;
    logging::init(logging_config).map_err(anyhow::Error::msg)?;

    let port_path = match &config.device.port {
        Some(path) => path.clone(),
        None => find_instrument(DATAQ_VENDOR_ID)?.path,
    };
    tracing::info!(port = %port_path, model = %config.device.model, "Connecting");
    let serial = open_serial_async(&port_path, config.device.baud_rate).await?;

    let session = AcquisitionSession::new(serial, config.session_config()?)?;
    let (command_tx, command_rx) = mpsc::channel(16);
    let (record_tx, mut record_rx) = mpsc::channel::<OutputRecord>(RECORD_BUFFER);
    let session_task = tokio::spawn(session.run(command_rx, record_tx));

    println!("Press <g> to go, <s> to stop, <r> to reset the counter and <q> to quit (then Enter)");
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            record = record_rx.recv() => match record {
                Some(record) => println!("{record}"),
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => match SessionCommand::from_key(&line) {
                    Some(command) => {
                        if command_tx.send(command).await.is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("Unknown key '{}'", line.trim()),
                },
                None => {
                    stdin_open = false;
                    let _ = command_tx.send(SessionCommand::Quit).await;
                }
            },
        }
    }

    let summary = session_task.await.context("Session task panicked")??;
    tracing::info!(
        acquisitions = summary.acquisitions,
        records = summary.records_emitted,
        "Done"
    );
    Ok(())
}

async fn decode_file(
    model: ModelProfile,
    codes: &[u16],
    options: DecoderOptions,
    file: PathBuf,
) -> Result<()> {
    logging::init(LoggingConfig::new(Level::WARN)).map_err(anyhow::Error::msg)?;

    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let scan_list = ScanList::build(codes, model)?;
    let mut decoder = ScanDecoder::new(scan_list, options)?;

    decoder.push_bytes(&bytes);
    while let Some(record) = decoder.next_record() {
        println!("{record}");
    }

    let leftover = decoder.buffered();
    if leftover > 0 {
        tracing::warn!(bytes = leftover, "Trailing bytes do not form a full pass");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("0x0A00"), Ok(0x0A00));
        assert_eq!(parse_code("4867"), Ok(0x1303));
        assert!(parse_code("0x1FFFF").is_err());
        assert!(parse_code("slist").is_err());
    }
}
