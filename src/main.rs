//! Binary entrypoint for the meshcore-console CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and create the store
//! - `start [--mock]` - run the poll loop against a radio session
//! - `status` - print stored peer, channel, message and packet counts
//! - `decode <hex>` - decode one raw wire packet and print it as JSON
//!
//! See the library crate docs for module-level details: `meshcore_console::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use meshcore_console::config::Config;
use meshcore_console::console::MeshConsole;
use meshcore_console::logutil::escape_log;
use meshcore_console::meshcore::decode_bytes;
use meshcore_console::meshcore::mock::{MockHandle, MockSession};
use meshcore_console::meshcore::signal::{format_rssi, format_snr};
use meshcore_console::storage::{MeshStore, StoreLimits};

#[derive(Parser)]
#[command(name = "meshcore-console")]
#[command(about = "Packet decoding and mesh state for MeshCore LoRa radios")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and initialize the store
    Init,
    /// Run the poll loop
    Start {
        /// Use the in-memory mock radio session
        #[arg(long)]
        mock: bool,
    },
    /// Show stored peer, channel, message and packet counts
    Status,
    /// Decode a raw packet given as hex
    Decode {
        /// Wire bytes, e.g. 1500...
        hex: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            info!("Initializing new console configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);

            let config = Config::load(&cli.config).await?;
            let store = open_store(&config)?;
            let settings_store = store.settings()?;
            let mut settings = settings_store.load()?;
            settings.node_name = config.node.name.clone();
            settings_store.save(&settings)?;
            info!(
                "Store ready at {} (schema v{})",
                config.storage.data_dir,
                store.schema_version()?
            );
        }
        Commands::Start { mock } => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            if !mock {
                error!("No radio driver is built into this binary; run with --mock");
                std::process::exit(2);
            }
            info!("Starting meshcore-console v{}", env!("CARGO_PKG_VERSION"));
            run(config).await?;
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let store = open_store(&config)?;
            println!("Store:    {}", store.path().display());
            println!("Schema:   v{}", store.schema_version()?);
            println!("Peers:    {}", store.peers()?.len());
            println!("Channels: {}", store.channels()?.len());
            println!("Messages: {}", store.messages()?.len());
            println!("Packets:  {}", store.packets()?.len());
        }
        Commands::Decode { hex } => {
            let cleaned: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = hex::decode(&cleaned).map_err(|e| anyhow!("Invalid hex input: {}", e))?;
            let record = decode_bytes(&bytes, None, None)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            println!("{}", record.display_content());
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<MeshStore> {
    let limits = StoreLimits {
        max_messages: config.storage.max_messages,
        max_packets: config.storage.max_packets,
    };
    MeshStore::open_with_limits(&config.storage.data_dir, limits)
        .map_err(|e| anyhow!("Failed to open store at {}: {}", config.storage.data_dir, e))
}

async fn run(config: Config) -> Result<()> {
    let mut console = MeshConsole::open(&config, MockSession::factory(MockHandle::new()))?;
    if let Err(e) = console.connect().await {
        warn!("Radio connect failed: {} (will keep polling)", e);
        console.report_radio_error(&e.to_string());
    }

    let mut tick = tokio::time::interval(config.runtime.poll_interval());
    loop {
        tokio::select! {
            _ = tick.tick() => {
                for event in console.poll_events(config.runtime.poll_batch) {
                    match event.packet_record() {
                        Some(record) => info!(
                            "{} {} [snr {} / rssi {}]",
                            event.kind(),
                            escape_log(&record.display_content()),
                            format_snr(record.snr),
                            format_rssi(record.rssi)
                        ),
                        None => info!("{}", event.kind()),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    if let Err(e) = console.disconnect().await {
        warn!("Radio disconnect failed: {}", e);
    }
    console.poll_events(config.runtime.poll_batch);
    console.store().flush()?;
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // -v overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|path| std::fs::OpenOptions::new().create(true).append(true).open(path).ok());

    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // Foreground runs echo to the terminal as well as the file
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
