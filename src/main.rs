// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use biosignal_recorder::config::{self, AppConfig};
use biosignal_recorder::protocol::Command;
use biosignal_recorder::registry::{default_csv_path, SessionRegistry};
use biosignal_recorder::{BackendFactory, Controller, EventSink, JsonLinesSink, SimulatedDevice};

/// Biosignal Recorder - acquire, stream and record multi-channel sensor data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Session directory (overrides config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Read JSON-lines commands from stdin and write JSON-lines events to stdout
    Serve,
    /// List recorded session manifests
    Sessions,
    /// Export a recorded session to CSV
    Export {
        /// Manifest file of the session
        manifest: PathBuf,
        /// Output file (defaults to the manifest path with a .csv extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load(args: &Args) -> Result<AppConfig> {
    let mut app_config = if args.config.exists() {
        config::load_config_with_env(&args.config)?
    } else {
        let mut defaults = AppConfig::default();
        config::apply_env_overrides(&mut defaults);
        defaults
    };

    // Apply CLI overrides
    if let Some(data_dir) = &args.data_dir {
        app_config.storage.filesystem.base_path = data_dir.to_string_lossy().to_string();
    }

    Ok(app_config)
}

fn init_tracing(app_config: &AppConfig) -> Result<()> {
    let level = match app_config.logging.level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries events in serve mode, so logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if app_config.logging.format == "compact" {
        builder.compact().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let app_config = load(&args)?;
    init_tracing(&app_config)?;

    if args.config.exists() {
        info!("Loaded configuration from: {:?}", args.config);
    } else {
        info!("No configuration at {:?}, using defaults", args.config);
    }

    let storage = BackendFactory::create(&app_config.storage)?;
    storage.initialize().await?;
    info!("Storage backend initialized: {}", storage.backend_type());

    match args.command.unwrap_or(Mode::Serve) {
        Mode::Serve => serve(app_config, storage).await,
        Mode::Sessions => {
            let registry = SessionRegistry::new(storage);
            for manifest in registry.list_sessions().await? {
                println!("{}", manifest.display());
            }
            Ok(())
        }
        Mode::Export { manifest, output } => {
            let registry = SessionRegistry::new(storage);
            export(&registry, &manifest, output).await
        }
    }
}

async fn export(registry: &SessionRegistry, manifest: &Path, output: Option<PathBuf>) -> Result<()> {
    let session = registry.load(manifest).await?;
    let output = output.unwrap_or_else(|| default_csv_path(manifest));
    let written = registry.write_csv(&session, &output).await?;
    println!("{}", written.display());
    Ok(())
}

async fn serve(
    app_config: AppConfig,
    storage: Arc<dyn biosignal_recorder::StorageBackend>,
) -> Result<()> {
    if !storage.health_check().await? {
        warn!("Storage backend failed its health check; recordings may not persist");
    }

    let adapter = match app_config.device.driver.as_str() {
        "simulated" => Arc::new(SimulatedDevice::new(app_config.device.simulated.clone())),
        other => bail!("Device driver '{}' is not available in this build", other),
    };

    let sink = Arc::new(JsonLinesSink::new(std::io::stdout()));
    let controller = Controller::from_config(&app_config, adapter, storage, sink.clone());

    info!("Listening for commands on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read command")? else {
                    info!("Command stream closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Command>(line) {
                    // Rejections are already reported to the sink
                    Ok(command) => {
                        if controller.handle_or_interrupt(command, &mut ctrl_c).await.is_none() {
                            info!("Received Ctrl+C during a command, shutting down");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Unparseable command '{}': {}", line, e);
                        sink.on_error(&format!("Invalid command: {}", e));
                    }
                }
            }
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    controller.shutdown().await;
    info!("Biosignal Recorder shut down successfully");

    Ok(())
}
