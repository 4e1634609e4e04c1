use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use airsense_relay::ble::SensorLink;
use airsense_relay::config::{self, Config};
use airsense_relay::decode::ByteOrder;
use airsense_relay::gatt::SENSOR_SERVICE;
use airsense_relay::link::LinkMachine;
use airsense_relay::models::SensorReading;
use airsense_relay::relay;
use airsense_relay::server;
use airsense_relay::sink::SinkClient;

#[derive(Parser)]
#[command(name = "airsense-relay", version)]
#[command(about = "Relay BLE air-quality sensor readings to an HTTP sink")]
struct Args {
    /// Config file path
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log filter, e.g. "debug" or "airsense_relay=trace" (defaults to RUST_LOG, then "info")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Connect to the sensor and forward every reading update
    Relay {
        /// Sink base URL
        #[arg(short, long)]
        sink: Option<String>,

        /// Only print readings, do not push them to the sink
        #[arg(long)]
        no_sink: bool,

        /// Output readings as JSON lines
        #[arg(long)]
        json: bool,

        /// Byte order of characteristic values
        #[arg(long, value_enum)]
        byte_order: Option<ByteOrder>,
    },
    /// Run the HTTP sink that stores readings in memory
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
    /// Print every reading stored by the sink
    Readings {
        /// Sink base URL
        #[arg(short, long)]
        sink: Option<String>,

        /// Output readings as JSON lines
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());
    let mut cfg = Config::load(&config::expand_tilde(&args.config))?;

    match args.cmd {
        Cmd::Relay {
            sink,
            no_sink,
            json,
            byte_order,
        } => {
            if let Some(sink) = sink {
                cfg.sink_url = sink;
            }
            if let Some(order) = byte_order {
                cfg.byte_order = order;
            }

            let (readings_tx, readings_rx) = watch::channel(SensorReading::default());
            let printer = tokio::spawn(relay::print(readings_rx.clone(), json));
            if no_sink {
                info!("sink disabled, printing readings only");
            } else {
                let client = SinkClient::new(&cfg.sink_url)?;
                info!("forwarding readings to {}", client.endpoint());
                tokio::spawn(relay::forward(readings_rx, client));
            }

            info!("looking for sensor service {SENSOR_SERVICE}");
            let link = SensorLink::open(cfg.adapter_index, cfg.step_timeout()).await?;
            link.run(
                LinkMachine::new(cfg.link_config()),
                readings_tx,
                shutdown_signal(),
            )
            .await?;
            printer.await??;
        }
        Cmd::Serve { listen } => {
            let addr = listen.unwrap_or(cfg.listen);
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            server::serve(listener, shutdown_signal()).await?;
        }
        Cmd::Readings { sink, json } => {
            let url = sink.unwrap_or(cfg.sink_url);
            let client = SinkClient::new(&url)?;
            let readings = client.readings().await?;
            if readings.is_empty() {
                eprintln!("No readings yet");
            }
            for reading in &readings {
                println!("{}", relay::render(reading, json)?);
            }
            eprintln!("{} readings from {}", readings.len(), client.endpoint());
        }
    }

    Ok(())
}
