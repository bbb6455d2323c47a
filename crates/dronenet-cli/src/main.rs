use clap::{Parser, Subcommand};
use dronenet_core::config::{self, Config, ConfigError};
use dronenet_core::{ipc, RadioError, RadioStats, ShockBurstRadio, TxOutcome};
use dronenet_proto::{EncodeError, MacAddress, PackedFrame, Pipe};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: i32 = 1;
const EXIT_NO_ACK: i32 = 2;

/// dronenet command-line interface
#[derive(Parser)]
#[command(name = "dronenet", author, version, about = "Tools for the drone's virtual nRF24L01 network", long_about = None)]
struct Cli {
    /// Subcommands for the CLI
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind a device's pipes and print every frame it receives
    Listen {
        /// Device MAC address (hex); defaults to the configured one
        #[arg(long)]
        mac: Option<String>,
        /// Print frames as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Send a single frame to another device
    Send {
        /// Device MAC address (hex); defaults to the configured one
        #[arg(long)]
        mac: Option<String>,
        /// Destination MAC address (hex)
        #[arg(long)]
        dst: String,
        /// Destination data pipe (1-5)
        #[arg(long, default_value_t = 1)]
        pipe: u8,
        /// Payload, at most 29 bytes
        #[arg(long)]
        data: String,
        /// Treat --data as hex instead of text
        #[arg(long)]
        hex: bool,
        /// Request an ACK from the destination
        #[arg(long)]
        ack: bool,
    },
    /// Decode a 32-byte frame given as hex
    Decode {
        frame: String,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Show the IPC socket paths of a device's pipes
    Addr {
        /// Device MAC address (hex); defaults to the configured one
        #[arg(long)]
        mac: Option<String>,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("Failed to load config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Payload(#[from] EncodeError),
}

#[derive(Serialize)]
struct FrameView<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pipe: Option<u8>,
    #[serde(flatten)]
    frame: &'a PackedFrame,
    data: String,
}

impl<'a> FrameView<'a> {
    fn new(pipe: Option<Pipe>, frame: &'a PackedFrame) -> Self {
        let data = match frame.read_data() {
            Ok(data) => hex::encode(data),
            Err(e) => format!("<{}>", e),
        };
        Self {
            pipe: pipe.map(Pipe::index),
            frame,
            data,
        }
    }

    fn print(&self, json: bool) {
        if json {
            match serde_json::to_string(self) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("Failed to serialize frame: {}", e),
            }
            return;
        }
        if let Some(pipe) = self.pipe {
            println!("pipe: {}", pipe);
        }
        println!("version: {}", self.frame.version);
        println!("frame_length: {}", self.frame.frame_length);
        println!("multicast: {}", self.frame.multicast);
        println!("require_ack: {}", self.frame.require_ack);
        println!("frame_number: {}", self.frame.frame_number());
        println!("endpoint: {}", self.frame.endpoint());
        println!("data: {}", self.data);
    }
}

#[derive(Serialize)]
struct PipeAddr {
    pipe: u8,
    address: MacAddress,
    rx: String,
    tx: String,
}

/// A validated `send` invocation.
struct SendRequest {
    mac: MacAddress,
    dst: MacAddress,
    pipe: Pipe,
    frame: PackedFrame,
}

fn parse_hex(value: &str) -> Result<Vec<u8>, CliError> {
    let digits: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);
    hex::decode(digits).map_err(|e| CliError::Usage(format!("invalid hex {:?}: {}", value, e)))
}

fn load_config() -> Result<Config, CliError> {
    let (cfg, path) = config::load_config_or_default()?;
    cfg.validate().map_err(|err| {
        CliError::Usage(format!(
            "Config validation failed ({}): {}",
            path.display(),
            err
        ))
    })?;
    Ok(cfg)
}

fn resolve_mac(cfg: &Config, flag: Option<&str>) -> Result<MacAddress, CliError> {
    match flag {
        Some(value) => value
            .parse()
            .map_err(|e| CliError::Usage(format!("invalid --mac {}: {}", value, e))),
        None => cfg.device_mac()?.ok_or_else(|| {
            CliError::Usage("no device mac: pass --mac or set `mac` in the config".to_string())
        }),
    }
}

fn send_request(
    cfg: &Config,
    mac: Option<&str>,
    dst: &str,
    pipe: u8,
    data: &str,
    hex: bool,
    ack: bool,
) -> Result<SendRequest, CliError> {
    let mac = resolve_mac(cfg, mac)?;
    let dst: MacAddress = dst
        .parse()
        .map_err(|e| CliError::Usage(format!("invalid --dst {}: {}", dst, e)))?;
    let pipe = match Pipe::new(pipe) {
        Ok(pipe) if pipe.is_data() => pipe,
        _ => return Err(CliError::Usage(format!("invalid --pipe {}: must be 1-5", pipe))),
    };
    let payload = if hex {
        parse_hex(data)?
    } else {
        data.as_bytes().to_vec()
    };
    let mut frame = PackedFrame::with_data(&payload)?;
    frame.require_ack = ack;
    frame.set_endpoint(pipe.index())?;
    Ok(SendRequest {
        mac,
        dst,
        pipe,
        frame,
    })
}

fn send_exit_code(result: &Result<TxOutcome, CliError>) -> i32 {
    match result {
        Ok(TxOutcome::Sent | TxOutcome::Acked) => 0,
        Ok(TxOutcome::NoAck) => EXIT_NO_ACK,
        Ok(TxOutcome::Undeliverable) | Err(_) => EXIT_FAILURE,
    }
}

/// Binds `mac` and prints received frames until `stop` resolves.
async fn listen(
    cfg: &Config,
    mac: MacAddress,
    json: bool,
    stop: impl Future<Output = ()>,
) -> Result<RadioStats, CliError> {
    let radio = ShockBurstRadio::new(cfg.radio_settings());
    radio.set_device_mac(mac).await?;
    let handle = radio.start()?;
    println!("dronenet listening as {}", mac);

    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            entry = radio.receive(Duration::from_millis(250)) => {
                if let Some(entry) = entry {
                    FrameView::new(Some(entry.pipe), &entry.frame).print(json);
                }
            }
        }
    }

    radio.kill();
    handle.join().await;
    let stats = radio.stats();
    tracing::info!(stats = ?stats, "listener stopped");
    Ok(stats)
}

async fn send(cfg: &Config, request: &SendRequest) -> Result<TxOutcome, CliError> {
    let radio = ShockBurstRadio::new(cfg.radio_settings());
    radio.set_device_mac(request.mac).await?;
    radio.open_tx_pipe(request.dst, request.pipe).await?;
    let handle = radio.start()?;

    let outcome = radio.send_frame(&request.frame).await;
    radio.kill();
    handle.join().await;
    Ok(outcome?)
}

fn report_send(request: &SendRequest, result: &Result<TxOutcome, CliError>) {
    let (dst, pipe) = (request.dst, request.pipe);
    match result {
        Ok(TxOutcome::Sent) => println!("sent to {} pipe {}", dst, pipe),
        Ok(TxOutcome::Acked) => println!("sent to {} pipe {} (acked)", dst, pipe),
        Ok(TxOutcome::NoAck) => eprintln!("sent to {} pipe {} but no ack received", dst, pipe),
        Ok(TxOutcome::Undeliverable) => eprintln!("{} pipe {} is unreachable", dst, pipe),
        Err(err) => eprintln!("{}", err),
    }
}

fn print_addrs(cfg: &Config, mac: MacAddress, json: bool) {
    let root = cfg.radio_settings().ipc_root;
    let addrs: Vec<PipeAddr> = std::iter::once(Pipe::ZERO)
        .chain(Pipe::data_pipes())
        .map(|pipe| PipeAddr {
            pipe: pipe.index(),
            address: dronenet_proto::pipe_address(mac, pipe),
            rx: ipc::rx_pipe_path(&root, mac, pipe).display().to_string(),
            tx: ipc::tx_pipe_path(&root, mac, pipe).display().to_string(),
        })
        .collect();

    if json {
        match serde_json::to_string_pretty(&addrs) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize addresses: {}", e),
        }
    } else {
        for addr in addrs {
            println!("- pipe {} {}: rx {} tx {}", addr.pipe, addr.address, addr.rx, addr.tx);
        }
    }
}

async fn run(command: Commands) -> Result<i32, CliError> {
    match command {
        Commands::Listen { mac, json } => {
            let cfg = load_config()?;
            let mac = resolve_mac(&cfg, mac.as_deref())?;
            let stop = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            listen(&cfg, mac, json, stop).await?;
            Ok(0)
        }
        Commands::Send {
            mac,
            dst,
            pipe,
            data,
            hex,
            ack,
        } => {
            let cfg = load_config()?;
            let request = send_request(&cfg, mac.as_deref(), &dst, pipe, &data, hex, ack)?;
            let result = send(&cfg, &request).await;
            report_send(&request, &result);
            Ok(send_exit_code(&result))
        }
        Commands::Decode { frame, json } => {
            let bytes = parse_hex(&frame)?;
            let frame = PackedFrame::unpack(&bytes)
                .map_err(|err| CliError::Usage(format!("Failed to decode frame: {}", err)))?;
            FrameView::new(None, &frame).print(json);
            Ok(0)
        }
        Commands::Addr { mac, json } => {
            let cfg = load_config()?;
            let mac = resolve_mac(&cfg, mac.as_deref())?;
            print_addrs(&cfg, mac, json);
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("No subcommand provided. Try `dronenet listen`.");
        return;
    };
    match run(command).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(EXIT_FAILURE);
        }
    }
}
