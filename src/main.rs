//! mqtt-probe - MQTT 5 broker capability probe
//!
//! Runs one probe or the full suite against a broker and prints the result on
//! stdout. Logs go to stderr.

use clap::{Parser, Subcommand};
use mqtt_probe::config::{ProbeConfig, Secret};
use mqtt_probe::error::{ProbeError, ProbeResult};
use mqtt_probe::observability::{
    init_logging_with_overrides, level_for_verbosity, parse_level, LogFormat,
};
use mqtt_probe::probe::{qos_from_level, CapabilityProber, ProbeSettings};
use mqtt_probe::report::{render, OutputFormat};
use mqtt_probe::transport::mqtt::MqttSessionFactory;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "mqtt-probe.toml";
const DEFAULT_BROKER_URL: &str = "mqtt://localhost:1883";

/// Probe what an MQTT 5 broker supports and where its limits are
#[derive(Parser)]
#[command(name = "mqtt-probe")]
#[command(about = "Probe MQTT 5 broker capabilities and limits")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL (mqtt://host:port or mqtts://host:port)
    #[arg(short, long, env = "MQTT_BROKER")]
    broker: Option<String>,

    /// MQTT username
    #[arg(short, long)]
    username: Option<String>,

    /// MQTT password
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Timeout for every acknowledgement and delivery wait
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Known safe topic length, bounds the random probe topics
    #[arg(long, value_name = "BYTES")]
    max_topic_length: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    format: OutputFormat,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every probe
    All,
    /// Connect and report the CONNACK reason code
    Connect,
    /// Check that shared subscriptions deliver to one member only
    Shared,
    /// Publish a burst at one QoS level and count deliveries
    Qos {
        /// QoS level (0, 1 or 2)
        #[arg(short, long, default_value_t = 1)]
        level: u8,
        /// Number of publishes
        #[arg(short, long)]
        repetitions: Option<u32>,
    },
    /// Check retained message delivery
    Retain,
    /// Check single-level and multi-level wildcard subscriptions
    Wildcard,
    /// Discover the maximum payload size
    Payload {
        /// First candidate size in bytes
        #[arg(short, long)]
        max: Option<usize>,
    },
    /// Discover the maximum topic length
    TopicLength,
    /// Discover the maximum client identifier length
    ClientIdLength,
    /// Find the punctuation characters allowed in client identifiers
    ClientIdChars,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = load_configuration(&cli);

    let (level, format) = match &config {
        Ok(config) => (
            config.logging.level.as_deref().map(parse_level),
            config.logging.format.as_deref().map(LogFormat::parse),
        ),
        Err(_) => (None, None),
    };
    let level = match (level, cli.verbose) {
        (level, 0) => level,
        (level, verbose) => Some(level_for_verbosity(
            level.unwrap_or(tracing::Level::INFO),
            verbose,
        )),
    };
    init_logging_with_overrides(level, format);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    match run(cli, config).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            error!("Probe failed: {}", e);
            process::exit(1);
        }
    }
}

/// Load the configuration file (explicit, or `mqtt-probe.toml` when present)
/// and apply command-line overrides
fn load_configuration(cli: &Cli) -> ProbeResult<ProbeConfig> {
    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    let mut config = match &cli.config {
        Some(path) => ProbeConfig::load_from_file(path)?,
        None if cli.broker.is_none() && default_path.exists() => {
            ProbeConfig::load_from_file(default_path)?
        }
        None => ProbeConfig::for_broker(DEFAULT_BROKER_URL),
    };

    if let Some(broker) = &cli.broker {
        config.broker.url = broker.clone();
    }
    if let Some(username) = &cli.username {
        config.broker.username = Some(username.clone());
    }
    if let Some(timeout) = cli.timeout {
        config.probe.timeout_secs = timeout;
    }

    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli, config: ProbeConfig) -> ProbeResult<String> {
    let mut connection = config.connection_config()?;
    if let Some(password) = cli.password {
        let username = connection.username.take();
        connection = connection.with_credentials(username, Some(Secret::from(password)));
    }

    info!(
        host = %connection.host,
        port = connection.port,
        tls = connection.tls.is_some(),
        "Probing broker"
    );

    let settings = ProbeSettings::from(&config.probe);
    let mut prober = CapabilityProber::new(MqttSessionFactory::new(connection), settings);
    prober.set_max_topic_length(cli.max_topic_length);

    let interrupt = prober.interrupt_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, skipping remaining probes");
            interrupt.interrupt();
        }
    });

    let format = cli.format;
    let output = match cli.command {
        Commands::All => render(&prober.run_all().await, format)?,
        Commands::Connect => render(&prober.test_connect().await, format)?,
        Commands::Shared => render(&prober.test_shared_subscription().await, format)?,
        Commands::Qos { level, repetitions } => {
            let qos = qos_from_level(level)
                .ok_or_else(|| ProbeError::invalid_input(format!("QoS level {level}")))?;
            let repetitions = repetitions.unwrap_or(prober.settings().qos_repetitions);
            render(&prober.test_qos(qos, repetitions).await, format)?
        }
        Commands::Retain => render(&prober.test_retain().await, format)?,
        Commands::Wildcard => render(&prober.test_wildcard_subscriptions().await, format)?,
        Commands::Payload { max } => {
            let max = max.unwrap_or(prober.settings().max_payload_size);
            render(&prober.test_payload_size(max).await, format)?
        }
        Commands::TopicLength => render(&prober.test_topic_length().await, format)?,
        Commands::ClientIdLength => render(&prober.test_client_id_length().await, format)?,
        Commands::ClientIdChars => render(&prober.test_identifier_chars().await, format)?,
    };

    Ok(output)
}
