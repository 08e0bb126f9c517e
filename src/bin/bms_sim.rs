use bms_sim::config::{Credentials, SimulatorConfig};
use bms_sim::{MqttTransport, Simulator};
use clap::{App, Arg, ArgMatches};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.yaml";
const DEFAULT_CREDENTIALS: &str = "credentials.yaml";

fn positive(v: String) -> Result<(), String> {
    match v.parse::<u64>() {
        Ok(n) if n > 0 => Ok(()),
        _ => Err("value must be a positive integer".into()),
    }
}

fn cli() -> App<'static, 'static> {
    App::new("bms-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("🔋 Battery module fleet simulator for the esp-module MQTT protocol")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Broker and fleet configuration")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::with_name("credentials")
                .long("credentials")
                .value_name("FILE")
                .help("Broker username and password; anonymous login if missing")
                .takes_value(true)
                .default_value(DEFAULT_CREDENTIALS),
        )
        .arg(
            Arg::with_name("modules")
                .short("m")
                .long("modules")
                .value_name("COUNT")
                .help("Number of simulated modules")
                .takes_value(true)
                .validator(positive),
        )
        .arg(
            Arg::with_name("cells")
                .short("n")
                .long("cells")
                .value_name("COUNT")
                .help("Cells per module")
                .takes_value(true)
                .validator(positive),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("SECONDS")
                .help("Telemetry publish interval")
                .takes_value(true)
                .validator(positive),
        )
}

fn apply_overrides(config: &mut SimulatorConfig, matches: &ArgMatches) {
    // validators guarantee these parse
    if let Some(modules) = matches.value_of("modules").and_then(|v| v.parse().ok()) {
        config.num_modules = modules;
    }
    if let Some(cells) = matches.value_of("cells").and_then(|v| v.parse().ok()) {
        config.num_cells = cells;
    }
    if let Some(interval) = matches.value_of("interval").and_then(|v| v.parse().ok()) {
        config.publish_interval_secs = interval;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = cli().get_matches();

    let mut config = SimulatorConfig::load(matches.value_of("config").unwrap_or(DEFAULT_CONFIG))?;
    apply_overrides(&mut config, &matches);
    config.validate()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let credentials =
        Credentials::load_optional(matches.value_of("credentials").unwrap_or(DEFAULT_CREDENTIALS))?;
    if credentials.is_none() {
        info!("No credentials file, connecting anonymously");
    }

    info!(
        modules = config.num_modules,
        cells = config.num_cells,
        interval_secs = config.publish_interval_secs,
        "🔋 Battery Simulator starting"
    );

    let (transport, events) = match MqttTransport::connect(&config, credentials.as_ref()).await {
        Ok(connection) => connection,
        Err(e) => {
            error!("❌ {}", e);
            return Err(e.into());
        }
    };

    let simulator = Arc::new(Simulator::from_config(&config, Arc::new(transport))?);
    simulator.subscribe_all().await?;
    simulator.run(events).await?;

    info!("🔋 Battery Simulator stopped");
    Ok(())
}
