use clap::Parser;
use log::{error, info};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::BufReader;

use coap_sensor_node::sensor::{EnvironmentSensor, SensorParams, SimulatedBme280};
use coap_sensor_node::{Console, Node, NodeConfig, RequestOptions, Shell};

/// A CoAP sensor node with an interactive request shell
#[derive(PartialEq, Clone, Debug, Parser)]
#[command(name = "sensor-node")]
pub struct Options {
    #[arg(long, default_value = "[::]:5683")]
    /// Address the CoAP server listens on
    pub listen: SocketAddr,

    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    /// Period of Observe notifications
    pub notify_period: Duration,

    #[arg(long, default_value = "/cli/stats")]
    /// Resource whose observers are notified
    pub observed_path: String,

    #[arg(long, default_value_t = 2)]
    /// Maximum number of Observe registrations
    pub max_observers: usize,

    #[arg(long, default_value_t = 3)]
    /// Number of transmissions per shell request
    pub retries: usize,

    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    /// Time to wait for a response after each transmission
    pub timeout: Duration,

    #[arg(long, default_value_t = 0)]
    /// I2C bus of the sensor
    pub i2c_bus: u8,

    #[arg(long, default_value = "0x77", value_parser = parse_i2c_address)]
    /// I2C address of the sensor
    pub i2c_address: u8,

    #[arg(long)]
    /// Run with the sensor bus disabled
    pub no_sensor: bool,

    #[arg(long = "log-level", default_value = "info")]
    /// Configure app logging levels (warn, info, debug, trace)
    pub log_level: String,
}

impl Options {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            listen: self.listen,
            notify_period: self.notify_period,
            observed_path: self.observed_path.clone(),
            max_observers: self.max_observers,
            request: RequestOptions {
                retries: self.retries,
                timeout: self.timeout,
            },
        }
    }

    fn sensor_params(&self) -> SensorParams {
        SensorParams {
            bus: self.i2c_bus,
            bus_enabled: !self.no_sensor,
            address: self.i2c_address,
        }
    }
}

fn parse_i2c_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid i2c address {}: {}", s, e))
}

fn start_sensor(params: SensorParams) -> Option<Box<dyn EnvironmentSensor>> {
    let mut sensor = SimulatedBme280::new(params);
    match sensor.start() {
        Ok(()) => Some(Box::new(sensor)),
        Err(e) => {
            println!("[Error] {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load options
    let opts = Options::parse();

    // Initialise logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&opts.log_level))
        .init();

    let sensor = start_sensor(opts.sensor_params());

    let node = match Node::start(opts.node_config(), sensor).await {
        Ok(node) => node,
        Err(e) => {
            error!("could not start node: {}", e);
            return Err(e.into());
        }
    };
    println!("coap sensor node app");
    info!("listening on {}", node.local_addr());

    let console = Console::stdout();
    let shell = Shell::new(vec![Box::new(node.coap_command())], console.clone());

    console.line("All up, running the shell now");
    shell.run(BufReader::new(tokio::io::stdin())).await?;

    node.shutdown().await?;
    Ok(())
}
