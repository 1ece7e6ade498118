//! A CoAP sensor node.
//!
//! The node serves a handful of CoAP resources over UDP and offers an
//! interactive shell whose `coap` command sends requests to other nodes.
//!
//! Resources:
//! - `/cli/stats`: number of requests sent from the shell, observable
//! - `/temperature`: degrees Celsius with two decimals
//! - `/pressure`: Pascal
//! - `/humidity`: percent relative humidity with two decimals
//! - `/.well-known/core`: the resource list in CoRE link format
//!
//! Observers of `/cli/stats` receive a notification every two seconds.
//!
//! # Example
//!
//! ```no_run
//! use coap_sensor_node::{Console, Node, NodeConfig, Shell};
//! use coap_sensor_node::sensor::{SensorParams, SimulatedBme280};
//! use tokio::io::BufReader;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut sensor = SimulatedBme280::new(SensorParams::default());
//!     sensor.start().unwrap();
//!
//!     let node = Node::start(NodeConfig::default(), Some(Box::new(sensor))).await?;
//!     let shell = Shell::new(vec![Box::new(node.coap_command())], Console::stdout());
//!     shell.run(BufReader::new(tokio::io::stdin())).await?;
//!     node.shutdown().await
//! }
//! ```

pub use self::cli::CoapCommand;
pub use self::client::{Client, RequestOutcome};
pub use self::config::{NodeConfig, RequestOptions};
pub use self::node::Node;
pub use self::observer::Observer;
pub use self::server::Server;
pub use self::shell::{Console, Shell, ShellCommand};
pub use self::state::NodeState;

pub mod cli;
pub mod client;
pub mod config;
pub mod format;
mod node;
pub mod notifier;
pub mod observer;
pub mod report;
pub mod resources;
pub mod sensor;
pub mod server;
pub mod shell;
mod state;
