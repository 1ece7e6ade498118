//! The `coap` shell command.

use async_trait::async_trait;
use log::{debug, warn};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::client::{parse_coap_url, strip_brackets, Client, UdpTransport};
use crate::observer::Observer;
use crate::report;
use crate::resources::Method;
use crate::shell::{Console, ShellCommand};
use crate::state::NodeState;

pub const USAGE: &str = "usage: coap <get|post|put|info>";
pub const REQUEST_USAGE: &str = "usage: coap <get|post|put> <addr> <port> <path> [data]";

// Ordered like the request method codes, starting at GET.
const METHODS: [(&str, Method); 3] = [
    ("get", Method::Get),
    ("post", Method::Post),
    ("put", Method::Put),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Request {
        method: Method,
        destination: Destination,
        path: String,
        payload: Option<String>,
    },
    Info,
}

/// Where a request goes. An address and port given on the command line are
/// only checked once the request has been built.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Address { addr: String, port: String },
    Resolved(SocketAddr),
}

impl Destination {
    pub fn resolve(&self) -> Result<SocketAddr, CliError> {
        match self {
            Destination::Address { addr, port } => {
                let addr = parse_address(addr)?;
                let port = parse_port(port)?;
                Ok(SocketAddr::new(addr, port))
            }
            Destination::Resolved(target) => Ok(*target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliError {
    Usage,
    RequestUsage,
    BadAddress,
    BadPort,
    BadUrl,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Usage => write!(f, "{}", USAGE),
            CliError::RequestUsage => write!(f, "{}", REQUEST_USAGE),
            CliError::BadAddress => write!(f, "coap_cli: unable to parse destination address"),
            CliError::BadPort => write!(f, "coap_cli: unable to parse destination port"),
            CliError::BadUrl => write!(f, "coap_cli: unable to parse destination url"),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Whether the error came from a well-formed request with an unusable
    /// destination.
    pub fn is_destination(&self) -> bool {
        matches!(self, CliError::BadAddress | CliError::BadPort | CliError::BadUrl)
    }
}

fn parse_address(addr: &str) -> Result<IpAddr, CliError> {
    let addr = strip_brackets(addr).map_err(|_| CliError::BadAddress)?;
    addr.parse().map_err(|_| CliError::BadAddress)
}

fn parse_port(port: &str) -> Result<u16, CliError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(CliError::BadPort),
        Ok(port) => Ok(port),
    }
}

fn parse_url(url: &str) -> Result<(SocketAddr, String), CliError> {
    let (_scheme, host, port, path) = parse_coap_url(url).map_err(|_| CliError::BadUrl)?;
    let addr = parse_address(&host)?;
    if port == 0 {
        return Err(CliError::BadPort);
    }
    Ok((SocketAddr::new(addr, port), path))
}

/// Parses the arguments of the `coap` command; `args[0]` is the command
/// name.
pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Command, CliError> {
    let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
    let verb = match args.get(1) {
        Some(verb) => *verb,
        None => return Err(CliError::Usage),
    };

    if let Some((_, method)) = METHODS.iter().find(|(name, _)| *name == verb) {
        let method = *method;
        return match args.len() {
            5 | 6 => Ok(Command::Request {
                method,
                destination: Destination::Address {
                    addr: args[2].to_string(),
                    port: args[3].to_string(),
                },
                path: args[4].to_string(),
                payload: args.get(5).map(|p| p.to_string()),
            }),
            3 | 4 if args[2].contains("://") => {
                let (target, path) = parse_url(args[2])?;
                Ok(Command::Request {
                    method,
                    destination: Destination::Resolved(target),
                    path,
                    payload: args.get(3).map(|p| p.to_string()),
                })
            }
            _ => Err(CliError::RequestUsage),
        };
    }

    if verb == "info" && args.len() == 2 {
        return Ok(Command::Info);
    }

    Err(CliError::Usage)
}

/// Sends requests and reports on the node from the shell.
pub struct CoapCommand {
    state: Arc<NodeState>,
    observer: Arc<Mutex<Observer>>,
    client: Client,
    port: u16,
}

impl CoapCommand {
    pub fn new(
        state: Arc<NodeState>,
        observer: Arc<Mutex<Observer>>,
        client: Client,
        port: u16,
    ) -> Self {
        Self {
            state,
            observer,
            client,
            port,
        }
    }

    /// Sends the request and prints its outcome from a background task once
    /// it arrives.
    async fn request(
        &self,
        method: Method,
        destination: &Destination,
        path: &str,
        payload: Option<&str>,
        console: &Console,
    ) -> i32 {
        let request = match self
            .client
            .prepare(method, path, payload.map(str::as_bytes))
        {
            Ok(request) => request,
            Err(e) => {
                warn!("could not build request: {}", e);
                console.line("coap_cli: msg send failed");
                return 1;
            }
        };

        console.line(format!(
            "coap_cli: sending msg ID {}, {} bytes",
            request.message_id,
            request.len()
        ));

        let target = match destination.resolve() {
            Ok(target) => target,
            Err(error) => {
                console.line(error.to_string());
                console.line("coap_cli: msg send failed");
                return 0;
            }
        };

        let transport = match UdpTransport::connect(target).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("could not open socket towards {}: {}", target, e);
                console.line("coap_cli: msg send failed");
                return 0;
            }
        };

        match self.client.start(transport, request).await {
            Ok(exchange) => {
                debug!("request {} sent to {}", exchange.message_id(), target);
                let console = console.clone();
                tokio::spawn(async move {
                    let outcome = exchange.outcome().await;
                    console.line(report::describe(&outcome));
                });
            }
            Err(e) => {
                warn!("sending to {} failed: {}", target, e);
                console.line("coap_cli: msg send failed");
            }
        }
        0
    }

    async fn info(&self, console: &Console) -> i32 {
        let observers = self.observer.lock().await.len();

        console.line(format!("CoAP server is listening on port {}", self.port));
        console.line(format!(" CLI requests sent: {}", self.state.requests_sent()));
        console.line(format!("CoAP open requests: {}", self.state.open_requests()));
        console.line(format!("    CoAP observers: {}", observers));
        console.line(format!("    notifier ticks: {}", self.state.ticks()));
        0
    }
}

#[async_trait]
impl ShellCommand for CoapCommand {
    fn name(&self) -> &str {
        "coap"
    }

    fn description(&self) -> &str {
        "CoAP example"
    }

    async fn run(&self, args: &[String], console: &Console) -> i32 {
        match parse(args) {
            Ok(Command::Request {
                method,
                destination,
                path,
                payload,
            }) => {
                self.request(method, &destination, &path, payload.as_deref(), console)
                    .await
            }
            Ok(Command::Info) => self.info(console).await,
            Err(error) if error.is_destination() => {
                console.line(error.to_string());
                console.line("coap_cli: msg send failed");
                0
            }
            Err(error) => {
                console.line(error.to_string());
                1
            }
        }
    }
}
