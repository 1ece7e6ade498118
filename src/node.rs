use log::{info, warn};
use std::io::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::cli::CoapCommand;
use crate::client::Client;
use crate::config::NodeConfig;
use crate::notifier::Notifier;
use crate::observer::Observer;
use crate::sensor::EnvironmentSensor;
use crate::server::Server;
use crate::state::NodeState;

/// A running sensor node: the CoAP server and the notification task.
pub struct Node {
    config: NodeConfig,
    state: Arc<NodeState>,
    observer: Arc<Mutex<Observer>>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<Result<()>>,
    notifier: JoinHandle<()>,
}

impl Node {
    /// Binds the server and spawns the node's tasks. `sensor` is `None` when
    /// the sensor could not be started.
    pub async fn start(
        config: NodeConfig,
        sensor: Option<Box<dyn EnvironmentSensor>>,
    ) -> Result<Node> {
        config.validate()?;

        let state = Arc::new(NodeState::new(sensor));
        let server = Server::bind(config.listen, state.clone(), config.max_observers).await?;
        let local_addr = server.local_addr()?;
        let observer = server.observer();

        let notifier = Notifier::new(
            state.clone(),
            observer.clone(),
            server.message_sender(),
            config.observed_path.clone(),
            config.notify_period,
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(server.run(shutdown_rx.clone()));
        let notifier = tokio::spawn(notifier.run(shutdown_rx));

        info!("node up on {}", local_addr);

        Ok(Node {
            config,
            state,
            observer,
            local_addr,
            shutdown,
            server,
            notifier,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The `coap` shell command bound to this node.
    pub fn coap_command(&self) -> CoapCommand {
        CoapCommand::new(
            self.state.clone(),
            self.observer.clone(),
            Client::new(self.state.clone(), self.config.request.clone()),
            self.local_addr.port(),
        )
    }

    /// Stops both tasks and waits for them.
    pub async fn shutdown(self) -> Result<()> {
        if self.shutdown.send(true).is_err() {
            warn!("node tasks already stopped");
        }

        self.notifier
            .await
            .map_err(|e| Error::new(ErrorKind::Other, e))?;
        self.server
            .await
            .map_err(|e| Error::new(ErrorKind::Other, e))?
    }
}
