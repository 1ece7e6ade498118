use coap_lite::{CoapRequest, MessageClass, MessageType, ObserveOption, Packet, RequestType as Method};
use log::{debug, error, info, trace, warn};
use std::{
    io::{Error, ErrorKind, Result},
    net::SocketAddr,
    sync::Arc,
};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, watch, Mutex},
};

use crate::observer::Observer;
use crate::resources::{self, Status};
use crate::state::NodeState;

pub const COAP_MTU: usize = 1600;

pub type MessageSender = mpsc::UnboundedSender<(Packet, SocketAddr)>;
type MessageReceiver = mpsc::UnboundedReceiver<(Packet, SocketAddr)>;

/// The node's CoAP server.
pub struct Server {
    socket: UdpSocket,
    state: Arc<NodeState>,
    observer: Arc<Mutex<Observer>>,
    tx: MessageSender,
    rx: MessageReceiver,
}

impl Server {
    /// Creates a server bound to `addr`.
    pub async fn bind(
        addr: SocketAddr,
        state: Arc<NodeState>,
        max_observers: usize,
    ) -> Result<Server> {
        let socket = UdpSocket::bind(addr).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            state,
            observer: Arc::new(Mutex::new(Observer::new(max_observers))),
            tx,
            rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Channel for messages the server sends on behalf of other tasks.
    pub fn message_sender(&self) -> MessageSender {
        self.tx.clone()
    }

    pub fn observer(&self) -> Arc<Mutex<Observer>> {
        self.observer.clone()
    }

    /// Serves requests until `shutdown` changes or its sender goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Server {
            socket,
            state,
            observer,
            tx,
            mut rx,
        } = self;
        // keeps the channel open while no other task holds a sender
        let _tx = tx;
        let mut buf = vec![0u8; COAP_MTU];

        info!("CoAP server listening on {}", socket.local_addr()?);

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    let (n, src) = match received {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("receive failed: {}", e);
                            continue;
                        }
                    };

                    trace!("received {} bytes from {}", n, src);

                    let packet = match Packet::from_bytes(&buf[..n]) {
                        Ok(packet) => packet,
                        Err(_) => {
                            debug!("dropping undecodable datagram from {}", src);
                            continue;
                        }
                    };

                    if let Some(reply) = handle_packet(&state, &observer, packet, src).await {
                        send_message(&socket, &reply, &src).await;
                    }
                }
                Some((message, address)) = rx.recv() => {
                    send_message(&socket, &message, &address).await;
                }
                _ = shutdown.changed() => {
                    info!("CoAP server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn send_message(socket: &UdpSocket, message: &Packet, address: &SocketAddr) {
    debug!("send_message {:?} {:?}", address, message);

    let bytes = match encode(message) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    if let Err(e) = socket.send_to(&bytes, address).await {
        warn!("sending to {} failed: {}", address, e);
    }
}

fn encode(message: &Packet) -> Result<Vec<u8>> {
    message
        .to_bytes()
        .map_err(|_e| Error::new(ErrorKind::InvalidInput, "packet error"))
}

/// Handles one incoming message and returns the message to send back, if
/// any.
pub(crate) async fn handle_packet(
    state: &NodeState,
    observer: &Mutex<Observer>,
    packet: Packet,
    source: SocketAddr,
) -> Option<Packet> {
    match packet.header.get_type() {
        MessageType::Reset => {
            observer
                .lock()
                .await
                .reset(source, packet.header.message_id);
            return None;
        }
        MessageType::Acknowledgement => return None,
        _ => {}
    }

    match packet.header.code {
        MessageClass::Request(_) => {}
        MessageClass::Empty if packet.header.get_type() == MessageType::Confirmable => {
            // CoAP ping
            let mut pong = Packet::new();
            pong.header.set_type(MessageType::Reset);
            pong.header.code = MessageClass::Empty;
            pong.header.message_id = packet.header.message_id;
            return Some(pong);
        }
        _ => return None,
    }

    let confirmable = packet.header.get_type() == MessageType::Confirmable;
    let request = CoapRequest::from_packet(packet, source);
    let method = *request.get_method();
    let path = request.get_path();
    let observe = request.get_observe_flag();
    let token = request.message.get_token().to_vec();

    debug!("{:?} /{} from {}", method, path, source);

    let reply = resources::respond(state, method, &path);
    let content = reply.status == Status::Content;
    let mut response = request.response?;
    if !confirmable {
        // a NON response is a new message
        response.message.header.message_id = state.next_message_id();
    }
    response.set_status(reply.status);
    if let Some(format) = reply.format {
        response.message.set_content_format(format);
    }
    response.message.payload = reply.payload;

    if method == Method::Get && content && resources::observable(&path).is_some() {
        let mut observer = observer.lock().await;
        match observe {
            Some(Ok(ObserveOption::Register)) => {
                if let Ok(sequence) = observer.register(source, &path, &token) {
                    response.message.set_observe_value(sequence);
                }
            }
            Some(Ok(ObserveOption::Deregister)) => {
                observer.deregister(source, &path, &token);
            }
            _ => {}
        }
    }

    Some(response.message)
}
