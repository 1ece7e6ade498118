use async_trait::async_trait;
use coap_lite::{CoapRequest, ContentFormat, MessageClass, MessageType, Packet, RequestType as Method};
use log::{debug, trace, warn};
use regex::Regex;
use std::io::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time;
use url::Url;

use crate::config::{RequestOptions, COAP_PORT};
use crate::server::COAP_MTU;
use crate::state::NodeState;

/// How an outbound request ended.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Response(Packet),
    Timeout { message_id: u16 },
    Error,
}

#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, Option<SocketAddr>)>;
    async fn send(&self, buf: &[u8]) -> Result<usize>;
}

#[async_trait]
impl<T: ClientTransport + ?Sized> ClientTransport for Arc<T> {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, Option<SocketAddr>)> {
        (**self).recv(buf).await
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        (**self).send(buf).await
    }
}

/// A UDP socket connected to one peer.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn connect(peer_addr: SocketAddr) -> Result<Self> {
        let bind_addr = match peer_addr {
            SocketAddr::V6(_) => "[::]:0",
            SocketAddr::V4(_) => "0.0.0.0:0",
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer_addr).await?;
        debug!("Bound to socket: {}", socket.local_addr()?);
        Ok(Self { socket })
    }
}

#[async_trait]
impl ClientTransport for UdpTransport {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, Option<SocketAddr>)> {
        let (n, addr) = self.socket.recv_from(buf).await?;
        Ok((n, Some(addr)))
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.socket.send(buf).await
    }
}

/// An encoded request ready for transmission.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub message_id: u16,
    token: Vec<u8>,
    bytes: Vec<u8>,
}

impl PreparedRequest {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Issues confirmable requests on behalf of the shell.
#[derive(Clone)]
pub struct Client {
    state: Arc<NodeState>,
    options: RequestOptions,
}

impl Client {
    pub fn new(state: Arc<NodeState>, options: RequestOptions) -> Self {
        Self { state, options }
    }

    /// Builds and encodes a confirmable request. A payload is sent as
    /// plain text.
    pub fn prepare(
        &self,
        method: Method,
        path: &str,
        payload: Option<&[u8]>,
    ) -> Result<PreparedRequest> {
        let message_id = self.state.next_message_id();
        let token = rand::random::<u32>().to_be_bytes().to_vec();

        let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
        request.set_method(method);
        request.set_path(path);
        request.message.header.set_type(MessageType::Confirmable);
        request.message.header.message_id = message_id;
        request.message.set_token(token.clone());
        if let Some(payload) = payload {
            request.message.set_content_format(ContentFormat::TextPlain);
            request.message.payload = payload.to_vec();
        }

        let bytes = request
            .message
            .to_bytes()
            .map_err(|_e| Error::new(ErrorKind::InvalidInput, "packet error"))?;

        Ok(PreparedRequest {
            message_id,
            token,
            bytes,
        })
    }

    /// Transmits `request` once and returns the exchange awaiting its
    /// response. Counts the request as sent.
    pub async fn start<T: ClientTransport>(
        &self,
        transport: T,
        request: PreparedRequest,
    ) -> Result<Exchange<T>> {
        trace!("Transmit data: {:?}", request.bytes);
        transport.send(&request.bytes).await?;
        self.state.record_request_sent();

        Ok(Exchange {
            transport,
            request,
            options: self.options.clone(),
            _open: OpenRequest::new(self.state.clone()),
        })
    }

    /// Sends a request to `target` over a fresh UDP socket and waits for
    /// its outcome.
    pub async fn request(
        &self,
        target: SocketAddr,
        method: Method,
        path: &str,
        payload: Option<&[u8]>,
    ) -> Result<RequestOutcome> {
        let request = self.prepare(method, path, payload)?;
        let transport = UdpTransport::connect(target).await?;
        let exchange = self.start(transport, request).await?;
        Ok(exchange.outcome().await)
    }
}

// Tracks a request in the node's open request count for as long as it lives.
struct OpenRequest {
    state: Arc<NodeState>,
}

impl OpenRequest {
    fn new(state: Arc<NodeState>) -> Self {
        state.request_opened();
        Self { state }
    }
}

impl Drop for OpenRequest {
    fn drop(&mut self) {
        self.state.request_closed();
    }
}

/// A request that has been sent and is waiting for its response.
pub struct Exchange<T> {
    transport: T,
    request: PreparedRequest,
    options: RequestOptions,
    _open: OpenRequest,
}

impl<T: ClientTransport> Exchange<T> {
    pub fn message_id(&self) -> u16 {
        self.request.message_id
    }

    /// Waits for the response, retransmitting after each timeout until the
    /// configured number of transmissions is used up.
    pub async fn outcome(self) -> RequestOutcome {
        let mut acknowledged = false;

        for attempt in 0..self.options.retries.max(1) {
            if attempt > 0 && !acknowledged {
                trace!("Retransmit data: {:?}", self.request.bytes);
                if let Err(e) = self.transport.send(&self.request.bytes).await {
                    warn!("retransmission failed: {}", e);
                    return RequestOutcome::Error;
                }
            }

            match time::timeout(self.options.timeout, self.receive(&mut acknowledged)).await {
                Ok(outcome) => return outcome,
                Err(_) => continue,
            }
        }

        RequestOutcome::Timeout {
            message_id: self.request.message_id,
        }
    }

    async fn receive(&self, acknowledged: &mut bool) -> RequestOutcome {
        let mut buf = vec![0u8; COAP_MTU];

        loop {
            let n = match self.transport.recv(&mut buf).await {
                Ok((n, _)) => n,
                Err(e) => {
                    warn!("receive failed: {}", e);
                    return RequestOutcome::Error;
                }
            };

            let packet = match Packet::from_bytes(&buf[..n]) {
                Ok(packet) => packet,
                Err(_) => {
                    debug!("Error decoding packet: {:?}", &buf[..n]);
                    continue;
                }
            };

            let same_message = packet.header.message_id == self.request.message_id;
            let kind = packet.header.get_type();

            if kind == MessageType::Reset && same_message {
                return RequestOutcome::Error;
            }
            if kind == MessageType::Acknowledgement
                && same_message
                && packet.header.code == MessageClass::Empty
            {
                // separate response follows
                debug!("request {} acknowledged", self.request.message_id);
                *acknowledged = true;
                continue;
            }
            if matches!(packet.header.code, MessageClass::Response(_))
                && packet.get_token() == self.request.token
            {
                if kind == MessageType::Confirmable {
                    self.acknowledge(&packet).await;
                }
                return RequestOutcome::Response(packet);
            }

            trace!("ignoring unrelated packet {:?}", packet);
        }
    }

    async fn acknowledge(&self, response: &Packet) {
        let mut ack = Packet::new();
        ack.header.set_type(MessageType::Acknowledgement);
        ack.header.code = MessageClass::Empty;
        ack.header.message_id = response.header.message_id;

        match ack.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.transport.send(&bytes).await {
                    warn!("acknowledging response failed: {}", e);
                }
            }
            Err(_) => warn!("could not encode acknowledgement"),
        }
    }
}

/// Strips the brackets around an IPv6 literal.
pub fn strip_brackets(host: &str) -> Result<String> {
    let re = Regex::new(r"^\[(.*?)]$").map_err(|e| Error::new(ErrorKind::Other, e))?;
    Ok(re.replace(host, "$1").to_string())
}

/// Splits a `coap://host[:port]/path` URL into scheme, host, port and path.
pub fn parse_coap_url(url: &str) -> Result<(String, String, u16, String)> {
    let url_params = match Url::parse(url) {
        Ok(url_params) => url_params,
        Err(_) => return Err(Error::new(ErrorKind::InvalidInput, "url error")),
    };

    let scheme = url_params.scheme().to_string();
    if scheme != "coap" {
        return Err(Error::new(ErrorKind::InvalidInput, "scheme error"));
    }

    let host = match url_params.host_str() {
        Some("") => return Err(Error::new(ErrorKind::InvalidInput, "host error")),
        Some(h) => h,
        None => return Err(Error::new(ErrorKind::InvalidInput, "host error")),
    };
    let host = strip_brackets(host)?;

    let port = url_params.port().unwrap_or(COAP_PORT);

    let path = url_params.path().to_string();

    Ok((scheme, host, port, path))
}
