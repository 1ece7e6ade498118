use coap_lite::{ContentFormat, MessageClass, MessageType, Packet, ResponseType as Status};
use log::{debug, warn};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    net::SocketAddr,
};

use crate::resources::Reply;

pub const DEFAULT_MAX_REGISTRATIONS: usize = 2;

// Observe sequence numbers are 24 bits wide.
const SEQUENCE_MASK: u32 = 0x00ff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveError {
    Full,
}

impl fmt::Display for ObserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserveError::Full => write!(f, "No room for another observer"),
        }
    }
}

impl std::error::Error for ObserveError {}

/// Bookkeeping of Observe registrations.
///
/// A registration is identified by the observer's address and the observed
/// path; registering again replaces the stored token.
pub struct Observer {
    registrations: HashMap<String, Registration>,
    sequences: HashMap<String, u32>,
    max_registrations: usize,
}

#[derive(Debug)]
struct Registration {
    address: SocketAddr,
    resource: String,
    token: Vec<u8>,
    last_message_id: Option<u16>,
}

impl Observer {
    pub fn new(max_registrations: usize) -> Observer {
        Observer {
            registrations: HashMap::new(),
            sequences: HashMap::new(),
            max_registrations,
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn is_observed(&self, path: &str) -> bool {
        let resource = Self::normalize(path);
        self.registrations.values().any(|r| r.resource == resource)
    }

    /// Records a registration and returns the sequence number for the
    /// initial response.
    pub fn register(
        &mut self,
        address: SocketAddr,
        path: &str,
        token: &[u8],
    ) -> Result<u32, ObserveError> {
        let resource = Self::normalize(path);
        let key = Self::format_register_resource(&address, &resource);
        let registrations = self.registrations.len();

        match self.registrations.entry(key) {
            Entry::Occupied(registration) => {
                debug!("re-register {} {}", address, resource);
                registration.into_mut().token = token.to_vec();
            }
            Entry::Vacant(v) => {
                if registrations >= self.max_registrations {
                    warn!("observer table full, not registering {} {}", address, resource);
                    return Err(ObserveError::Full);
                }
                debug!("register {} {}", address, resource);
                v.insert(Registration {
                    address,
                    resource: resource.clone(),
                    token: token.to_vec(),
                    last_message_id: None,
                });
            }
        }

        Ok(*self.sequences.entry(resource).or_insert(0))
    }

    /// Removes the registration of `address` on `path` if `token` matches.
    pub fn deregister(&mut self, address: SocketAddr, path: &str, token: &[u8]) -> bool {
        let resource = Self::normalize(path);
        let key = Self::format_register_resource(&address, &resource);

        match self.registrations.get(&key) {
            Some(registration) if registration.token == token => {
                debug!("deregister {} {}", address, resource);
                self.registrations.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Handles a Reset sent by `address` in answer to the notification with
    /// `message_id`, dropping the matching registration.
    pub fn reset(&mut self, address: SocketAddr, message_id: u16) -> bool {
        let key = self
            .registrations
            .iter()
            .find(|(_, r)| r.address == address && r.last_message_id == Some(message_id))
            .map(|(key, _)| key.clone());

        match key {
            Some(key) => {
                debug!("reset from {}, dropping {}", address, key);
                self.registrations.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Builds one non-confirmable notification per registration on `path`,
    /// advancing the resource's sequence number.
    pub fn notifications<F>(
        &mut self,
        path: &str,
        reply: &Reply,
        mut next_message_id: F,
    ) -> Vec<(Packet, SocketAddr)>
    where
        F: FnMut() -> u16,
    {
        let resource = Self::normalize(path);
        if !self.is_observed(&resource) {
            return Vec::new();
        }

        let sequence = {
            let sequence = self.sequences.entry(resource.clone()).or_insert(0);
            *sequence = (*sequence + 1) & SEQUENCE_MASK;
            *sequence
        };

        let mut messages = Vec::new();
        for registration in self
            .registrations
            .values_mut()
            .filter(|r| r.resource == resource)
        {
            let message_id = next_message_id();
            let mut message = Packet::new();
            message.header.set_type(MessageType::NonConfirmable);
            message.header.code = MessageClass::Response(Status::Content);
            message.header.message_id = message_id;
            message.set_token(registration.token.clone());
            message.set_observe_value(sequence);
            message.set_content_format(reply.format.clone().unwrap_or(ContentFormat::TextPlain));
            message.payload = reply.payload.clone();

            debug!("notify {} {} {}", registration.address, resource, message_id);
            registration.last_message_id = Some(message_id);
            messages.push((message, registration.address));
        }

        messages
    }

    fn normalize(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn format_register_resource(address: &SocketAddr, path: &str) -> String {
        format!("{}${}", address, path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn reply(text: &str) -> Reply {
        Reply {
            status: Status::Content,
            format: Some(ContentFormat::TextPlain),
            payload: text.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_register_and_notify() {
        let mut observer = Observer::new(DEFAULT_MAX_REGISTRATIONS);
        assert_eq!(observer.register(peer(1000), "/cli/stats", b"ab"), Ok(0));
        assert!(observer.is_observed("cli/stats"));

        let mut id = 10;
        let messages = observer.notifications("/cli/stats", &reply("3"), || {
            id += 1;
            id
        });
        assert_eq!(messages.len(), 1);

        let (message, address) = &messages[0];
        assert_eq!(*address, peer(1000));
        assert_eq!(message.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(message.header.code, MessageClass::Response(Status::Content));
        assert_eq!(message.header.message_id, 11);
        assert_eq!(message.get_token(), b"ab");
        assert_eq!(message.payload, b"3".to_vec());
        assert_eq!(message.get_observe_value().unwrap().unwrap(), 1);

        let messages = observer.notifications("cli/stats", &reply("4"), || 20);
        assert_eq!(messages[0].0.get_observe_value().unwrap().unwrap(), 2);
    }

    #[test]
    fn test_unobserved_resource_sends_nothing() {
        let mut observer = Observer::new(DEFAULT_MAX_REGISTRATIONS);
        observer.register(peer(1000), "/humidity", b"ab").unwrap();
        let messages = observer.notifications("/cli/stats", &reply("1"), || 1);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_reregister_replaces_token() {
        let mut observer = Observer::new(1);
        observer.register(peer(1000), "/cli/stats", b"old").unwrap();
        observer.register(peer(1000), "cli/stats", b"new").unwrap();
        assert_eq!(observer.len(), 1);

        let messages = observer.notifications("/cli/stats", &reply("1"), || 1);
        assert_eq!(messages[0].0.get_token(), b"new");
    }

    #[test]
    fn test_table_full() {
        let mut observer = Observer::new(2);
        observer.register(peer(1), "/cli/stats", b"a").unwrap();
        observer.register(peer(2), "/cli/stats", b"b").unwrap();
        assert_eq!(
            observer.register(peer(3), "/cli/stats", b"c"),
            Err(ObserveError::Full)
        );
        assert_eq!(observer.len(), 2);
    }

    #[test]
    fn test_deregister_needs_token() {
        let mut observer = Observer::new(DEFAULT_MAX_REGISTRATIONS);
        observer.register(peer(1000), "/cli/stats", b"ab").unwrap();
        assert!(!observer.deregister(peer(1000), "/cli/stats", b"zz"));
        assert!(observer.deregister(peer(1000), "/cli/stats", b"ab"));
        assert!(observer.is_empty());
    }

    #[test]
    fn test_reset_drops_registration() {
        let mut observer = Observer::new(DEFAULT_MAX_REGISTRATIONS);
        observer.register(peer(1000), "/cli/stats", b"ab").unwrap();
        observer.notifications("/cli/stats", &reply("1"), || 77);

        assert!(!observer.reset(peer(1001), 77));
        assert!(!observer.reset(peer(1000), 78));
        assert!(observer.reset(peer(1000), 77));
        assert!(!observer.is_observed("/cli/stats"));
    }
}
