use std::io::{Error, ErrorKind, Result};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use crate::observer::DEFAULT_MAX_REGISTRATIONS;

pub const COAP_PORT: u16 = 5683;

/// RequestOptions for configuring outbound requests
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Number of transmissions before giving up
    pub retries: usize,

    /// Time to wait for a response after each transmission
    pub timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Address the CoAP server binds to
    pub listen: SocketAddr,

    /// Period of the notification task
    pub notify_period: Duration,

    /// Resource whose observers are notified every period
    pub observed_path: String,

    /// Maximum number of concurrent Observe registrations
    pub max_observers: usize,

    pub request: RequestOptions,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), COAP_PORT),
            notify_period: Duration::from_secs(2),
            observed_path: "/cli/stats".to_string(),
            max_observers: DEFAULT_MAX_REGISTRATIONS,
            request: RequestOptions::default(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.notify_period.is_zero() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "notify period must be positive",
            ));
        }
        if self.request.retries == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "at least one transmission is required",
            ));
        }
        if crate::resources::observable(&self.observed_path).is_none() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not an observable resource", self.observed_path),
            ));
        }
        Ok(())
    }
}
