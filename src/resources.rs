//! The node's resource table and its handlers.
//!
//! Every resource answers with a short text representation. The table is
//! kept sorted by path and matched exactly; there are no path parameters.

pub use coap_lite::{ContentFormat, RequestType as Method, ResponseType as Status};
use std::fmt;

use crate::format::{decimal_u16, decimal_u32, fixed_point};
use crate::state::NodeState;

pub const WELL_KNOWN_CORE: &str = "/.well-known/core";

pub type HandlerFn = fn(&NodeState) -> Result<Representation, HandlerError>;

pub struct Resource {
    pub path: &'static str,
    pub method: Method,
    pub handler: HandlerFn,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("path", &self.path)
            .field("method", &self.method)
            .finish()
    }
}

pub static RESOURCES: [Resource; 4] = [
    Resource {
        path: "/cli/stats",
        method: Method::Get,
        handler: stats,
    },
    Resource {
        path: "/humidity",
        method: Method::Get,
        handler: humidity,
    },
    Resource {
        path: "/pressure",
        method: Method::Get,
        handler: pressure,
    },
    Resource {
        path: "/temperature",
        method: Method::Get,
        handler: temperature,
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub payload: Vec<u8>,
    pub format: ContentFormat,
}

impl Representation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: text.into().into_bytes(),
            format: ContentFormat::TextPlain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    Unavailable(String),
    Internal(String),
}

impl HandlerError {
    pub fn status(&self) -> Status {
        match self {
            HandlerError::Unavailable(_) => Status::ServiceUnavailable,
            HandlerError::Internal(_) => Status::InternalServerError,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Unavailable(reason) => write!(f, "Unavailable: {}", reason),
            HandlerError::Internal(reason) => write!(f, "Internal error: {}", reason),
        }
    }
}

impl std::error::Error for HandlerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    NotFound,
    MethodNotAllowed,
}

impl DispatchError {
    pub fn status(&self) -> Status {
        match self {
            DispatchError::NotFound => Status::NotFound,
            DispatchError::MethodNotAllowed => Status::MethodNotAllowed,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NotFound => write!(f, "Not found"),
            DispatchError::MethodNotAllowed => write!(f, "Method not allowed"),
        }
    }
}

/// A complete answer to a request: status, optional content format and
/// payload. Error answers carry a diagnostic text payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: Status,
    pub format: Option<ContentFormat>,
    pub payload: Vec<u8>,
}

impl Reply {
    fn diagnostic(status: Status, text: String) -> Self {
        Self {
            status,
            format: Some(ContentFormat::TextPlain),
            payload: text.into_bytes(),
        }
    }
}

impl From<Representation> for Reply {
    fn from(representation: Representation) -> Self {
        Self {
            status: Status::Content,
            format: Some(representation.format),
            payload: representation.payload,
        }
    }
}

impl From<DispatchError> for Reply {
    fn from(error: DispatchError) -> Self {
        Self::diagnostic(error.status(), error.to_string())
    }
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_matches('/') == b.trim_matches('/')
}

/// Looks up the resource for `path` and `method`.
pub fn find(path: &str, method: Method) -> Result<&'static Resource, DispatchError> {
    let mut path_known = false;
    for resource in RESOURCES.iter() {
        if same_path(resource.path, path) {
            if resource.method == method {
                return Ok(resource);
            }
            path_known = true;
        }
    }

    if path_known {
        Err(DispatchError::MethodNotAllowed)
    } else {
        Err(DispatchError::NotFound)
    }
}

/// Looks up the GET resource at `path`, ignoring slashes at either end.
pub fn observable(path: &str) -> Option<&'static Resource> {
    find(path, Method::Get).ok()
}

/// Lists the resource table in CoRE link format.
pub fn well_known_core() -> Representation {
    let links: Vec<String> = RESOURCES
        .iter()
        .map(|resource| format!("<{}>", resource.path))
        .collect();
    Representation {
        payload: links.join(",").into_bytes(),
        format: ContentFormat::ApplicationLinkFormat,
    }
}

/// Answers a request for `path` with `method`.
pub fn respond(state: &NodeState, method: Method, path: &str) -> Reply {
    if same_path(path, WELL_KNOWN_CORE) {
        return match method {
            Method::Get => well_known_core().into(),
            _ => DispatchError::MethodNotAllowed.into(),
        };
    }

    let resource = match find(path, method) {
        Ok(resource) => resource,
        Err(error) => return error.into(),
    };

    match (resource.handler)(state) {
        Ok(representation) => representation.into(),
        Err(error) => Reply::diagnostic(error.status(), error.to_string()),
    }
}

/// Count of requests sent from the shell.
fn stats(state: &NodeState) -> Result<Representation, HandlerError> {
    Ok(Representation::text(decimal_u16(state.requests_sent())))
}

fn temperature(state: &NodeState) -> Result<Representation, HandlerError> {
    let temperature = state.with_sensor(|sensor| sensor.read_temperature())?;
    Ok(Representation::text(fixed_point(temperature as i32, 2)))
}

fn pressure(state: &NodeState) -> Result<Representation, HandlerError> {
    let pressure = state.with_sensor(|sensor| sensor.read_pressure())?;
    Ok(Representation::text(decimal_u32(pressure)))
}

fn humidity(state: &NodeState) -> Result<Representation, HandlerError> {
    let humidity = state.with_sensor(|sensor| {
        // compensation uses the temperature and pressure of this session
        sensor.read_temperature()?;
        sensor.read_pressure()?;
        sensor.read_humidity()
    })?;
    Ok(Representation::text(fixed_point(humidity as i32, 2)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sensor::{EnvironmentSensor, SensorError};

    struct FixedSensor {
        temperature_read: bool,
    }

    impl EnvironmentSensor for FixedSensor {
        fn read_temperature(&mut self) -> Result<i16, SensorError> {
            self.temperature_read = true;
            Ok(-125)
        }

        fn read_pressure(&mut self) -> Result<u32, SensorError> {
            Ok(99_870)
        }

        fn read_humidity(&mut self) -> Result<u16, SensorError> {
            if self.temperature_read {
                Ok(4321)
            } else {
                Err(SensorError::NotCalibrated)
            }
        }
    }

    fn state_with_sensor() -> NodeState {
        NodeState::new(Some(Box::new(FixedSensor {
            temperature_read: false,
        })))
    }

    #[test]
    fn test_table_is_sorted() {
        let paths: Vec<&str> = RESOURCES.iter().map(|r| r.path).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn test_find() {
        assert_eq!(find("cli/stats", Method::Get).unwrap().path, "/cli/stats");
        assert_eq!(find("/temperature/", Method::Get).unwrap().path, "/temperature");
        assert_eq!(
            find("/temperature", Method::Put).unwrap_err(),
            DispatchError::MethodNotAllowed
        );
        assert_eq!(find("/wind", Method::Get).unwrap_err(), DispatchError::NotFound);
        assert_eq!(find("/cli", Method::Get).unwrap_err(), DispatchError::NotFound);
    }

    #[test]
    fn test_sensor_resources() {
        let state = state_with_sensor();

        let reply = respond(&state, Method::Get, "temperature");
        assert_eq!(reply.status, Status::Content);
        assert_eq!(reply.format, Some(ContentFormat::TextPlain));
        assert_eq!(reply.payload, b"-1.25".to_vec());

        let reply = respond(&state, Method::Get, "pressure");
        assert_eq!(reply.payload, b"99870".to_vec());

        let reply = respond(&state, Method::Get, "humidity");
        assert_eq!(reply.payload, b"43.21".to_vec());
    }

    #[test]
    fn test_humidity_reads_temperature_first() {
        let state = state_with_sensor();
        let reply = respond(&state, Method::Get, "/humidity");
        assert_eq!(reply.status, Status::Content);
    }

    #[test]
    fn test_stats() {
        let state = NodeState::new(None);
        state.record_request_sent();
        state.record_request_sent();
        let reply = respond(&state, Method::Get, "cli/stats");
        assert_eq!(reply.status, Status::Content);
        assert_eq!(reply.payload, b"2".to_vec());
    }

    #[test]
    fn test_errors() {
        let state = NodeState::new(None);

        let reply = respond(&state, Method::Get, "temperature");
        assert_eq!(reply.status, Status::ServiceUnavailable);

        let reply = respond(&state, Method::Post, "cli/stats");
        assert_eq!(reply.status, Status::MethodNotAllowed);

        let reply = respond(&state, Method::Get, "nothing/here");
        assert_eq!(reply.status, Status::NotFound);
        assert_eq!(reply.payload, b"Not found".to_vec());
    }

    #[test]
    fn test_well_known_core() {
        let state = NodeState::new(None);
        let reply = respond(&state, Method::Get, ".well-known/core");
        assert_eq!(reply.status, Status::Content);
        assert_eq!(reply.format, Some(ContentFormat::ApplicationLinkFormat));
        assert_eq!(
            String::from_utf8(reply.payload).unwrap(),
            "</cli/stats>,</humidity>,</pressure>,</temperature>"
        );
    }
}
