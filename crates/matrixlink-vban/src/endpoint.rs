//! Remote engine endpoint.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::{VbanError, VbanResult};

/// Size of the NUL-padded stream name field in every header.
pub const STREAM_NAME_LEN: usize = 16;

/// A VBAN stream name of at most 16 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamName(String);

impl StreamName {
    /// Validate a stream name.
    ///
    /// # Errors
    /// Returns [`VbanError::InvalidEndpointConfig`] if the name is longer than
    /// 16 bytes or contains a NUL byte.
    pub fn new(name: impl Into<String>) -> VbanResult<Self> {
        let name = name.into();
        if name.len() > STREAM_NAME_LEN {
            return Err(VbanError::InvalidEndpointConfig(format!(
                "stream name {name:?} is {} bytes, at most {STREAM_NAME_LEN} allowed",
                name.len()
            )));
        }
        if name.contains('\0') {
            return Err(VbanError::InvalidEndpointConfig(format!(
                "stream name {name:?} contains a NUL byte"
            )));
        }
        Ok(Self(name))
    }

    /// The name as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a NUL-padded header field.
    #[must_use]
    pub fn to_field(&self) -> [u8; STREAM_NAME_LEN] {
        let mut field = [0u8; STREAM_NAME_LEN];
        field[..self.0.len()].copy_from_slice(self.0.as_bytes());
        field
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address and stream of the remote mixing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    addr: SocketAddr,
    stream_name: StreamName,
}

impl Endpoint {
    /// Create an endpoint from an already parsed address.
    #[must_use]
    pub fn new(addr: SocketAddr, stream_name: StreamName) -> Self {
        Self { addr, stream_name }
    }

    /// Create an endpoint from settings values.
    ///
    /// # Errors
    /// Returns [`VbanError::InvalidEndpointConfig`] if the IP does not parse,
    /// the port is outside 1-65535, or the stream name is invalid.
    pub fn parse(ip: &str, port: i64, stream_name: &str) -> VbanResult<Self> {
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|e| VbanError::InvalidEndpointConfig(format!("remote IP {ip:?}: {e}")))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| VbanError::InvalidEndpointConfig(format!("remote port {port} out of range")))?;
        Ok(Self::new(SocketAddr::new(ip, port), StreamName::new(stream_name)?))
    }

    /// Remote socket address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// VBAN stream name.
    #[must_use]
    pub fn stream_name(&self) -> &StreamName {
        &self.stream_name
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.stream_name, self.addr)
    }
}
