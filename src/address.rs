//! Server address parsing and the last-known-address hook

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;

use crate::{PosecastError, Result};

/// Validated server address in `a.b.c.d:port` form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress(SocketAddr);

impl ServerAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl From<SocketAddr> for ServerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl From<ServerAddress> for SocketAddr {
    fn from(addr: ServerAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerAddress {
    type Err = PosecastError;

    /// Accepts exactly four dotted groups of 1-3 digits, a colon and 1-5 port digits
    fn from_str(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let invalid = |details: &str| PosecastError::Address {
            input: trimmed.to_string(),
            details: details.to_string(),
        };

        let (host, port) = trimmed.split_once(':').ok_or_else(|| invalid("missing ':port'"))?;

        let groups: Vec<&str> = host.split('.').collect();
        let well_formed = groups.len() == 4
            && groups.iter().all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()));
        if !well_formed {
            return Err(invalid("host must be four dotted groups of 1-3 digits"));
        }
        if !(1..=5).contains(&port.len()) || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("port must be 1-5 digits"));
        }

        let ip: Ipv4Addr = host.parse().map_err(|_| invalid("not a valid IPv4 address"))?;
        let port: u16 = port.parse().map_err(|_| invalid("port out of range"))?;
        Ok(Self::new(IpAddr::V4(ip), port))
    }
}

/// Persisted "last known server" used to prefill reconnection
#[async_trait::async_trait]
pub trait AddressStore: Send + Sync + 'static {
    async fn load(&self) -> Result<Option<ServerAddress>>;

    async fn save(&self, address: &ServerAddress) -> Result<()>;
}

/// Stores the address as a single line of text
#[derive(Debug, Clone)]
pub struct FileAddressStore {
    path: PathBuf,
}

impl FileAddressStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl AddressStore for FileAddressStore {
    async fn load(&self) -> Result<Option<ServerAddress>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => text.parse().map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PosecastError::file_error(self.path.clone(), e)),
        }
    }

    async fn save(&self, address: &ServerAddress) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PosecastError::file_error(parent.to_path_buf(), e))?;
        }
        tokio::fs::write(&self.path, format!("{}\n", address))
            .await
            .map_err(|e| PosecastError::file_error(self.path.clone(), e))?;
        debug!(%address, path = %self.path.display(), "Saved server address");
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryAddressStore {
    address: Mutex<Option<ServerAddress>>,
}

impl MemoryAddressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ServerAddress> {
        *self.address.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl AddressStore for MemoryAddressStore {
    async fn load(&self) -> Result<Option<ServerAddress>> {
        Ok(self.get())
    }

    async fn save(&self, address: &ServerAddress) -> Result<()> {
        *self.address.lock().unwrap_or_else(|e| e.into_inner()) = Some(*address);
        Ok(())
    }
}
