//! Kernel socket-table queries.
//!
//! Listening sockets are read from the procfs TCP tables and keyed by
//! inode, so that they can be joined against the socket descriptors held
//! by a container's processes.

pub mod table;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use fencer_common::error::{FencerError, Result};
use serde::Serialize;

/// Default procfs mount point.
pub const PROC_ROOT: &str = "/proc";

/// Address family of a socket table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AddressFamily {
    /// IPv4 (`AF_INET`).
    Inet,
    /// IPv6 (`AF_INET6`).
    Inet6,
}

impl AddressFamily {
    /// Path of the TCP table for this family, relative to the procfs root.
    #[must_use]
    pub const fn tcp_table(self) -> &'static str {
        match self {
            Self::Inet => "net/tcp",
            Self::Inet6 => "net/tcp6",
        }
    }
}

/// TCP socket state as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SocketState {
    /// `TCP_ESTABLISHED`.
    Established,
    /// `TCP_LISTEN`.
    Listen,
    /// Any other state, with its raw kernel code.
    Other(u8),
}

impl SocketState {
    /// Maps a raw kernel state code.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Established,
            0x0A => Self::Listen,
            other => Self::Other(other),
        }
    }
}

/// One row of a kernel socket table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocketInfo {
    /// Address family of the socket.
    pub family: AddressFamily,
    /// Locally bound address.
    pub local: SocketAddr,
    /// Peer address (unspecified for listeners).
    pub remote: SocketAddr,
    /// Connection state.
    pub state: SocketState,
    /// Socket inode; 0 if the kernel did not report one.
    pub inode: u64,
}

impl fmt::Display for SocketInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} inode={}", self.local, self.inode)
    }
}

/// Lists the sockets of `family` in `state` from the procfs at `proc_root`.
///
/// # Errors
///
/// Returns an error if the socket table cannot be read.
pub fn socket_infos_in(
    proc_root: &Path,
    family: AddressFamily,
    state: SocketState,
) -> Result<Vec<SocketInfo>> {
    let path = proc_root.join(family.tcp_table());
    let content = std::fs::read_to_string(&path).map_err(|e| FencerError::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(table::parse_socket_table(&content, family)
        .into_iter()
        .filter(|info| info.state == state)
        .collect())
}

/// Returns the listening sockets of `family`, keyed by inode.
///
/// Rows without an inode are dropped: a zero inode means the kernel did
/// not report one and the socket cannot be attributed to a process.
///
/// # Errors
///
/// Returns an error if the socket table cannot be read.
pub fn listening_sockets_in(
    proc_root: &Path,
    family: AddressFamily,
) -> Result<HashMap<u64, SocketInfo>> {
    let infos = socket_infos_in(proc_root, family, SocketState::Listen)?;
    Ok(infos
        .into_iter()
        .filter(|info| info.inode != 0)
        .map(|info| (info.inode, info))
        .collect())
}

/// Returns the host's listening sockets of `family`, keyed by inode.
///
/// # Errors
///
/// Returns an error if the socket table cannot be read.
pub fn listening_sockets(family: AddressFamily) -> Result<HashMap<u64, SocketInfo>> {
    listening_sockets_in(Path::new(PROC_ROOT), family)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 4242 1 0000000000000000 100 0 0 10 0
   1: 0100007F:0277 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 0 1 0000000000000000 100 0 0 10 0
   2: 0100007F:A1B2 0100007F:1F90 01 00000000:00000000 00:00000000 00000000  1000        0 5151 1 0000000000000000 20 4 30 10 -1
";

    fn proc_with_tcp() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("net")).expect("mkdir");
        std::fs::write(dir.path().join("net/tcp"), TCP).expect("write");
        dir
    }

    #[test]
    fn socket_infos_filters_by_state() {
        let proc_root = proc_with_tcp();
        let established =
            socket_infos_in(proc_root.path(), AddressFamily::Inet, SocketState::Established)
                .expect("read");
        assert_eq!(established.len(), 1);
        assert_eq!(established[0].inode, 5151);
    }

    #[test]
    fn listening_sockets_drop_zero_inode() {
        let proc_root = proc_with_tcp();
        let listeners = listening_sockets_in(proc_root.path(), AddressFamily::Inet).expect("read");
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[&4242].local.port(), 8080);
    }

    #[test]
    fn missing_table_is_io_error() {
        let proc_root = proc_with_tcp();
        assert!(listening_sockets_in(proc_root.path(), AddressFamily::Inet6).is_err());
    }
}
