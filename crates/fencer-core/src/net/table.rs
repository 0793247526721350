//! Parser for the procfs TCP tables (`/proc/net/tcp`, `/proc/net/tcp6`).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use super::{AddressFamily, SocketInfo, SocketState};

/// Column holding the local address.
const LOCAL_COLUMN: usize = 1;
/// Column holding the remote address.
const REMOTE_COLUMN: usize = 2;
/// Column holding the hex state code.
const STATE_COLUMN: usize = 3;
/// Column holding the socket inode.
const INODE_COLUMN: usize = 9;

/// Parses a whole table, skipping the header and any malformed row.
#[must_use]
pub fn parse_socket_table(content: &str, family: AddressFamily) -> Vec<SocketInfo> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let info = parse_row(line, family);
            if info.is_none() {
                tracing::trace!(line, "skipping malformed socket table row");
            }
            info
        })
        .collect()
}

/// Parses one table row.
#[must_use]
pub fn parse_row(line: &str, family: AddressFamily) -> Option<SocketInfo> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    let local = parse_address(columns.get(LOCAL_COLUMN)?, family)?;
    let remote = parse_address(columns.get(REMOTE_COLUMN)?, family)?;
    let state = u8::from_str_radix(columns.get(STATE_COLUMN)?, 16).ok()?;
    let inode = columns.get(INODE_COLUMN)?.parse::<u64>().ok()?;
    Some(SocketInfo {
        family,
        local,
        remote,
        state: SocketState::from_code(state),
        inode,
    })
}

/// Parses `ADDR:PORT` where both halves are hex.
///
/// The kernel prints each 32-bit word of the address in host byte order,
/// so each word is converted back through its native-endian bytes.
#[must_use]
pub fn parse_address(field: &str, family: AddressFamily) -> Option<SocketAddr> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let ip = match family {
        AddressFamily::Inet => {
            let word = u32::from_str_radix(addr, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        AddressFamily::Inet6 => {
            if addr.len() != 32 {
                return None;
            }
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let word = u32::from_str_radix(addr.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };
    Some(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_endian = "little")]
    fn parses_loopback_v4() {
        let addr = parse_address("0100007F:1F90", AddressFamily::Inet).expect("addr");
        assert_eq!(addr, "127.0.0.1:8080".parse().expect("literal"));
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn parses_loopback_v6() {
        let addr = parse_address(
            "00000000000000000000000001000000:0050",
            AddressFamily::Inet6,
        )
        .expect("addr");
        assert_eq!(addr, "[::1]:80".parse().expect("literal"));
    }

    #[test]
    fn parses_any_v4() {
        let addr = parse_address("00000000:0016", AddressFamily::Inet).expect("addr");
        assert_eq!(addr.port(), 22);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn rejects_short_v6_address() {
        assert!(parse_address("0000:0050", AddressFamily::Inet6).is_none());
    }

    #[test]
    fn row_yields_state_and_inode() {
        let row = "   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 4242 1";
        let info = parse_row(row, AddressFamily::Inet).expect("row");
        assert_eq!(info.state, SocketState::Listen);
        assert_eq!(info.inode, 4242);
        assert_eq!(info.local.port(), 8080);
    }

    #[test]
    fn truncated_row_is_skipped() {
        let table = "header\n   0: 00000000:1F90 00000000:0000 0A\n";
        assert!(parse_socket_table(table, AddressFamily::Inet).is_empty());
    }
}
