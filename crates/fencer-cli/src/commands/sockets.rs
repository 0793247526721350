//! `fencer sockets`: List the host's listening TCP sockets.

use clap::Args;
use fencer_core::net::{self, AddressFamily};

/// Arguments for the `sockets` command.
#[derive(Args, Debug)]
pub struct SocketsArgs {
    /// Read the IPv6 table instead of the IPv4 one.
    #[arg(long)]
    pub ipv6: bool,
}

/// Executes the `sockets` command.
///
/// # Errors
///
/// Returns an error if the kernel socket table cannot be read.
pub fn execute(args: &SocketsArgs) -> anyhow::Result<()> {
    let family = if args.ipv6 {
        AddressFamily::Inet6
    } else {
        AddressFamily::Inet
    };
    let mut sockets: Vec<_> = net::listening_sockets(family)?.into_values().collect();
    if sockets.is_empty() {
        println!("No listening sockets found.");
        return Ok(());
    }
    sockets.sort_by_key(|s| (s.local.port(), s.inode));

    println!("{:<12} {:<8} {:<40}", "INODE", "PORT", "ADDRESS");
    for s in &sockets {
        println!("{:<12} {:<8} {:<40}", s.inode, s.local.port(), s.local);
    }
    Ok(())
}
