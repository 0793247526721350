//! Privilege probes for operations that require root.
//!
//! Managing project quotas needs `CAP_SYS_ADMIN`; like the rest of the
//! runtime we approximate that with an effective-UID check.

/// Returns whether the current process runs with an effective UID of 0.
#[must_use]
pub fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_matches_euid() {
        assert_eq!(is_privileged(), nix::unistd::Uid::effective().as_raw() == 0);
    }
}
