use std::{
    fmt::{Debug, Display},
    io,
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

/// Connect timeout used when the caller doesn't pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(600);

/// What a single connection attempt told us about a port.
///
/// Only `Open` ends up in the scan result. The rest are normal outcomes of a
/// scan and are never escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Open,
    Closed,
    TimedOut,
    Unreachable,
    Other(io::ErrorKind),
}

impl ProbeOutcome {
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, ProbeOutcome::Open)
    }

    /// Maps a failed connect to its outcome.
    pub fn classify(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ECONNREFUSED) => return ProbeOutcome::Closed,
            Some(libc::ETIMEDOUT) => return ProbeOutcome::TimedOut,
            Some(libc::EHOSTUNREACH | libc::ENETUNREACH) => return ProbeOutcome::Unreachable,
            _ => (),
        }

        match err.kind() {
            io::ErrorKind::ConnectionRefused => ProbeOutcome::Closed,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeOutcome::TimedOut,
            kind => ProbeOutcome::Other(kind),
        }
    }
}

impl Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Open => write!(f, "open"),
            ProbeOutcome::Closed => write!(f, "closed"),
            ProbeOutcome::TimedOut => write!(f, "timed out"),
            ProbeOutcome::Unreachable => write!(f, "unreachable"),
            ProbeOutcome::Other(kind) => write!(f, "failed ({})", kind),
        }
    }
}

/// Probing primitive run by every worker.
pub trait Prober: Debug + Send + Sync {
    fn probe(&self, addr: &SocketAddr) -> ProbeOutcome;
}

/// Full TCP handshake followed by an immediate close.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnect {
    timeout: Duration,
}

impl TcpConnect {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TcpConnect {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Prober for TcpConnect {
    fn probe(&self, addr: &SocketAddr) -> ProbeOutcome {
        match TcpStream::connect_timeout(addr, self.timeout) {
            Ok(stream) => {
                // Peer may already be gone, the port was open either way.
                let _ = stream.shutdown(Shutdown::Both);
                ProbeOutcome::Open
            }
            Err(e) => ProbeOutcome::classify(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, TcpListener};

    use super::*;

    #[test]
    fn classifies_os_errors() {
        let refused = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        let host = io::Error::from_raw_os_error(libc::EHOSTUNREACH);
        let net = io::Error::from_raw_os_error(libc::ENETUNREACH);
        let timeout = io::Error::from_raw_os_error(libc::ETIMEDOUT);

        assert_eq!(ProbeOutcome::classify(&refused), ProbeOutcome::Closed);
        assert_eq!(ProbeOutcome::classify(&host), ProbeOutcome::Unreachable);
        assert_eq!(ProbeOutcome::classify(&net), ProbeOutcome::Unreachable);
        assert_eq!(ProbeOutcome::classify(&timeout), ProbeOutcome::TimedOut);
    }

    #[test]
    fn classifies_by_kind_without_os_code() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "connection timed out");
        let other = io::Error::new(io::ErrorKind::PermissionDenied, "nope");

        assert_eq!(ProbeOutcome::classify(&timeout), ProbeOutcome::TimedOut);
        assert_eq!(
            ProbeOutcome::classify(&other),
            ProbeOutcome::Other(io::ErrorKind::PermissionDenied)
        );
        assert!(!ProbeOutcome::classify(&other).is_open());
    }

    #[test]
    fn listening_port_is_open() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();

        assert_eq!(TcpConnect::default().probe(&addr), ProbeOutcome::Open);
    }

    #[test]
    fn released_port_is_not_open() {
        let addr = {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            listener.local_addr().unwrap()
        };

        let outcome = TcpConnect::new(Duration::from_millis(200)).probe(&addr);
        assert!(!outcome.is_open(), "got {}", outcome);
    }
}
