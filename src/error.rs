use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("worker count `{0}` is invalid (expected a positive integer)")]
    InvalidWorkerCount(String),
    #[error("port range `{0}` is invalid (expected LOW-HIGH within 1-65535)")]
    InvalidPortRange(String),
    #[error("failed to check target kind (ensure it's a domain or IPv4)")]
    HostParseFailed(#[source] url::ParseError),
    #[error("failed to resolve the given target: {0}")]
    ResolverFailed(#[source] std::io::Error),
    #[error("resolver didn't find any IPv4 address mapped by `{0}`")]
    DomainLookupFailed(String),
    #[error("only supports IPv4 addresses or domains that map addresses with this IP version")]
    OnlyIpv4TargetSupported,
    #[error("failed to start the worker pool: {0}")]
    WorkerPoolFailed(#[source] rayon::ThreadPoolBuildError),
    #[error("failed to install the interrupt handler: {0}")]
    SignalHandlerFailed(#[source] ctrlc::Error),
}
