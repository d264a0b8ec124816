use std::{
    collections::BTreeSet,
    fmt::{Debug, Display},
    net::{Ipv4Addr, SocketAddr},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use rayon::ThreadPoolBuilder;

use crate::error::ScanError;

use self::{
    cancel::CancelToken,
    probe::{Prober, TcpConnect, DEFAULT_TIMEOUT},
    queue::WorkQueue,
};

pub mod cancel;
pub mod probe;
pub mod queue;

/// Worker counts above this are clamped, past it we mostly hit fd limits.
pub const MAX_WORKERS: usize = 5000;

pub const FIRST_PORT: u16 = 1;
pub const LAST_PORT: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// Every port was probed.
    Complete,
    /// Stopped early, results are partial.
    Cancelled,
}

impl Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ScanStatus::Complete => "complete",
                ScanStatus::Cancelled => "cancelled",
            }
        )
    }
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Open ports, ascending.
    pub open: Vec<u16>,
    pub elapsed: Duration,
    pub status: ScanStatus,
    /// Ports fully processed.
    pub probed: u64,
    /// Ports that were queued.
    pub total: u64,
}

/// Open ports found so far, shared by all workers.
///
/// The lock only covers the insertion, never a connect.
#[derive(Debug, Default)]
pub struct OpenPorts {
    ports: Mutex<BTreeSet<u16>>,
}

impl OpenPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the port was already recorded.
    pub fn insert(&self, port: u16) -> bool {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port)
    }

    pub fn into_sorted(self) -> Vec<u16> {
        self.ports
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .collect()
    }
}

/// Marks the fetched port as done when dropped, even if the probe panicked,
/// so the coordinator never waits on a port nobody will finish.
struct DoneGuard<'a>(&'a WorkQueue);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_done();
    }
}

type OpenListener = Box<dyn Fn(u16) + Send + Sync>;

pub struct Scanner {
    ip: Ipv4Addr,
    workers: usize,
    lower: u16,
    upper: u16,
    timeout: Duration,
    prober: Option<Box<dyn Prober>>,
    cancel: CancelToken,
    on_open: Option<OpenListener>,
}

impl Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("ip", &self.ip)
            .field("workers", &self.workers)
            .field("ports", &(self.lower..=self.upper))
            .field("timeout", &self.timeout)
            .field("prober", &self.prober)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// Scanner for every TCP port of `ip` using `workers` concurrent probes.
    pub fn new(ip: Ipv4Addr, workers: usize) -> Result<Self, ScanError> {
        if workers == 0 {
            return Err(ScanError::InvalidWorkerCount(workers.to_string()));
        }

        let workers = if workers > MAX_WORKERS {
            log::warn!(
                "Clamping worker count from {} to {}",
                workers,
                MAX_WORKERS
            );
            MAX_WORKERS
        } else {
            workers
        };

        Ok(Self {
            ip,
            workers,
            lower: FIRST_PORT,
            upper: LAST_PORT,
            timeout: DEFAULT_TIMEOUT,
            prober: None,
            cancel: CancelToken::new(),
            on_open: None,
        })
    }

    /// Connect timeout of the default TCP prober. Ignored by a custom prober.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Restricts the scan to `lower..=upper`.
    pub fn ports(mut self, lower: u16, upper: u16) -> Result<Self, ScanError> {
        if lower == 0 || lower > upper {
            return Err(ScanError::InvalidPortRange(format!("{}-{}", lower, upper)));
        }

        self.lower = lower;
        self.upper = upper;
        Ok(self)
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called from the worker that found `port` open, right after it was recorded.
    pub fn on_open<F>(mut self, listener: F) -> Self
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        self.on_open = Some(Box::new(listener));
        self
    }

    pub fn prober<P>(mut self, prober: P) -> Self
    where
        P: Prober + 'static,
    {
        self.prober = Some(Box::new(prober));
        self
    }

    #[inline]
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn worker(&self, prober: &dyn Prober, queue: &WorkQueue, open: &OpenPorts) {
        while !self.cancel.is_cancelled() {
            let Some(port) = queue.fetch() else {
                break;
            };
            let _done = DoneGuard(queue);

            let addr = SocketAddr::from((self.ip, port));
            let outcome = prober.probe(&addr);
            if !outcome.is_open() {
                log::trace!("Port {} is {}", port, outcome);
                continue;
            }

            if open.insert(port) {
                if let Some(listener) = &self.on_open {
                    listener(port);
                }
            }
        }
    }

    /// Probes every configured port and blocks until all of them were
    /// processed or the cancel token fired.
    pub fn scan(&self) -> Result<ScanResult, ScanError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("tscan-worker-{}", i))
            .build()
            .map_err(ScanError::WorkerPoolFailed)?;

        let default_prober;
        let prober: &dyn Prober = match &self.prober {
            Some(prober) => prober.as_ref(),
            None => {
                default_prober = TcpConnect::new(self.timeout);
                &default_prober
            }
        };

        let queue = WorkQueue::new();
        let open = OpenPorts::new();

        queue.enqueue_all(self.lower, self.upper);
        queue.close();
        let total = queue.stats().enqueued;

        log::debug!(
            "Scanning ports {}-{} of `{}` with {} workers",
            self.lower,
            self.upper,
            self.ip,
            self.workers
        );

        let now = Instant::now();
        let (queue, open_ref) = (&queue, &open);

        // The coordinator waits on this thread, outside the pool, so all
        // `workers` threads are probing.
        let complete = pool.in_place_scope(|s| {
            for _ in 0..self.workers {
                s.spawn(move |_| self.worker(prober, queue, open_ref));
            }

            let complete = queue.wait_all_done_or_cancel(&self.cancel);
            // Wakes workers still parked on the empty queue.
            queue.shutdown();
            complete
        });

        let elapsed = now.elapsed();
        let stats = queue.stats();
        let status = if complete {
            ScanStatus::Complete
        } else {
            log::debug!(
                "Scan cancelled after {} of {} ports",
                stats.done,
                total
            );
            ScanStatus::Cancelled
        };

        Ok(ScanResult {
            open: open.into_sorted(),
            elapsed,
            status,
            probed: stats.done,
            total,
        })
    }
}
