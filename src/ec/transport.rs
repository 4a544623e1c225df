//! Serialized, retried, timeout-bounded register access.
//!
//! All register traffic goes through one worker thread that owns the port
//! backend behind a binary mutex. Callers submit a batch of operations and
//! block on the reply; a batch runs under a single lock hold, so the
//! register sequence of one caller is never interleaved with another's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::{EcError, EcResult};
use super::ports::{EcPorts, PortPair, EC_CMD_READ, EC_CMD_WRITE, EC_STATUS_BUSY};
use super::registers::RegisterMap;
use super::retry::RetryPolicy;
use super::{EcOp, RegisterIo};

/// Handshake timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcTimings {
    /// Deadline for one attempt, across every handshake stage.
    pub timeout_ms: u64,
    pub retries: u32,
    pub backoff_ms: u64,
    pub poll_interval_us: u64,
}

impl Default for EcTimings {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            retries: 2,
            backoff_ms: 10,
            poll_interval_us: 50,
        }
    }
}

impl EcTimings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    /// Upper bound on the time spent on one register operation:
    /// every attempt runs to its deadline and every retry waits out its backoff.
    pub fn worst_case_per_register(&self) -> Duration {
        let attempts = self.retries + 1;
        self.timeout() * attempts + Duration::from_millis(self.backoff_ms) * self.retries
    }

    /// Upper bound for a batch or pass touching `registers` registers.
    pub fn worst_case(&self, registers: usize) -> Duration {
        self.worst_case_per_register() * registers as u32
    }
}

/// Running totals, mirroring the kernel driver's `ec_statistics` node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EcStats {
    pub reads: u64,
    pub writes: u64,
    pub failed_attempts: u64,
    pub retries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    failed_attempts: AtomicU64,
    retries: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EcStats {
        EcStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

struct Request {
    ops: Vec<EcOp>,
    reply: mpsc::Sender<EcResult<Vec<u8>>>,
}

/// Cloneable handle to the register worker.
#[derive(Clone)]
pub struct EcTransport {
    tx: mpsc::Sender<Request>,
    map: Arc<RegisterMap>,
    timings: EcTimings,
    counters: Arc<Counters>,
}

impl EcTransport {
    /// Starts the register worker. The worker exits once every handle is dropped.
    pub fn spawn(
        ports: Box<dyn EcPorts>,
        pair: PortPair,
        map: RegisterMap,
        timings: EcTimings,
    ) -> EcResult<Self> {
        let map = Arc::new(map);
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::channel::<Request>();

        let worker = Worker {
            ports: Mutex::new(ports),
            pair,
            map: Arc::clone(&map),
            timings,
            counters: Arc::clone(&counters),
        };
        thread::Builder::new()
            .name("ec-worker".into())
            .spawn(move || worker.serve(rx))?;

        Ok(Self {
            tx,
            map,
            timings,
            counters,
        })
    }

    pub fn timings(&self) -> EcTimings {
        self.timings
    }

    pub fn stats(&self) -> EcStats {
        self.counters.snapshot()
    }

    pub fn read_named(&self, name: &str) -> EcResult<u8> {
        let address = self.map.resolve(name)?;
        self.read(address)
    }

    pub fn write_named(&self, name: &str, value: u8) -> EcResult<()> {
        let address = self.map.resolve(name)?;
        self.write(address, value)
    }
}

impl RegisterIo for EcTransport {
    fn execute(&self, ops: Vec<EcOp>) -> EcResult<Vec<u8>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Request {
                ops,
                reply: reply_tx,
            })
            .map_err(|_| EcError::TransportClosed)?;
        reply_rx.recv().map_err(|_| EcError::TransportClosed)?
    }
}

struct Worker {
    ports: Mutex<Box<dyn EcPorts>>,
    pair: PortPair,
    map: Arc<RegisterMap>,
    timings: EcTimings,
    counters: Arc<Counters>,
}

impl Worker {
    fn serve(self, rx: mpsc::Receiver<Request>) {
        for req in rx {
            let res = self.execute(&req.ops);
            // The caller may have given up; nothing to do about it here.
            let _ = req.reply.send(res);
        }
        debug!("ec worker: all handles dropped, exiting");
    }

    fn execute(&self, ops: &[EcOp]) -> EcResult<Vec<u8>> {
        for op in ops {
            let address = op.address();
            if !self.map.contains_address(address) {
                return Err(EcError::InvalidRegister(format!(
                    "address 0x{:02X} is not in the register map",
                    address
                )));
            }
        }

        let mut guard = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        let ports: &mut dyn EcPorts = &mut **guard;
        let policy = self.timings.retry_policy();
        let mut values = Vec::new();

        debug!("ec batch: {} op(s)", ops.len());
        for op in ops {
            match *op {
                EcOp::Read(address) => {
                    let value = policy.run(
                        |attempt| self.attempt(attempt, || self.read_once(ports, address)),
                        |_| self.note_failure(),
                    )?;
                    self.counters.reads.fetch_add(1, Ordering::Relaxed);
                    values.push(value);
                }
                EcOp::Write(address, value) => {
                    policy.run(
                        |attempt| self.attempt(attempt, || self.write_once(ports, address, value)),
                        |_| self.note_failure(),
                    )?;
                    debug!(
                        "ec write 0x{:02X} ({}) = {}",
                        address,
                        self.map.name_of(address).unwrap_or("unnamed"),
                        value
                    );
                    self.counters.writes.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(values)
    }

    fn attempt<T>(&self, attempt: u32, mut f: impl FnMut() -> EcResult<T>) -> EcResult<T> {
        if attempt > 0 {
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
        }
        f()
    }

    fn note_failure(&self) {
        self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn read_once(&self, ports: &mut dyn EcPorts, address: u8) -> EcResult<u8> {
        let started = Instant::now();
        self.wait_ready(ports, address, started)?;
        ports.outb(self.pair.command, EC_CMD_READ)?;
        self.wait_ready(ports, address, started)?;
        ports.outb(self.pair.data, address)?;
        self.wait_ready(ports, address, started)?;
        ports.inb(self.pair.data)
    }

    fn write_once(&self, ports: &mut dyn EcPorts, address: u8, value: u8) -> EcResult<()> {
        let started = Instant::now();
        self.wait_ready(ports, address, started)?;
        ports.outb(self.pair.command, EC_CMD_WRITE)?;
        self.wait_ready(ports, address, started)?;
        ports.outb(self.pair.data, address)?;
        self.wait_ready(ports, address, started)?;
        ports.outb(self.pair.data, value)?;
        self.wait_ready(ports, address, started)
    }

    /// Polls the status port until the busy bit clears or the attempt's deadline passes.
    fn wait_ready(&self, ports: &mut dyn EcPorts, address: u8, started: Instant) -> EcResult<()> {
        let timeout = self.timings.timeout();
        loop {
            let status = ports.inb(self.pair.command)?;
            if status & EC_STATUS_BUSY == 0 {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(EcError::HardwareTimeout {
                    address,
                    waited_ms: waited.as_millis() as u64,
                });
            }
            thread::sleep(self.timings.poll_interval());
        }
    }
}
