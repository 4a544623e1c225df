//! In-process embedded controller.
//!
//! Speaks the same command/status handshake as the real controller over a
//! 256-byte register file. Used as the default backend in development and
//! as the hardware double in tests: stalls, access denial and animated
//! sensor registers can be injected, and every completed write is logged.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::error::{EcError, EcResult};
use super::ports::{EcPorts, PortPair, EC_CMD_READ, EC_CMD_WRITE, EC_STATUS_BUSY};

/// Simulation aggressiveness for animated sensor registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimLevel {
    Off,
    #[default]
    Low,
    High,
}

impl SimLevel {
    /// Swing in °C over one animation period.
    fn amplitude(self) -> f32 {
        match self {
            SimLevel::Off => 0.0,
            SimLevel::Low => 10.0,
            SimLevel::High => 25.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitReadAddress,
    AwaitWriteAddress,
    AwaitWriteValue(u8),
    ReadReady(u8),
}

#[derive(Debug, Clone, Copy)]
struct Animation {
    base: u8,
    level: SimLevel,
}

#[derive(Debug)]
struct SimState {
    pair: PortPair,
    registers: [u8; 256],
    phase: Phase,
    stalls_pending: u32,
    stall_for: Duration,
    busy_until: Option<Instant>,
    denied: bool,
    port_accesses: u64,
    write_log: Vec<(u8, u8)>,
    animated: BTreeMap<u8, Animation>,
    tick: u64,
}

impl SimState {
    fn busy(&mut self) -> bool {
        match self.busy_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                // A stall abandons whatever transaction was in flight.
                self.busy_until = None;
                self.phase = Phase::Idle;
                false
            }
            None => false,
        }
    }

    fn maybe_stall(&mut self) {
        if self.stalls_pending > 0 {
            self.stalls_pending -= 1;
            self.busy_until = Some(Instant::now() + self.stall_for);
        }
    }

    fn read_register(&mut self, address: u8) -> u8 {
        match self.animated.get(&address) {
            Some(anim) => {
                self.tick = self.tick.wrapping_add(1);
                let p = (self.tick % 60) as f32 / 60.0;
                (anim.base as f32 + p * anim.level.amplitude()).round().min(255.0) as u8
            }
            None => self.registers[address as usize],
        }
    }
}

/// Cloneable handle; clones share one controller.
#[derive(Debug, Clone)]
pub struct SimulatedEc {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedEc {
    pub fn new(pair: PortPair) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                pair,
                registers: [0; 256],
                phase: Phase::Idle,
                stalls_pending: 0,
                stall_for: Duration::ZERO,
                busy_until: None,
                denied: false,
                port_accesses: 0,
                write_log: Vec::new(),
                animated: BTreeMap::new(),
                tick: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_register(&self, address: u8, value: u8) {
        self.lock().registers[address as usize] = value;
    }

    pub fn register(&self, address: u8) -> u8 {
        self.lock().registers[address as usize]
    }

    /// Makes reads of `address` sweep upward from `base` according to `level`.
    pub fn animate(&self, address: u8, base: u8, level: SimLevel) {
        self.lock().animated.insert(address, Animation { base, level });
    }

    /// The next `count` transactions hold the busy bit for `stall_for`
    /// right after their command byte.
    pub fn inject_stalls(&self, count: u32, stall_for: Duration) {
        let mut st = self.lock();
        st.stalls_pending = count;
        st.stall_for = stall_for;
    }

    pub fn deny_access(&self, denied: bool) {
        self.lock().denied = denied;
    }

    /// Completed register writes, oldest first.
    pub fn write_log(&self) -> Vec<(u8, u8)> {
        self.lock().write_log.clone()
    }

    pub fn port_accesses(&self) -> u64 {
        self.lock().port_accesses
    }
}

impl EcPorts for SimulatedEc {
    fn inb(&mut self, port: u16) -> EcResult<u8> {
        let mut st = self.lock();
        if st.denied {
            return Err(EcError::HardwareAccessDenied("simulated controller refused port access".into()));
        }
        st.port_accesses += 1;

        if port == st.pair.command {
            return Ok(if st.busy() { EC_STATUS_BUSY } else { 0 });
        }
        if port == st.pair.data {
            if let Phase::ReadReady(value) = st.phase {
                st.phase = Phase::Idle;
                return Ok(value);
            }
            return Ok(0xFF);
        }
        Ok(0xFF)
    }

    fn outb(&mut self, port: u16, value: u8) -> EcResult<()> {
        let mut st = self.lock();
        if st.denied {
            return Err(EcError::HardwareAccessDenied("simulated controller refused port access".into()));
        }
        st.port_accesses += 1;

        if port == st.pair.command {
            st.phase = match value {
                EC_CMD_READ => Phase::AwaitReadAddress,
                EC_CMD_WRITE => Phase::AwaitWriteAddress,
                _ => Phase::Idle,
            };
            if st.phase != Phase::Idle {
                st.maybe_stall();
            }
            return Ok(());
        }

        if port == st.pair.data {
            st.phase = match st.phase {
                Phase::AwaitReadAddress => Phase::ReadReady(st.read_register(value)),
                Phase::AwaitWriteAddress => Phase::AwaitWriteValue(value),
                Phase::AwaitWriteValue(address) => {
                    st.registers[address as usize] = value;
                    st.write_log.push((address, value));
                    Phase::Idle
                }
                other => other,
            };
        }
        Ok(())
    }
}
