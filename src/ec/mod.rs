//! Embedded-controller access.
//!
//! Nothing outside this module touches the controller's ports. Everything
//! else talks to it through [`RegisterIo`], which [`EcTransport`] implements.

mod error;
mod ports;
mod registers;
mod retry;
pub mod sim;
mod transport;

pub use error::{EcError, EcResult};
pub use ports::{DevPort, EcPorts, PortPair, EC_CMD_READ, EC_CMD_WRITE, EC_STATUS_BUSY};
pub use registers::{names, ControlRegisters, RegisterMap, SensorRegisters};
pub use retry::RetryPolicy;
pub use transport::{EcStats, EcTimings, EcTransport};

/// One register operation inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcOp {
    Read(u8),
    Write(u8, u8),
}

impl EcOp {
    pub fn address(&self) -> u8 {
        match *self {
            EcOp::Read(address) | EcOp::Write(address, _) => address,
        }
    }
}

/// Register-level capability the core is written against.
pub trait RegisterIo: Send + Sync {
    /// Runs `ops` in order as one uninterrupted sequence and returns the
    /// values of the reads among them.
    fn execute(&self, ops: Vec<EcOp>) -> EcResult<Vec<u8>>;

    fn read(&self, address: u8) -> EcResult<u8> {
        self.execute(vec![EcOp::Read(address)])?
            .pop()
            .ok_or_else(|| EcError::PortFault(std::io::ErrorKind::UnexpectedEof.into()))
    }

    fn write(&self, address: u8, value: u8) -> EcResult<()> {
        self.execute(vec![EcOp::Write(address, value)]).map(|_| ())
    }
}
