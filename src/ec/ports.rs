use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{EcError, EcResult};

/// Command issued on the command port to start a register read.
pub const EC_CMD_READ: u8 = 0x80;
/// Command issued on the command port to start a register write.
pub const EC_CMD_WRITE: u8 = 0x81;
/// Status bit set while the controller's input buffer is full.
pub const EC_STATUS_BUSY: u8 = 0x02;

/// The two I/O ports of the controller handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub command: u16,
    pub data: u16,
}

impl Default for PortPair {
    fn default() -> Self {
        Self {
            command: 0x66,
            data: 0x62,
        }
    }
}

/// Raw byte-wide port access. Everything above this trait is platform independent.
pub trait EcPorts: Send {
    fn inb(&mut self, port: u16) -> EcResult<u8>;
    fn outb(&mut self, port: u16, value: u8) -> EcResult<()>;
}

/// Port access through Linux `/dev/port`.
pub struct DevPort {
    file: File,
}

impl DevPort {
    pub const PATH: &'static str = "/dev/port";

    pub fn open() -> EcResult<Self> {
        Self::open_path(Self::PATH)
    }

    pub fn open_path(path: impl AsRef<Path>) -> EcResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| map_io(e, path))?;
        Ok(Self { file })
    }
}

impl EcPorts for DevPort {
    fn inb(&mut self, port: u16) -> EcResult<u8> {
        let mut buf = [0u8; 1];
        self.file
            .seek(SeekFrom::Start(port as u64))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| map_io(e, Path::new(Self::PATH)))?;
        Ok(buf[0])
    }

    fn outb(&mut self, port: u16, value: u8) -> EcResult<()> {
        self.file
            .seek(SeekFrom::Start(port as u64))
            .and_then(|_| self.file.write_all(&[value]))
            .map_err(|e| map_io(e, Path::new(Self::PATH)))
    }
}

fn map_io(err: io::Error, path: &Path) -> EcError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            EcError::HardwareAccessDenied(format!("{}: {}", path.display(), err))
        }
        _ => EcError::PortFault(err),
    }
}
