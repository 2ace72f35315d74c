//! Access to the live machine state that expressions evaluate against.

use thiserror::Error;

/// The two narrow operations the evaluator needs from the machine being
/// debugged. Implemented by the embedding debugger over its register file
/// and memory backing store; both are expected to be synchronous and
/// non-blocking.
pub trait Machine {
    /// Resolve a register name, already stripped of its `$` sigil, to the
    /// register's current value.
    fn lookup_register(&self, name: &str) -> Result<i64, UnknownRegister>;

    /// Read `width` bytes of memory at `address` as an integer value. The
    /// dereference operator always reads 8 bytes.
    fn read_memory(&self, address: i64, width: u8) -> Result<i64, MemoryFault>;
}

/// A register name that the machine does not know.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown register: ${name}")]
pub struct UnknownRegister {
    pub name: String,
}

/// A memory read the machine could not serve.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("memory fault reading {width} bytes at {address:#x}")]
pub struct MemoryFault {
    pub address: i64,
    pub width: u8,
}
