//! RISC-V GDB remote debug bridge: terminates the GDB Remote Serial
//! Protocol on one side and drives a RISC-V External Debug Module (DM
//! v0.13) over a Debug Module Interface on the other.

pub mod dm;
pub mod elf;
pub mod error;
pub mod rsp;
pub mod session;
