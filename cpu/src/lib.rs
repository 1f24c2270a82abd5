//! This crate emulates the WE32100 processor of the AT&T 3B2/400
//! system board: instruction decode and execution, the WE32101 MMU,
//! physical memory and IO dispatch, and the exception, interrupt and
//! process-switch machinery.
#![crate_name = "cpu"]

mod bus;
mod control;
mod decode;
mod history;
mod mmu;

pub use bus::{
    AccessWidth, Bus, BusFault, Device, IrqLine, IrqRequest, MemoryConfiguration, RamSize,
    RomImageError,
};
pub use control::{Cpu, StopReason};
pub use decode::{DecodedInstruction, Operand};
pub use history::History;
pub use mmu::Mmu;
