//! Exception classes and internal state codes.
//!
//! A fault is described by two PSW fields: the exception type (ET)
//! selects one of four classes, and the internal state code (ISC)
//! identifies the cause within that class.  The handler address is
//! derived from these fields by the gate mechanism, so the numeric
//! values are architectural and must not change.

use serde::Serialize;

/// Exception classes, i.e. the values of the PSW ET field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ExceptionClass {
    Reset = 0,
    Stack = 1,
    Process = 2,
    Normal = 3,
}

impl ExceptionClass {
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Internal state codes of normal (class 3) exceptions and traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum NormalException {
    IntegerZeroDivide = 0,
    TraceTrap = 1,
    IllegalOpcode = 2,
    ReservedOpcode = 3,
    InvalidDescriptor = 4,
    ExternalMemoryFault = 5,
    IllegalLevelChange = 7,
    ReservedDatatype = 8,
    IntegerOverflow = 9,
    PrivilegedOpcode = 10,
    BreakpointTrap = 14,
    PrivilegedRegister = 15,
}

impl NormalException {
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Traps fire after the instruction completes and PC has
    /// advanced; everything else aborts the instruction.
    #[must_use]
    pub const fn is_trap(self) -> bool {
        matches!(
            self,
            NormalException::BreakpointTrap
                | NormalException::IntegerOverflow
                | NormalException::TraceTrap
        )
    }
}

/// Internal state codes of reset (class 0) exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ResetException {
    OldPcbFault = 0,
    SystemDataFault = 1,
    InterruptStackFault = 2,
    ExternalReset = 3,
    NewPcbFault = 4,
    GateVectorFault = 6,
}

impl ResetException {
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Internal state codes of stack (class 1) exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum StackException {
    StackBound = 0,
    StackFault = 1,
    InterruptIdFetch = 3,
}

impl StackException {
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_classification() {
        assert!(NormalException::BreakpointTrap.is_trap());
        assert!(NormalException::IntegerOverflow.is_trap());
        assert!(NormalException::TraceTrap.is_trap());
        assert!(!NormalException::IllegalOpcode.is_trap());
        assert!(!NormalException::ExternalMemoryFault.is_trap());
        assert!(!NormalException::IntegerZeroDivide.is_trap());
    }

    #[test]
    fn architectural_codes() {
        assert_eq!(ExceptionClass::Normal.code(), 3);
        assert_eq!(NormalException::ExternalMemoryFault.code(), 5);
        assert_eq!(NormalException::PrivilegedRegister.code(), 15);
        assert_eq!(ResetException::ExternalReset.code(), 3);
    }
}
