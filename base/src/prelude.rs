//! The prelude exports the types which turn up in almost every
//! signature of the emulator: the processor status word, the operand
//! datatypes, the exception codes and the opcode tables.  Providing
//! this prelude is the main purpose of the base crate.
pub use super::datatype::{Datatype, ReservedDatatype};
pub use super::exception::{ExceptionClass, NormalException, ResetException, StackException};
pub use super::instruction::{Mnemonic, Opcode, OperandClass, Roles};
pub use super::psw::{self, ExecutionLevel};
pub use super::registers;
