//! The `base` crate defines the WE32100-related things which are
//! useful in both an emulator and other associated tools.  The idea
//! is that if you want to write a disassembler or a debugger, it
//! would depend on the base crate but would not need to depend on the
//! emulator library itself.

pub mod datatype;
pub mod exception;
pub mod instruction;
pub mod prelude;
pub mod psw;
pub mod registers;
