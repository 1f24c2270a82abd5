//! Layout of the Processor Status Word.
//!
//! The PSW is an ordinary 32-bit word living in general register 11,
//! so nothing stops software from writing arbitrary bits to it (the
//! privilege check for doing so lives in the emulator, not here).
//! This module only knows the field layout and provides pure helpers
//! for reading and rewriting fields; the sequences which use them
//! (exception entry, gates, context switches) live in the cpu crate.
//!
//! Field positions, low bit first:
//!
//! | Bits  | Field | Meaning                                    |
//! | ----- | ----- | ------------------------------------------ |
//! | 0-1   | ET    | Exception type                             |
//! | 2     | TM    | Trace mask                                 |
//! | 3-6   | ISC   | Internal state code                        |
//! | 7     | I     | Initial context (PCB has a header block)   |
//! | 8     | R     | Register initial context                   |
//! | 9-10  | PM    | Previous execution level                   |
//! | 11-12 | CM    | Current execution level                    |
//! | 13-16 | IPL   | Interrupt priority level                   |
//! | 17    | TE    | Trace enable                               |
//! | 18    | C     | Carry                                      |
//! | 19    | V     | Overflow                                   |
//! | 20    | Z     | Zero                                       |
//! | 21    | N     | Negative                                   |
//! | 22    | OE    | Enable overflow trap                       |
//! | 23    | CD    | Cache disable                              |
//! | 24    | QIE   | Quick interrupt enable                     |
//! | 25    | CFD   | Cache flush disable                        |

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

pub const ET_SHIFT: u32 = 0;
pub const TM_SHIFT: u32 = 2;
pub const ISC_SHIFT: u32 = 3;
pub const I_SHIFT: u32 = 7;
pub const R_SHIFT: u32 = 8;
pub const PM_SHIFT: u32 = 9;
pub const CM_SHIFT: u32 = 11;
pub const IPL_SHIFT: u32 = 13;

pub const ET_MASK: u32 = 0b11;
pub const TM_MASK: u32 = 1 << TM_SHIFT;
pub const ISC_MASK: u32 = 0b1111 << ISC_SHIFT;
pub const I_MASK: u32 = 1 << I_SHIFT;
pub const R_MASK: u32 = 1 << R_SHIFT;
pub const PM_MASK: u32 = 0b11 << PM_SHIFT;
pub const CM_MASK: u32 = 0b11 << CM_SHIFT;
pub const IPL_MASK: u32 = 0b1111 << IPL_SHIFT;
pub const TE_MASK: u32 = 1 << 17;
pub const C_MASK: u32 = 1 << 18;
pub const V_MASK: u32 = 1 << 19;
pub const Z_MASK: u32 = 1 << 20;
pub const N_MASK: u32 = 1 << 21;
pub const OE_MASK: u32 = 1 << 22;
pub const CD_MASK: u32 = 1 << 23;
pub const QIE_MASK: u32 = 1 << 24;
pub const CFD_MASK: u32 = 1 << 25;

/// The four processor execution levels, most to least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ExecutionLevel {
    Kernel,
    Executive,
    Supervisor,
    User,
}

impl ExecutionLevel {
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            ExecutionLevel::Kernel => 0,
            ExecutionLevel::Executive => 1,
            ExecutionLevel::Supervisor => 2,
            ExecutionLevel::User => 3,
        }
    }

    #[must_use]
    pub const fn from_code(code: u32) -> ExecutionLevel {
        match code & 0b11 {
            0 => ExecutionLevel::Kernel,
            1 => ExecutionLevel::Executive,
            2 => ExecutionLevel::Supervisor,
            _ => ExecutionLevel::User,
        }
    }
}

impl Display for ExecutionLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            ExecutionLevel::Kernel => "kernel",
            ExecutionLevel::Executive => "executive",
            ExecutionLevel::Supervisor => "supervisor",
            ExecutionLevel::User => "user",
        })
    }
}

/// The execution level the processor is running at now (CM field).
#[must_use]
pub const fn current_level(psw: u32) -> ExecutionLevel {
    ExecutionLevel::from_code((psw & CM_MASK) >> CM_SHIFT)
}

/// Records a transfer of control to `level`.  The current level is
/// OR-merged into the previous-level field and `level` is OR-merged
/// into the current-level field; neither field is cleared first, so
/// bits already set in either field stay set.  In particular a
/// transfer toward kernel (code 0) leaves the CM field unchanged.
#[must_use]
pub const fn with_level_transfer(psw: u32, level: ExecutionLevel) -> u32 {
    let old = (psw & CM_MASK) >> CM_SHIFT;
    psw | (old << PM_SHIFT) | (level.code() << CM_SHIFT)
}

/// Rewrites the ET and ISC fields.  Both fields are cleared and then
/// set from the arguments; no other bits change.
#[must_use]
pub const fn with_et_isc(psw: u32, et: u32, isc: u32) -> u32 {
    (psw & !(ET_MASK | ISC_MASK)) | (et & ET_MASK) | ((isc << ISC_SHIFT) & ISC_MASK)
}

#[must_use]
pub const fn et(psw: u32) -> u32 {
    psw & ET_MASK
}

#[must_use]
pub const fn isc(psw: u32) -> u32 {
    (psw & ISC_MASK) >> ISC_SHIFT
}

#[must_use]
pub const fn ipl(psw: u32) -> u32 {
    (psw & IPL_MASK) >> IPL_SHIFT
}

/// Sets or clears a single-bit field named by its mask.
#[must_use]
pub const fn with_bit(psw: u32, mask: u32, value: bool) -> u32 {
    if value {
        psw | mask
    } else {
        psw & !mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_masks_are_disjoint() {
        let fields = [
            ET_MASK, TM_MASK, ISC_MASK, I_MASK, R_MASK, PM_MASK, CM_MASK, IPL_MASK, TE_MASK,
            C_MASK, V_MASK, Z_MASK, N_MASK, OE_MASK, CD_MASK, QIE_MASK, CFD_MASK,
        ];
        let mut seen: u32 = 0;
        for mask in fields {
            assert_eq!(seen & mask, 0, "mask {mask:#010x} overlaps another field");
            seen |= mask;
        }
    }

    #[test]
    fn level_round_trip() {
        for code in 0..4 {
            assert_eq!(ExecutionLevel::from_code(code).code(), code);
        }
    }

    #[test]
    fn current_level_reads_cm_field() {
        assert_eq!(current_level(0), ExecutionLevel::Kernel);
        assert_eq!(current_level(3 << CM_SHIFT), ExecutionLevel::User);
        assert_eq!(current_level(1 << CM_SHIFT), ExecutionLevel::Executive);
    }

    #[test]
    fn level_transfer_only_accretes_bits() {
        // Moving from user level toward kernel does not take CM back
        // to zero; the field keeps its old bits.
        let psw = 3 << CM_SHIFT;
        let after = with_level_transfer(psw, ExecutionLevel::Kernel);
        assert_eq!(current_level(after), ExecutionLevel::User);
        assert_eq!((after & PM_MASK) >> PM_SHIFT, 3);

        // Moving from kernel to user sets CM bits without touching PM
        // beyond the merged old level (zero).
        let after = with_level_transfer(0, ExecutionLevel::User);
        assert_eq!(current_level(after), ExecutionLevel::User);
        assert_eq!(after & PM_MASK, 0);
    }

    #[test]
    fn et_isc_rewrite_clears_old_values() {
        let psw = with_et_isc(u32::MAX, 3, 7);
        assert_eq!(et(psw), 3);
        assert_eq!(isc(psw), 7);
        // Everything outside ET/ISC is untouched.
        assert_eq!(psw | ET_MASK | ISC_MASK, u32::MAX);
    }

    #[test]
    fn flag_bit_set_and_clear() {
        let psw = with_bit(0, Z_MASK, true);
        assert_eq!(psw, Z_MASK);
        assert_eq!(with_bit(psw, Z_MASK, false), 0);
    }
}
