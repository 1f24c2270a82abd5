//! Operand datatypes.
//!
//! Every operand carries a datatype which fixes its width and its
//! extension rule when loaded into a 32-bit register.  Most operands
//! inherit the default datatype of their mnemonic; an
//! expanded-operand descriptor (addressing mode 14) can override it.
//! The enum discriminants are exactly the register-field codes used
//! by that descriptor, which is why only six of the eight values
//! exist: codes 1 and 5 are reserved.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;
#[cfg(test)]
use test_strategy::Arbitrary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(test, derive(Arbitrary))]
#[repr(u8)]
pub enum Datatype {
    UWord = 0,
    UHalf = 2,
    Byte = 3,
    Word = 4,
    Half = 6,
    SByte = 7,
}

/// An expanded-operand descriptor named one of the two reserved
/// datatype codes (or a value outside the field entirely).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedDatatype(pub u8);

impl Display for ReservedDatatype {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "reserved datatype code {:#04x}", self.0)
    }
}

impl Error for ReservedDatatype {}

impl TryFrom<u8> for Datatype {
    type Error = ReservedDatatype;

    fn try_from(code: u8) -> Result<Datatype, ReservedDatatype> {
        match code {
            0 => Ok(Datatype::UWord),
            2 => Ok(Datatype::UHalf),
            3 => Ok(Datatype::Byte),
            4 => Ok(Datatype::Word),
            6 => Ok(Datatype::Half),
            7 => Ok(Datatype::SByte),
            _ => Err(ReservedDatatype(code)),
        }
    }
}

impl Datatype {
    /// All value bits of the datatype, as a 32-bit mask.
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Datatype::Word | Datatype::UWord => 0xffff_ffff,
            Datatype::Half | Datatype::UHalf => 0xffff,
            Datatype::Byte | Datatype::SByte => 0xff,
        }
    }

    /// The sign (most significant) bit of the datatype.
    #[must_use]
    pub const fn sign_bit(self) -> u32 {
        match self {
            Datatype::Word | Datatype::UWord => 0x8000_0000,
            Datatype::Half | Datatype::UHalf => 0x8000,
            Datatype::Byte | Datatype::SByte => 0x80,
        }
    }

    /// Whether a loaded value of this type sign-extends.  Plain bytes
    /// are unsigned on this machine; `SByte` is the signed variant.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Datatype::Word | Datatype::Half | Datatype::SByte)
    }

    /// Widens a raw value of this datatype to 32 bits, sign- or
    /// zero-extending as the type requires.  Bits above the datatype
    /// width in `raw` are ignored.
    #[must_use]
    pub const fn extend(self, raw: u32) -> u32 {
        match self {
            Datatype::Word | Datatype::UWord => raw,
            Datatype::Half => raw as u16 as i16 as u32,
            Datatype::UHalf => raw & 0xffff,
            Datatype::SByte => raw as u8 as i8 as u32,
            Datatype::Byte => raw & 0xff,
        }
    }
}

impl Display for Datatype {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            Datatype::UWord => "uword",
            Datatype::UHalf => "uhalf",
            Datatype::Byte => "ubyte",
            Datatype::Word => "word",
            Datatype::Half => "half",
            Datatype::SByte => "sbyte",
        })
    }
}

#[cfg(test)]
use proptest::prelude::*;
#[cfg(test)]
use test_strategy::proptest;

#[cfg(test)]
#[proptest]
fn expanded_code_round_trip(dt: Datatype) {
    let code = dt as u8;
    prop_assert_eq!(Datatype::try_from(code), Ok(dt));
}

#[cfg(test)]
#[proptest]
fn extension_never_exceeds_word(dt: Datatype, raw: u32) {
    let wide = dt.extend(raw);
    if !dt.is_signed() {
        prop_assert_eq!(wide & !dt.mask(), 0);
    }
    // The value bits always survive extension unchanged.
    prop_assert_eq!(wide & dt.mask(), raw & dt.mask());
}
