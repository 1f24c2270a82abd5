//! Binary and symbolic representations of WE32100 instructions.
//!
//! A WE32100 instruction is a variable-length byte string.  The first
//! byte is the opcode; the reserved value 0x30 escapes to a second
//! opcode byte for the operating-system support instructions (GATE,
//! CALLPS, RETPS, the block moves, and friends).  The opcode is
//! followed by zero to four operands.  Most operands are described by
//! a one-byte descriptor followed by zero to four bytes of embedded
//! data:
//!
//! |Mode   |Register|
//! |-------|--------|
//! |4 bits |4 bits  |
//! |(7-4)  |(3-0)   |
//!
//! The mode nibble selects among literal, register, deferred,
//! displacement, immediate and expanded-type addressing; the register
//! nibble names one of the sixteen general registers or, for some
//! modes, re-qualifies the mode itself.  See "WE 32100 Microprocessor
//! Information Manual", Section 2.4 ("Addressing Modes") and Table
//! 2-10.  A few instructions instead embed their single operand
//! directly: the short branches carry a bare signed displacement byte
//! or halfword after the opcode, and the coprocessor instructions
//! carry a 32-bit operation word.
//!
//! The tables in this module record, for every opcode, the mnemonic,
//! the operand encoding class, the default operand datatype, and
//! which operand positions act as sources and destination.  The
//! execution engine drives both its decoder and its disassembly
//! listings from these tables.

use std::fmt::{self, Display, Formatter};

#[cfg(test)]
use test_strategy::{proptest, Arbitrary};

use crate::datatype::Datatype;

/// First byte of every two-byte opcode.
pub const ESCAPE: u8 = 0x30;

/// No instruction takes more than four operands.
pub const MAX_OPERANDS: usize = 4;

/// `Opcode` enumerates the instructions the execution engine can
/// tell apart.  The discriminant is the canonical encoding: the
/// opcode byte for one-byte opcodes, or `0x30nn` for the escaped
/// forms.
///
/// Four branch encodings are listed twice in the processor's opcode
/// map (0x66/0x76 BNEH, 0x67/0x77 BNEB, 0x6e/0x7e BEH, 0x6f/0x7f
/// BEB).  Both encodings resolve to the variant for the higher,
/// canonical value, so `Opcode::number` on a decoded instruction may
/// differ from the byte actually fetched.
#[repr(u16)]
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Opcode {
    Spoprd = 0x02,
    Spopd2 = 0x03,
    Movaw = 0x04,
    Spoprt = 0x06,
    Spopt2 = 0x07,
    Ret = 0x08,
    Movtrw = 0x0c,
    Save = 0x10,
    Spopwd = 0x13,
    Extop = 0x14,
    Spopwt = 0x17,
    Restore = 0x18,
    Swapwi = 0x1c,
    Swaphi = 0x1e,
    Swapbi = 0x1f,
    Popw = 0x20,
    Spoprs = 0x22,
    Spops2 = 0x23,
    Jmp = 0x24,
    Cflush = 0x27,
    Tstw = 0x28,
    Tsth = 0x2a,
    Tstb = 0x2b,
    Call = 0x2c,
    Bpt = 0x2e,
    Wait = 0x2f,
    Spop = 0x32,
    Spopws = 0x33,
    Jsb = 0x34,
    Bsbh = 0x36,
    Bsbb = 0x37,
    Bitw = 0x38,
    Bith = 0x3a,
    Bitb = 0x3b,
    Cmpw = 0x3c,
    Cmph = 0x3e,
    Cmpb = 0x3f,
    Rgeq = 0x40,
    Bgeh = 0x42,
    Bgeb = 0x43,
    Rgtr = 0x44,
    Bgh = 0x46,
    Bgb = 0x47,
    Blss = 0x48,
    Blh = 0x4a,
    Blb = 0x4b,
    Rleq = 0x4c,
    Bleh = 0x4e,
    Bleb = 0x4f,
    /// 0x50 prints as BGEQU in listings but is the return form of the
    /// unsigned greater-or-equal test (pop PC when carry is clear).
    Rgequ = 0x50,
    Bgeuh = 0x52,
    Bgeub = 0x53,
    Rgtru = 0x54,
    Bguh = 0x56,
    Bgub = 0x57,
    Blssu = 0x58,
    Bluh = 0x5a,
    Blub = 0x5b,
    Rlequ = 0x5c,
    Bleuh = 0x5e,
    Bleub = 0x5f,
    Rvc = 0x60,
    Bvch = 0x62,
    Bvcb = 0x63,
    Rnequ = 0x64,
    Rvs = 0x68,
    Bvsh = 0x6a,
    Bvsb = 0x6b,
    Reqlu = 0x6c,
    Nop = 0x70,
    Nop3 = 0x72,
    Nop2 = 0x73,
    Rneq = 0x74,
    Bneh = 0x76,
    Bneb = 0x77,
    Rsb = 0x78,
    Brh = 0x7a,
    Brb = 0x7b,
    Reql = 0x7c,
    Beh = 0x7e,
    Beb = 0x7f,
    Clrw = 0x80,
    Clrh = 0x82,
    Clrb = 0x83,
    Movw = 0x84,
    Movh = 0x86,
    Movb = 0x87,
    Mcomw = 0x88,
    Mcomh = 0x8a,
    Mcomb = 0x8b,
    Mnegw = 0x8c,
    Mnegh = 0x8e,
    Mnegb = 0x8f,
    Incw = 0x90,
    Inch = 0x92,
    Incb = 0x93,
    Decw = 0x94,
    Dech = 0x96,
    Decb = 0x97,
    Addw2 = 0x9c,
    Addh2 = 0x9e,
    Addb2 = 0x9f,
    Pushw = 0xa0,
    Modw2 = 0xa4,
    Modh2 = 0xa6,
    Modb2 = 0xa7,
    Mulw2 = 0xa8,
    Mulh2 = 0xaa,
    Mulb2 = 0xab,
    Divw2 = 0xac,
    Divh2 = 0xae,
    Divb2 = 0xaf,
    Orw2 = 0xb0,
    Orh2 = 0xb2,
    Orb2 = 0xb3,
    Xorw2 = 0xb4,
    Xorh2 = 0xb6,
    Xorb2 = 0xb7,
    Andw2 = 0xb8,
    Andh2 = 0xba,
    Andb2 = 0xbb,
    Subw2 = 0xbc,
    Subh2 = 0xbe,
    Subb2 = 0xbf,
    Alsw3 = 0xc0,
    Arsw3 = 0xc4,
    Arsh3 = 0xc6,
    Arsb3 = 0xc7,
    Insfw = 0xc8,
    Insfh = 0xca,
    Insfb = 0xcb,
    Extfw = 0xcc,
    Extfh = 0xce,
    Extfb = 0xcf,
    Llsw3 = 0xd0,
    Llsh3 = 0xd2,
    Llsb3 = 0xd3,
    Lrsw3 = 0xd4,
    Rotw = 0xd8,
    Addw3 = 0xdc,
    Addh3 = 0xde,
    Addb3 = 0xdf,
    Pushaw = 0xe0,
    Modw3 = 0xe4,
    Modh3 = 0xe6,
    Modb3 = 0xe7,
    Mulw3 = 0xe8,
    Mulh3 = 0xea,
    Mulb3 = 0xeb,
    Divw3 = 0xec,
    Divh3 = 0xee,
    Divb3 = 0xef,
    Orw3 = 0xf0,
    Orh3 = 0xf2,
    Orb3 = 0xf3,
    Xorw3 = 0xf4,
    Xorh3 = 0xf6,
    Xorb3 = 0xf7,
    Andw3 = 0xf8,
    Andh3 = 0xfa,
    Andb3 = 0xfb,
    Subw3 = 0xfc,
    Subh3 = 0xfe,
    Subb3 = 0xff,
    // Escaped (0x30-prefixed) opcodes.
    Mverno = 0x3009,
    Enbvjmp = 0x300d,
    Disvjmp = 0x3013,
    Movblw = 0x3019,
    Strend = 0x301f,
    Intack = 0x302f,
    Strcpy = 0x3035,
    Retg = 0x3045,
    Gate = 0x3061,
    Callps = 0x30ac,
    Retps = 0x30c8,
}

impl Opcode {
    /// The canonical encoding of this opcode (`0x30nn` for escaped
    /// forms).
    #[must_use]
    pub fn number(&self) -> u16 {
        *self as u16
    }

    /// True for the two-byte, 0x30-prefixed opcodes.
    #[must_use]
    pub fn is_escaped(&self) -> bool {
        self.number() > 0xff
    }
}

/// Which operand positions an instruction reads and writes.  Values
/// are indices into the decoded operand array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roles {
    pub src1: Option<u8>,
    pub src2: Option<u8>,
    pub src3: Option<u8>,
    pub dst: Option<u8>,
}

impl Roles {
    pub const NONE: Roles = Roles {
        src1: None,
        src2: None,
        src3: None,
        dst: None,
    };

    /// Single operand, written only (CLR, POPW, the SWAP family).
    pub const D0: Roles = Roles {
        dst: Some(0),
        ..Roles::NONE
    };

    /// Single operand, read only (TST, PUSHW, SAVE).
    pub const S0: Roles = Roles {
        src1: Some(0),
        ..Roles::NONE
    };

    /// Dyadic: read the first operand, write the second.
    pub const S0_D1: Roles = Roles {
        src1: Some(0),
        dst: Some(1),
        ..Roles::NONE
    };

    /// Dyadic: read both operands, write neither (CMP, BIT).
    pub const S01: Roles = Roles {
        src1: Some(0),
        src2: Some(1),
        ..Roles::NONE
    };

    /// Triadic: read the first two operands, write the third.
    pub const S01_D2: Roles = Roles {
        src1: Some(0),
        src2: Some(1),
        dst: Some(2),
        ..Roles::NONE
    };

    /// Bit-field forms: three sources and a destination.
    pub const S012_D3: Roles = Roles {
        src1: Some(0),
        src2: Some(1),
        src3: Some(2),
        dst: Some(3),
    };
}

/// How the bytes after the opcode are to be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandClass {
    /// Nothing follows the opcode.
    NoOperand,
    /// A single signed byte follows (short branches, EXTOP).
    EmbeddedByte,
    /// A single signed halfword follows, least-significant byte
    /// first.
    EmbeddedHalf,
    /// A 32-bit coprocessor operation word follows, then descriptors
    /// for the remaining `operands - 1` operand positions.
    Coprocessor { operands: u8 },
    /// `operands` one-byte descriptors (each with its embedded data)
    /// follow.
    Descriptor {
        operands: u8,
        datatype: Option<Datatype>,
        roles: Roles,
    },
}

/// One row of the opcode map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mnemonic {
    pub op: Opcode,
    pub name: &'static str,
    pub class: OperandClass,
}

impl Mnemonic {
    /// Total number of operands, counting a coprocessor operation
    /// word as operand zero.
    #[must_use]
    pub fn operand_count(&self) -> usize {
        match self.class {
            OperandClass::NoOperand => 0,
            OperandClass::EmbeddedByte | OperandClass::EmbeddedHalf => 1,
            OperandClass::Coprocessor { operands } => operands as usize,
            OperandClass::Descriptor { operands, .. } => operands as usize,
        }
    }

    /// The datatype operand descriptors decode with, before any
    /// expanded-type override.  `None` for JMP, whose operand is an
    /// address rather than data.
    #[must_use]
    pub fn datatype(&self) -> Option<Datatype> {
        match self.class {
            OperandClass::Descriptor { datatype, .. } => datatype,
            OperandClass::Coprocessor { .. } => Some(Datatype::Word),
            _ => None,
        }
    }

    #[must_use]
    pub fn roles(&self) -> Roles {
        match self.class {
            OperandClass::Descriptor { roles, .. } => roles,
            _ => Roles::NONE,
        }
    }
}

impl Display for Mnemonic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

const fn none(op: Opcode, name: &'static str) -> Option<Mnemonic> {
    Some(Mnemonic {
        op,
        name,
        class: OperandClass::NoOperand,
    })
}

const fn bdisp(op: Opcode, name: &'static str) -> Option<Mnemonic> {
    Some(Mnemonic {
        op,
        name,
        class: OperandClass::EmbeddedByte,
    })
}

const fn hdisp(op: Opcode, name: &'static str) -> Option<Mnemonic> {
    Some(Mnemonic {
        op,
        name,
        class: OperandClass::EmbeddedHalf,
    })
}

const fn copr(op: Opcode, name: &'static str, operands: u8) -> Option<Mnemonic> {
    Some(Mnemonic {
        op,
        name,
        class: OperandClass::Coprocessor { operands },
    })
}

const fn desc(
    op: Opcode,
    name: &'static str,
    operands: u8,
    datatype: Datatype,
    roles: Roles,
) -> Option<Mnemonic> {
    Some(Mnemonic {
        op,
        name,
        class: OperandClass::Descriptor {
            operands,
            datatype: Some(datatype),
            roles,
        },
    })
}

/// The one-byte opcode map.  Position in the array is the opcode
/// byte; `None` marks an illegal opcode.
static PRIMARY: [Option<Mnemonic>; 256] = [
    // 0x00
    None,
    None,
    copr(Opcode::Spoprd, "SPOPRD", 2),
    copr(Opcode::Spopd2, "SPOPD2", 3),
    desc(Opcode::Movaw, "MOVAW", 2, Datatype::Word, Roles::S0_D1),
    None,
    copr(Opcode::Spoprt, "SPOPRT", 2),
    copr(Opcode::Spopt2, "SPOPT2", 3),
    none(Opcode::Ret, "RET"),
    None,
    None,
    None,
    desc(Opcode::Movtrw, "MOVTRW", 2, Datatype::Word, Roles::S0_D1),
    None,
    None,
    None,
    // 0x10
    desc(Opcode::Save, "SAVE", 1, Datatype::Word, Roles::S0),
    None,
    None,
    copr(Opcode::Spopwd, "SPOPWD", 2),
    bdisp(Opcode::Extop, "EXTOP"),
    None,
    None,
    copr(Opcode::Spopwt, "SPOPWT", 2),
    desc(Opcode::Restore, "RESTORE", 1, Datatype::Word, Roles::S0),
    None,
    None,
    None,
    desc(Opcode::Swapwi, "SWAPWI", 1, Datatype::Word, Roles::D0),
    None,
    desc(Opcode::Swaphi, "SWAPHI", 1, Datatype::Half, Roles::D0),
    desc(Opcode::Swapbi, "SWAPBI", 1, Datatype::Byte, Roles::D0),
    // 0x20
    desc(Opcode::Popw, "POPW", 1, Datatype::Word, Roles::D0),
    None,
    copr(Opcode::Spoprs, "SPOPRS", 2),
    copr(Opcode::Spops2, "SPOPS2", 3),
    // JMP's operand is a bare address, so it carries no datatype.
    Some(Mnemonic {
        op: Opcode::Jmp,
        name: "JMP",
        class: OperandClass::Descriptor {
            operands: 1,
            datatype: None,
            roles: Roles::D0,
        },
    }),
    None,
    None,
    none(Opcode::Cflush, "CFLUSH"),
    desc(Opcode::Tstw, "TSTW", 1, Datatype::Word, Roles::S0),
    None,
    desc(Opcode::Tsth, "TSTH", 1, Datatype::Half, Roles::S0),
    desc(Opcode::Tstb, "TSTB", 1, Datatype::Byte, Roles::S0),
    desc(Opcode::Call, "CALL", 2, Datatype::Word, Roles::S0_D1),
    None,
    none(Opcode::Bpt, "BPT"),
    none(Opcode::Wait, "WAIT"),
    // 0x30: the escape to the two-byte opcodes.
    None,
    None,
    copr(Opcode::Spop, "SPOP", 1),
    copr(Opcode::Spopws, "SPOPWS", 2),
    desc(Opcode::Jsb, "JSB", 1, Datatype::Word, Roles::D0),
    None,
    hdisp(Opcode::Bsbh, "BSBH"),
    bdisp(Opcode::Bsbb, "BSBB"),
    desc(Opcode::Bitw, "BITW", 2, Datatype::Word, Roles::S01),
    None,
    desc(Opcode::Bith, "BITH", 2, Datatype::Half, Roles::S01),
    desc(Opcode::Bitb, "BITB", 2, Datatype::Byte, Roles::S01),
    desc(Opcode::Cmpw, "CMPW", 2, Datatype::Word, Roles::S01),
    None,
    desc(Opcode::Cmph, "CMPH", 2, Datatype::Half, Roles::S01),
    desc(Opcode::Cmpb, "CMPB", 2, Datatype::Byte, Roles::S01),
    // 0x40: conditional transfers, signed tests.
    none(Opcode::Rgeq, "RGEQ"),
    None,
    hdisp(Opcode::Bgeh, "BGEH"),
    bdisp(Opcode::Bgeb, "BGEB"),
    none(Opcode::Rgtr, "RGTR"),
    None,
    hdisp(Opcode::Bgh, "BGH"),
    bdisp(Opcode::Bgb, "BGB"),
    none(Opcode::Blss, "BLSS"),
    None,
    hdisp(Opcode::Blh, "BLH"),
    bdisp(Opcode::Blb, "BLB"),
    none(Opcode::Rleq, "RLEQ"),
    None,
    hdisp(Opcode::Bleh, "BLEH"),
    bdisp(Opcode::Bleb, "BLEB"),
    // 0x50: conditional transfers, unsigned tests.
    none(Opcode::Rgequ, "RGEQU"),
    None,
    hdisp(Opcode::Bgeuh, "BGEUH"),
    bdisp(Opcode::Bgeub, "BGEUB"),
    none(Opcode::Rgtru, "RGTRU"),
    None,
    hdisp(Opcode::Bguh, "BGUH"),
    bdisp(Opcode::Bgub, "BGUB"),
    none(Opcode::Blssu, "BLSSU"),
    None,
    hdisp(Opcode::Bluh, "BLUH"),
    bdisp(Opcode::Blub, "BLUB"),
    none(Opcode::Rlequ, "RLEQU"),
    None,
    hdisp(Opcode::Bleuh, "BLEUH"),
    bdisp(Opcode::Bleub, "BLEUB"),
    // 0x60: overflow and equality transfers.  0x66/0x67 and
    // 0x6e/0x6f are alternate encodings of 0x76/0x77 and 0x7e/0x7f.
    none(Opcode::Rvc, "RVC"),
    None,
    hdisp(Opcode::Bvch, "BVCH"),
    bdisp(Opcode::Bvcb, "BVCB"),
    none(Opcode::Rnequ, "RNEQU"),
    None,
    hdisp(Opcode::Bneh, "BNEH"),
    bdisp(Opcode::Bneb, "BNEB"),
    none(Opcode::Rvs, "RVS"),
    None,
    hdisp(Opcode::Bvsh, "BVSH"),
    bdisp(Opcode::Bvsb, "BVSB"),
    none(Opcode::Reqlu, "REQLU"),
    None,
    hdisp(Opcode::Beh, "BEH"),
    bdisp(Opcode::Beb, "BEB"),
    // 0x70
    none(Opcode::Nop, "NOP"),
    None,
    none(Opcode::Nop3, "NOP3"),
    none(Opcode::Nop2, "NOP2"),
    none(Opcode::Rneq, "RNEQ"),
    None,
    hdisp(Opcode::Bneh, "BNEH"),
    bdisp(Opcode::Bneb, "BNEB"),
    none(Opcode::Rsb, "RSB"),
    None,
    hdisp(Opcode::Brh, "BRH"),
    bdisp(Opcode::Brb, "BRB"),
    none(Opcode::Reql, "REQL"),
    None,
    hdisp(Opcode::Beh, "BEH"),
    bdisp(Opcode::Beb, "BEB"),
    // 0x80: monadic and dyadic data transfer.
    desc(Opcode::Clrw, "CLRW", 1, Datatype::Word, Roles::D0),
    None,
    desc(Opcode::Clrh, "CLRH", 1, Datatype::Half, Roles::D0),
    desc(Opcode::Clrb, "CLRB", 1, Datatype::Byte, Roles::D0),
    desc(Opcode::Movw, "MOVW", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Movh, "MOVH", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Movb, "MOVB", 2, Datatype::Byte, Roles::S0_D1),
    desc(Opcode::Mcomw, "MCOMW", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Mcomh, "MCOMH", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Mcomb, "MCOMB", 2, Datatype::Byte, Roles::S0_D1),
    desc(Opcode::Mnegw, "MNEGW", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Mnegh, "MNEGH", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Mnegb, "MNEGB", 2, Datatype::Byte, Roles::S0_D1),
    // 0x90
    desc(Opcode::Incw, "INCW", 1, Datatype::Word, Roles::D0),
    None,
    desc(Opcode::Inch, "INCH", 1, Datatype::Half, Roles::D0),
    desc(Opcode::Incb, "INCB", 1, Datatype::Byte, Roles::D0),
    desc(Opcode::Decw, "DECW", 1, Datatype::Word, Roles::D0),
    None,
    desc(Opcode::Dech, "DECH", 1, Datatype::Half, Roles::D0),
    desc(Opcode::Decb, "DECB", 1, Datatype::Byte, Roles::D0),
    None,
    None,
    None,
    None,
    desc(Opcode::Addw2, "ADDW2", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Addh2, "ADDH2", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Addb2, "ADDB2", 2, Datatype::Byte, Roles::S0_D1),
    // 0xa0: dyadic arithmetic.
    desc(Opcode::Pushw, "PUSHW", 1, Datatype::Word, Roles::S0),
    None,
    None,
    None,
    desc(Opcode::Modw2, "MODW2", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Modh2, "MODH2", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Modb2, "MODB2", 2, Datatype::Byte, Roles::S0_D1),
    desc(Opcode::Mulw2, "MULW2", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Mulh2, "MULH2", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Mulb2, "MULB2", 2, Datatype::Byte, Roles::S0_D1),
    desc(Opcode::Divw2, "DIVW2", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Divh2, "DIVH2", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Divb2, "DIVB2", 2, Datatype::Byte, Roles::S0_D1),
    // 0xb0: dyadic logic.
    desc(Opcode::Orw2, "ORW2", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Orh2, "ORH2", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Orb2, "ORB2", 2, Datatype::Byte, Roles::S0_D1),
    desc(Opcode::Xorw2, "XORW2", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Xorh2, "XORH2", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Xorb2, "XORB2", 2, Datatype::Byte, Roles::S0_D1),
    desc(Opcode::Andw2, "ANDW2", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Andh2, "ANDH2", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Andb2, "ANDB2", 2, Datatype::Byte, Roles::S0_D1),
    desc(Opcode::Subw2, "SUBW2", 2, Datatype::Word, Roles::S0_D1),
    None,
    desc(Opcode::Subh2, "SUBH2", 2, Datatype::Half, Roles::S0_D1),
    desc(Opcode::Subb2, "SUBB2", 2, Datatype::Byte, Roles::S0_D1),
    // 0xc0: shifts and bit fields.
    desc(Opcode::Alsw3, "ALSW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    None,
    None,
    desc(Opcode::Arsw3, "ARSW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Arsh3, "ARSH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Arsb3, "ARSB3", 3, Datatype::Byte, Roles::S01_D2),
    desc(Opcode::Insfw, "INSFW", 4, Datatype::Word, Roles::S012_D3),
    None,
    desc(Opcode::Insfh, "INSFH", 4, Datatype::Half, Roles::S012_D3),
    desc(Opcode::Insfb, "INSFB", 4, Datatype::Byte, Roles::S012_D3),
    desc(Opcode::Extfw, "EXTFW", 4, Datatype::Word, Roles::S012_D3),
    None,
    desc(Opcode::Extfh, "EXTFH", 4, Datatype::Half, Roles::S012_D3),
    desc(Opcode::Extfb, "EXTFB", 4, Datatype::Byte, Roles::S012_D3),
    // 0xd0
    desc(Opcode::Llsw3, "LLSW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Llsh3, "LLSH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Llsb3, "LLSB3", 3, Datatype::Byte, Roles::S01_D2),
    desc(Opcode::Lrsw3, "LRSW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    None,
    None,
    desc(Opcode::Rotw, "ROTW", 3, Datatype::Word, Roles::S01_D2),
    None,
    None,
    None,
    desc(Opcode::Addw3, "ADDW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Addh3, "ADDH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Addb3, "ADDB3", 3, Datatype::Byte, Roles::S01_D2),
    // 0xe0: triadic arithmetic.
    desc(Opcode::Pushaw, "PUSHAW", 1, Datatype::Word, Roles::S0),
    None,
    None,
    None,
    desc(Opcode::Modw3, "MODW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Modh3, "MODH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Modb3, "MODB3", 3, Datatype::Byte, Roles::S01_D2),
    desc(Opcode::Mulw3, "MULW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Mulh3, "MULH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Mulb3, "MULB3", 3, Datatype::Byte, Roles::S01_D2),
    desc(Opcode::Divw3, "DIVW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Divh3, "DIVH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Divb3, "DIVB3", 3, Datatype::Byte, Roles::S01_D2),
    // 0xf0: triadic logic.
    desc(Opcode::Orw3, "ORW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Orh3, "ORH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Orb3, "ORB3", 3, Datatype::Byte, Roles::S01_D2),
    desc(Opcode::Xorw3, "XORW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Xorh3, "XORH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Xorb3, "XORB3", 3, Datatype::Byte, Roles::S01_D2),
    desc(Opcode::Andw3, "ANDW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Andh3, "ANDH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Andb3, "ANDB3", 3, Datatype::Byte, Roles::S01_D2),
    desc(Opcode::Subw3, "SUBW3", 3, Datatype::Word, Roles::S01_D2),
    None,
    desc(Opcode::Subh3, "SUBH3", 3, Datatype::Half, Roles::S01_D2),
    desc(Opcode::Subb3, "SUBB3", 3, Datatype::Byte, Roles::S01_D2),
];

/// The two-byte (0x30-escaped) opcode map, in encoding order.
static HALFWORD: [Mnemonic; 11] = [
    Mnemonic {
        op: Opcode::Mverno,
        name: "MVERNO",
        class: OperandClass::NoOperand,
    },
    Mnemonic {
        op: Opcode::Enbvjmp,
        name: "ENBVJMP",
        class: OperandClass::NoOperand,
    },
    Mnemonic {
        op: Opcode::Disvjmp,
        name: "DISVJMP",
        class: OperandClass::NoOperand,
    },
    Mnemonic {
        op: Opcode::Movblw,
        name: "MOVBLW",
        class: OperandClass::NoOperand,
    },
    Mnemonic {
        op: Opcode::Strend,
        name: "STREND",
        class: OperandClass::NoOperand,
    },
    Mnemonic {
        op: Opcode::Intack,
        name: "INTACK",
        class: OperandClass::Descriptor {
            operands: 1,
            datatype: Some(Datatype::Word),
            roles: Roles::NONE,
        },
    },
    Mnemonic {
        op: Opcode::Strcpy,
        name: "STRCPY",
        class: OperandClass::NoOperand,
    },
    Mnemonic {
        op: Opcode::Retg,
        name: "RETG",
        class: OperandClass::NoOperand,
    },
    Mnemonic {
        op: Opcode::Gate,
        name: "GATE",
        class: OperandClass::NoOperand,
    },
    Mnemonic {
        op: Opcode::Callps,
        name: "CALLPS",
        class: OperandClass::NoOperand,
    },
    Mnemonic {
        op: Opcode::Retps,
        name: "RETPS",
        class: OperandClass::NoOperand,
    },
];

/// Looks up a one-byte opcode.  Returns `None` for illegal opcodes,
/// including the 0x30 escape byte itself.
#[must_use]
pub fn lookup(opcode: u8) -> Option<&'static Mnemonic> {
    PRIMARY[opcode as usize].as_ref()
}

/// Looks up the second byte of a 0x30-escaped opcode.
#[must_use]
pub fn lookup_escaped(second: u8) -> Option<&'static Mnemonic> {
    let encoding = u16::from_be_bytes([ESCAPE, second]);
    HALFWORD.iter().find(|mn| mn.op.number() == encoding)
}

#[cfg(test)]
#[proptest]
fn canonical_encoding_resolves_to_same_opcode(op: Opcode) {
    let number = op.number();
    let mn = if op.is_escaped() {
        lookup_escaped((number & 0xff) as u8)
    } else {
        lookup(number as u8)
    };
    match mn {
        Some(mn) => assert_eq!(mn.op, op),
        None => panic!("opcode {op:?} (0x{number:04x}) is missing from the tables"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The four branch encodings that resolve to a higher canonical
    /// value.
    const ALIASES: [(u16, u16); 4] = [(0x66, 0x76), (0x67, 0x77), (0x6e, 0x7e), (0x6f, 0x7f)];

    #[test]
    fn table_positions_match_encodings() {
        for (position, entry) in PRIMARY.iter().enumerate() {
            let position = position as u16;
            if let Some(mn) = entry {
                let number = mn.op.number();
                if number != position {
                    assert!(
                        ALIASES.contains(&(position, number)),
                        "0x{position:02x} resolves to 0x{number:02x} but is not a known alias"
                    );
                }
            }
        }
        for mn in &HALFWORD {
            let number = mn.op.number();
            assert_eq!(number >> 8, u16::from(ESCAPE));
            let found = lookup_escaped((number & 0xff) as u8)
                .unwrap_or_else(|| panic!("{} missing from escaped lookup", mn.name));
            assert_eq!(found.op, mn.op);
        }
    }

    #[test]
    fn aliased_encodings_share_mnemonics() {
        for (alias, canonical) in ALIASES {
            let alias = PRIMARY[alias as usize].expect("alias slot must be populated");
            let canonical = PRIMARY[canonical as usize].expect("canonical slot must be populated");
            assert_eq!(alias.op, canonical.op);
            assert_eq!(alias.name, canonical.name);
            assert_eq!(alias.class, canonical.class);
        }
    }

    #[test]
    fn descriptor_roles_are_in_range() {
        let all = PRIMARY.iter().flatten().chain(HALFWORD.iter());
        for mn in all {
            assert!(mn.operand_count() <= MAX_OPERANDS, "{}", mn.name);
            if let OperandClass::Descriptor {
                operands, roles, ..
            } = mn.class
            {
                for role in [roles.src1, roles.src2, roles.src3, roles.dst] {
                    if let Some(index) = role {
                        assert!(
                            index < operands,
                            "{} names operand {index} but only has {operands}",
                            mn.name
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn escape_byte_is_not_an_opcode() {
        assert_eq!(lookup(ESCAPE), None);
    }

    #[test]
    fn spot_check_rows() {
        let movaw = lookup(0x04).expect("MOVAW");
        assert_eq!(movaw.op, Opcode::Movaw);
        assert_eq!(movaw.operand_count(), 2);
        assert_eq!(movaw.datatype(), Some(Datatype::Word));
        assert_eq!(movaw.roles(), Roles::S0_D1);

        let jmp = lookup(0x24).expect("JMP");
        assert_eq!(jmp.datatype(), None);
        assert_eq!(jmp.roles(), Roles::D0);

        let extfb = lookup(0xcf).expect("EXTFB");
        assert_eq!(extfb.operand_count(), 4);
        assert_eq!(extfb.datatype(), Some(Datatype::Byte));
        assert_eq!(extfb.roles(), Roles::S012_D3);

        let spopd2 = lookup(0x03).expect("SPOPD2");
        assert_eq!(spopd2.operand_count(), 3);
        assert_eq!(spopd2.datatype(), Some(Datatype::Word));
        assert_eq!(spopd2.roles(), Roles::NONE);

        let gate = lookup_escaped(0x61).expect("GATE");
        assert_eq!(gate.op, Opcode::Gate);
        assert_eq!(gate.operand_count(), 0);
    }
}
