//! Instruction stream decoding.
//!
//! Decoding never fails outright: whatever bytes the stream holds,
//! the decoder produces a [`DecodedInstruction`] recording how far it
//! got, and any problem (an illegal opcode, a malformed descriptor)
//! is latched in the artifact's `fault` field for the execution
//! engine to dispatch.  The byte count is always meaningful, because
//! the program counter advances by it even past an undecodable
//! instruction.
//!
//! Bytes come through a caller-supplied fetch closure.  The closure
//! is infallible; the execution engine's fetch path latches memory
//! faults on its own and substitutes zero bytes, which is also what
//! the decoder sees past the end of a test buffer.
//!
//! Multi-byte embedded data (immediates, displacements, absolute
//! addresses) is assembled least-significant byte first.  The
//! instruction stream is the one place this big-endian machine is
//! little-endian.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use tracing::{event, Level};

use base::instruction::{self, ESCAPE, MAX_OPERANDS};
use base::prelude::*;

/// One decoded operand.
///
/// `mode` and `reg` are the two nibbles of the final descriptor byte
/// (after any expanded-type prefixes).  `embedded` holds the bytes
/// that followed the descriptor, assembled to their natural width
/// and zero-extended; modes that embed nothing leave it zero.
/// `data` is a scratch value the execution engine fills with the
/// operand's last value or effective address, kept so execution
/// traces can show what the operand referred to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Operand {
    pub mode: u8,
    pub reg: u8,
    pub embedded: u32,
    /// Override from an expanded-type prefix, if one was in effect.
    pub expanded: Option<Datatype>,
    /// The mnemonic's default datatype (`None` for JMP, whose
    /// operand is a bare address).
    pub datatype: Option<Datatype>,
    pub data: u32,
}

impl Operand {
    /// The datatype in effect for this operand: the expanded
    /// override if present, the mnemonic default otherwise.
    #[must_use]
    pub fn op_type(&self) -> Datatype {
        self.expanded.or(self.datatype).unwrap_or(Datatype::Word)
    }

    /// Register mode naming an actual register (mode 4, register
    /// 0-14).
    pub(crate) fn is_register(&self) -> bool {
        self.mode == 4 && self.reg < 15
    }

    /// Literal modes: the value is embedded in the descriptor byte
    /// itself.
    pub(crate) fn is_literal(&self) -> bool {
        self.mode < 4 || self.mode == 15
    }

    /// Immediate modes: the value follows the descriptor in the
    /// instruction stream.
    pub(crate) fn is_immediate(&self) -> bool {
        self.reg == 15 && matches!(self.mode, 4 | 5 | 6)
    }
}

/// The result of decoding one instruction: the mnemonic (if the
/// opcode was legal), the operand array, a snapshot of PC and PSW at
/// decode time, the byte count, and any fault latched along the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub mnemonic: Option<&'static Mnemonic>,
    pub operands: [Operand; MAX_OPERANDS],
    pub pc: u32,
    pub psw: u32,
    pub len: u8,
    pub fault: Option<NormalException>,
}

impl DecodedInstruction {
    pub(crate) fn empty(pc: u32, psw: u32) -> DecodedInstruction {
        DecodedInstruction {
            mnemonic: None,
            operands: [Operand::default(); MAX_OPERANDS],
            pc,
            psw,
            len: 0,
            fault: None,
        }
    }
}

/// Byte-stream reader tracking how many bytes the instruction has
/// consumed.  The count is deliberately eight bits wide: that is the
/// width of the quantity later added to the program counter.
struct Reader<F> {
    fetch: F,
    pc: u32,
    len: u8,
}

impl<F: FnMut(u32) -> u8> Reader<F> {
    fn byte(&mut self) -> u8 {
        let b = (self.fetch)(self.pc.wrapping_add(u32::from(self.len)));
        self.len = self.len.wrapping_add(1);
        b
    }

    fn half(&mut self) -> u16 {
        u16::from(self.byte()) | (u16::from(self.byte()) << 8)
    }

    fn word(&mut self) -> u32 {
        u32::from(self.half()) | (u32::from(self.half()) << 16)
    }
}

/// Decodes the instruction at `pc`, pulling bytes through `fetch`.
pub(crate) fn decode<F>(pc: u32, psw: u32, fetch: F) -> DecodedInstruction
where
    F: FnMut(u32) -> u8,
{
    let mut instruction = DecodedInstruction::empty(pc, psw);
    let mut reader = Reader { fetch, pc, len: 0 };

    let first = reader.byte();
    let mnemonic = if first == ESCAPE {
        instruction::lookup_escaped(reader.byte())
    } else {
        instruction::lookup(first)
    };
    let Some(mnemonic) = mnemonic else {
        event!(
            Level::DEBUG,
            pc = format_args!("{pc:08x}"),
            opcode = first,
            "illegal opcode"
        );
        instruction.fault = Some(NormalException::IllegalOpcode);
        instruction.len = reader.len;
        return instruction;
    };
    instruction.mnemonic = Some(mnemonic);

    match mnemonic.class {
        OperandClass::NoOperand => {}
        OperandClass::EmbeddedByte => {
            instruction.operands[0] = Operand {
                mode: 6,
                reg: 15,
                embedded: u32::from(reader.byte()),
                ..Operand::default()
            };
        }
        OperandClass::EmbeddedHalf => {
            instruction.operands[0] = Operand {
                mode: 5,
                reg: 15,
                embedded: u32::from(reader.half()),
                ..Operand::default()
            };
        }
        OperandClass::Coprocessor { operands } => {
            instruction.operands[0] = Operand {
                mode: 4,
                reg: 15,
                embedded: reader.word(),
                datatype: Some(Datatype::Word),
                ..Operand::default()
            };
            let mut expanded = None;
            for index in 1..operands as usize {
                instruction.operands[index] = descriptor_operand(
                    &mut reader,
                    Some(Datatype::Word),
                    &mut expanded,
                    &mut instruction.fault,
                );
            }
        }
        OperandClass::Descriptor {
            operands, datatype, ..
        } => {
            let mut expanded = None;
            for index in 0..operands as usize {
                instruction.operands[index] =
                    descriptor_operand(&mut reader, datatype, &mut expanded, &mut instruction.fault);
            }
        }
    }

    instruction.len = reader.len;
    instruction
}

/// Decodes one descriptor-described operand.  `expanded` is the
/// datatype override currently in effect; a mode-14 prefix replaces
/// it, and the replacement persists for the instruction's remaining
/// operands.  Problems latch into `fault` (last one wins, matching
/// the PSW field rewrite they will turn into) without stopping the
/// operand walk.
fn descriptor_operand<F: FnMut(u32) -> u8>(
    reader: &mut Reader<F>,
    datatype: Option<Datatype>,
    expanded: &mut Option<Datatype>,
    fault: &mut Option<NormalException>,
) -> Operand {
    let mut operand = Operand {
        datatype,
        ..Operand::default()
    };
    loop {
        let descriptor = reader.byte();
        operand.mode = descriptor >> 4;
        operand.reg = descriptor & 0x0f;
        match operand.mode {
            // Literals embed their value in the descriptor byte.
            0..=3 | 15 => operand.embedded = u32::from(descriptor),
            // Word immediate, or plain register mode.
            4 => {
                if operand.reg == 15 {
                    operand.embedded = reader.word();
                }
            }
            // Halfword immediate, register deferred, or the one
            // descriptor bit pattern with no meaning at all.
            5 => match operand.reg {
                15 => operand.embedded = u32::from(reader.half()),
                11 => *fault = Some(NormalException::InvalidDescriptor),
                _ => {}
            },
            // Byte immediate, or FP short offset with the offset in
            // the register nibble.
            6 => {
                operand.embedded = if operand.reg == 15 {
                    u32::from(reader.byte())
                } else {
                    u32::from(operand.reg)
                };
            }
            // Absolute, or AP short offset.
            7 => {
                operand.embedded = if operand.reg == 15 {
                    reader.word()
                } else {
                    u32::from(operand.reg)
                };
            }
            8 | 9 => operand.embedded = reader.word(),
            10 | 11 => operand.embedded = u32::from(reader.half()),
            12 | 13 => operand.embedded = u32::from(reader.byte()),
            // Absolute deferred, or an expanded-type prefix.
            14 => {
                if operand.reg == 15 {
                    operand.embedded = reader.word();
                } else {
                    match Datatype::try_from(operand.reg) {
                        Ok(override_type) => {
                            // The next byte re-describes this same
                            // operand slot.
                            *expanded = Some(override_type);
                            continue;
                        }
                        Err(_) => *fault = Some(NormalException::ReservedDatatype),
                    }
                }
            }
            _ => unreachable!("mode is a four-bit field"),
        }
        break;
    }
    operand.expanded = *expanded;
    operand.data = operand.embedded;
    operand
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        if let Some(datatype) = self.expanded {
            write!(f, "{{{datatype}}}")?;
        }
        match self.mode {
            0..=3 => write!(f, "&{:#x}", self.embedded),
            4 => {
                if self.reg == 15 {
                    write!(f, "&{:#x}", self.embedded)
                } else {
                    f.write_str(registers::name(self.reg as usize))
                }
            }
            5 => {
                if self.reg == 15 {
                    write!(f, "&{:#x}", self.embedded)
                } else {
                    write!(f, "({})", registers::name(self.reg as usize))
                }
            }
            6 => {
                if self.reg == 15 {
                    write!(f, "&{:#x}", self.embedded)
                } else {
                    write!(f, "{}(%fp)", self.reg)
                }
            }
            7 => {
                if self.reg == 15 {
                    write!(f, "${:#x}", self.embedded)
                } else {
                    write!(f, "{}(%ap)", self.embedded)
                }
            }
            8 => write!(
                f,
                "{:#x}({})",
                self.embedded,
                registers::name(self.reg as usize)
            ),
            9 => write!(
                f,
                "*{:#x}({})",
                self.embedded,
                registers::name(self.reg as usize)
            ),
            10 => write!(
                f,
                "{:#x}({})",
                self.embedded as u16 as i16 as i32 as u32,
                registers::name(self.reg as usize)
            ),
            11 => write!(
                f,
                "*{:#x}({})",
                self.embedded as u16 as i16 as i32 as u32,
                registers::name(self.reg as usize)
            ),
            12 => write!(
                f,
                "{}({})",
                self.embedded as u8 as i8,
                registers::name(self.reg as usize)
            ),
            13 => write!(
                f,
                "*{}({})",
                self.embedded as u8 as i8,
                registers::name(self.reg as usize)
            ),
            14 => {
                if self.reg == 15 {
                    write!(f, "*${:#x}", self.embedded)
                } else {
                    // A reserved-datatype descriptor; there is
                    // nothing sensible to render.
                    Ok(())
                }
            }
            _ => write!(f, "&{}", self.embedded as i32),
        }
    }
}

impl Display for DecodedInstruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:08x} {:08x}| ", self.psw, self.pc)?;
        let Some(mnemonic) = self.mnemonic else {
            return f.write_str("???");
        };
        f.write_str(mnemonic.name)?;
        let count = mnemonic.operand_count();
        if count > 0 {
            f.write_str(" ")?;
        }
        for (index, operand) in self.operands[..count].iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{operand}")?;
        }
        // Descriptor operands get a second line with the values or
        // addresses they resolved to, aligned under the mnemonic.
        if count > 0 && matches!(mnemonic.class, OperandClass::Descriptor { .. }) {
            write!(f, "\n                   ")?;
            for (index, operand) in self.operands[..count].iter().enumerate() {
                if index > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{:08x}", operand.data)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
use proptest::prelude::*;
#[cfg(test)]
use test_strategy::proptest;

#[cfg(test)]
fn decode_bytes(bytes: &[u8]) -> DecodedInstruction {
    decode(0, 0, |addr| {
        bytes.get(addr as usize).copied().unwrap_or(0)
    })
}

#[cfg(test)]
#[proptest]
fn decode_always_consumes_the_opcode(
    #[strategy(proptest::collection::vec(any::<u8>(), 1..16))] bytes: Vec<u8>,
) {
    let instruction = decode_bytes(&bytes);
    prop_assert!(instruction.len >= 1);
    if instruction.mnemonic.is_none() {
        prop_assert!(instruction.fault.is_some());
    }
}

#[test]
fn test_register_operands() {
    let instruction = decode_bytes(&[0x9c, 0x41, 0x42]);
    let mnemonic = instruction.mnemonic.expect("ADDW2 is a legal opcode");
    assert_eq!(mnemonic.op, Opcode::Addw2);
    assert_eq!(instruction.len, 3);
    assert_eq!(instruction.fault, None);
    assert_eq!(instruction.operands[0].mode, 4);
    assert_eq!(instruction.operands[0].reg, 1);
    assert_eq!(instruction.operands[1].reg, 2);
    assert_eq!(instruction.operands[0].datatype, Some(Datatype::Word));
}

#[test]
fn test_word_immediate_assembles_little_endian() {
    let instruction = decode_bytes(&[0x84, 0x4f, 0x78, 0x56, 0x34, 0x12, 0x40]);
    assert_eq!(instruction.mnemonic.map(|mn| mn.op), Some(Opcode::Movw));
    assert_eq!(instruction.len, 7);
    assert_eq!(instruction.operands[0].mode, 4);
    assert_eq!(instruction.operands[0].reg, 15);
    assert_eq!(instruction.operands[0].embedded, 0x1234_5678);
    assert_eq!(instruction.operands[1].reg, 0);
}

#[test]
fn test_literal_descriptors() {
    // Positive literals occupy modes 0-3: the whole descriptor byte
    // is the value.
    let instruction = decode_bytes(&[0x87, 0x3f, 0x40]);
    assert_eq!(instruction.operands[0].mode, 3);
    assert_eq!(instruction.operands[0].embedded, 0x3f);

    let instruction = decode_bytes(&[0x87, 0xf5, 0x40]);
    assert_eq!(instruction.operands[0].mode, 15);
    assert_eq!(instruction.operands[0].embedded, 0xf5);
}

#[test]
fn test_escaped_opcode() {
    let instruction = decode_bytes(&[0x30, 0x61]);
    assert_eq!(instruction.mnemonic.map(|mn| mn.op), Some(Opcode::Gate));
    assert_eq!(instruction.len, 2);
}

#[test]
fn test_unknown_escaped_opcode_consumes_both_bytes() {
    let instruction = decode_bytes(&[0x30, 0xee]);
    assert_eq!(instruction.mnemonic, None);
    assert_eq!(instruction.fault, Some(NormalException::IllegalOpcode));
    assert_eq!(instruction.len, 2);
}

#[test]
fn test_illegal_opcode() {
    let instruction = decode_bytes(&[0x01]);
    assert_eq!(instruction.mnemonic, None);
    assert_eq!(instruction.fault, Some(NormalException::IllegalOpcode));
    assert_eq!(instruction.len, 1);
}

#[test]
fn test_expanded_datatype_persists_across_operands() {
    // ADDW3 {ubyte}%r0,%r1,%r2
    let instruction = decode_bytes(&[0xdc, 0xe3, 0x40, 0x41, 0x42]);
    assert_eq!(instruction.len, 5);
    assert_eq!(instruction.fault, None);
    assert_eq!(instruction.operands[0].expanded, Some(Datatype::Byte));
    assert_eq!(instruction.operands[1].expanded, Some(Datatype::Byte));
    assert_eq!(instruction.operands[2].expanded, Some(Datatype::Byte));
    assert_eq!(instruction.operands[0].op_type(), Datatype::Byte);
}

#[test]
fn test_stacked_expanded_prefixes_use_the_last() {
    let instruction = decode_bytes(&[0x84, 0xe3, 0xe6, 0x40, 0x41]);
    assert_eq!(instruction.len, 5);
    assert_eq!(instruction.operands[0].mode, 4);
    assert_eq!(instruction.operands[0].expanded, Some(Datatype::Half));
}

#[test]
fn test_reserved_datatype_latches_but_decode_continues() {
    let instruction = decode_bytes(&[0x84, 0xe5, 0x41]);
    assert_eq!(instruction.fault, Some(NormalException::ReservedDatatype));
    assert_eq!(instruction.operands[0].mode, 14);
    assert_eq!(instruction.operands[0].reg, 5);
    // The second operand still decodes.
    assert_eq!(instruction.operands[1].mode, 4);
    assert_eq!(instruction.operands[1].reg, 1);
    assert_eq!(instruction.len, 3);
}

#[test]
fn test_invalid_descriptor_aborts_the_operand_only() {
    let instruction = decode_bytes(&[0x84, 0x5b, 0x41]);
    assert_eq!(instruction.fault, Some(NormalException::InvalidDescriptor));
    assert_eq!(instruction.operands[0].mode, 5);
    assert_eq!(instruction.operands[0].reg, 11);
    assert_eq!(instruction.operands[0].embedded, 0);
    assert_eq!(instruction.operands[1].reg, 1);
    assert_eq!(instruction.len, 3);
}

#[test]
fn test_short_offset_modes_embed_the_register_nibble() {
    let instruction = decode_bytes(&[0x84, 0x63, 0x75]);
    assert_eq!(instruction.operands[0].mode, 6);
    assert_eq!(instruction.operands[0].embedded, 3);
    assert_eq!(instruction.operands[1].mode, 7);
    assert_eq!(instruction.operands[1].embedded, 5);
    assert_eq!(instruction.len, 3);
}

#[test]
fn test_embedded_halfword_branch() {
    let instruction = decode_bytes(&[0x7a, 0x10, 0x20]);
    assert_eq!(instruction.mnemonic.map(|mn| mn.op), Some(Opcode::Brh));
    assert_eq!(instruction.operands[0].mode, 5);
    assert_eq!(instruction.operands[0].reg, 15);
    assert_eq!(instruction.operands[0].embedded, 0x2010);
    assert_eq!(instruction.len, 3);
}

#[test]
fn test_coprocessor_operation_word() {
    let instruction = decode_bytes(&[0x32, 0x01, 0x02, 0x03, 0x04]);
    assert_eq!(instruction.mnemonic.map(|mn| mn.op), Some(Opcode::Spop));
    assert_eq!(instruction.operands[0].mode, 4);
    assert_eq!(instruction.operands[0].reg, 15);
    assert_eq!(instruction.operands[0].embedded, 0x0403_0201);
    assert_eq!(instruction.len, 5);
}

#[test]
fn test_displacement_widths() {
    // Word displacement deferred from %r2.
    let instruction = decode_bytes(&[0x84, 0x92, 0x44, 0x33, 0x22, 0x11, 0x40]);
    assert_eq!(instruction.operands[0].mode, 9);
    assert_eq!(instruction.operands[0].embedded, 0x1122_3344);
    assert_eq!(instruction.len, 7);

    // Byte displacement from %r1.
    let instruction = decode_bytes(&[0x84, 0xc1, 0xfe, 0x40]);
    assert_eq!(instruction.operands[0].mode, 12);
    assert_eq!(instruction.operands[0].embedded, 0xfe);
    assert_eq!(instruction.len, 4);
}

#[test]
fn test_display_rendering() {
    let instruction = decode_bytes(&[0x84, 0x4f, 0x00, 0x01, 0x00, 0x00, 0xc1, 0x08]);
    assert_eq!(
        instruction.to_string(),
        "00000000 00000000| MOVW &0x100,8(%r1)\n                   00000100 00000008"
    );

    let instruction = decode_bytes(&[0xdc, 0xe3, 0x40, 0x41, 0x42]);
    let expected = concat!(
        "00000000 00000000| ADDW3 {ubyte}%r0,{ubyte}%r1,{ubyte}%r2\n",
        "                   00000000 00000000 00000000"
    );
    assert_eq!(instruction.to_string(), expected);

    // Negative displacements render in the same casts the debugger
    // output always used: bytes in decimal, halves and words as
    // sign-extended hex patterns.
    let instruction = decode_bytes(&[0x24, 0xdc, 0xfc]);
    assert_eq!(
        instruction.to_string(),
        "00000000 00000000| JMP *-4(%sp)\n                   000000fc"
    );

    let instruction = decode_bytes(&[0x70]);
    assert_eq!(instruction.to_string(), "00000000 00000000| NOP");

    let instruction = decode_bytes(&[0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x41]);
    assert_eq!(
        instruction.to_string(),
        "00000000 00000000| SPOPRD &0xddccbbaa,%r1"
    );
}

#[test]
fn test_absolute_and_absolute_deferred_rendering() {
    let instruction = decode_bytes(&[0x24, 0x7f, 0x00, 0x80, 0x00, 0x00]);
    assert_eq!(instruction.operands[0].mode, 7);
    assert_eq!(
        instruction.to_string(),
        "00000000 00000000| JMP $0x8000\n                   00008000"
    );

    let instruction = decode_bytes(&[0x24, 0xef, 0x00, 0x80, 0x00, 0x00]);
    assert_eq!(instruction.operands[0].mode, 14);
    assert_eq!(
        instruction.to_string(),
        "00000000 00000000| JMP *$0x8000\n                   00008000"
    );
}
