//! Arithmetic, logic, shift and bit-field opcodes.
//!
//! - ADDW2/ADDH2/ADDB2, ADDW3/ADDH3/ADDB3: [`Cpu::op_add`]
//! - SUBW2/SUBH2/SUBB2, SUBW3/SUBH3/SUBB3: [`Cpu::op_sub`]
//! - INCW/INCH/INCB: [`Cpu::op_inc`]
//! - DECW/DECH/DECB: [`Cpu::op_dec`]
//! - MULW2/MULH2/MULB2, MULW3/MULH3/MULB3: [`Cpu::op_mul`]
//! - DIVW2/DIVH2/DIVB2, DIVW3/DIVH3/DIVB3: [`Cpu::op_div`]
//! - MODW2/MODH2/MODB2, MODW3/MODH3/MODB3: [`Cpu::op_mod`]
//! - ANDW2/ANDH2/ANDB2, ANDW3/ANDH3/ANDB3: [`Cpu::op_and`]
//! - ORW2/ORH2/ORB2, ORW3/ORH3/ORB3: [`Cpu::op_or`]
//! - XORW2/XORH2/XORB2, XORW3/XORH3/XORB3: [`Cpu::op_xor`]
//! - MCOMW/MCOMH/MCOMB: [`Cpu::op_mcom`]
//! - MNEGW/MNEGH/MNEGB: [`Cpu::op_mneg`]
//! - BITW/BITH/BITB: [`Cpu::op_bit`]
//! - CMPW/CMPH/CMPB: [`Cpu::op_cmp`]
//! - TSTW/TSTH/TSTB: [`Cpu::op_tst`]
//! - ALSW3: [`Cpu::op_als`]
//! - LLSW3/LLSH3/LLSB3: [`Cpu::op_lls`]
//! - ARSW3/ARSH3/ARSB3: [`Cpu::op_ars`]
//! - LRSW3: [`Cpu::op_lrs`]
//! - ROTW: [`Cpu::op_rot`]
//! - EXTFW/EXTFH/EXTFB: [`Cpu::op_extf`]
//! - INSFW/INSFH/INSFB: [`Cpu::op_insf`]
//!
//! Arithmetic runs at 64-bit width on the 32-bit-extended operand
//! values, so a carry out of the operand width survives into the
//! flag computations.  The dyadic and triadic spellings of each
//! operation share one method; the dispatcher passes the destination
//! slot twice for the dyadic form.

use base::instruction::MAX_OPERANDS;
use base::prelude::*;

use crate::bus::Bus;
use crate::control::{Cpu, Outcome};
use crate::decode::Operand;

impl Cpu {
    /// Addition.  N, Z, C and V are all rewritten; the destination
    /// is written after the flags, so an addition into the PSW wins
    /// over them.
    pub(super) fn op_add(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        lhs: usize,
        rhs: usize,
        dst: usize,
    ) -> Outcome {
        let a = u64::from(self.read_op(bus, &mut operands[lhs]));
        let b = u64::from(self.read_op(bus, &mut operands[rhs]));
        self.add_values(bus, operands, a, b, dst);
        Outcome::Completed
    }

    /// Subtraction: `dst = minuend - subtrahend`.  The dyadic form
    /// reads the destination first, the triadic form its second
    /// source.
    pub(super) fn op_sub(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        minuend: usize,
        subtrahend: usize,
        dst: usize,
    ) -> Outcome {
        let a = u64::from(self.read_op(bus, &mut operands[minuend]));
        let b = u64::from(self.read_op(bus, &mut operands[subtrahend]));
        self.sub_values(bus, operands, a, b, dst);
        Outcome::Completed
    }

    pub(super) fn op_inc(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        dst: usize,
    ) -> Outcome {
        let a = u64::from(self.read_op(bus, &mut operands[dst]));
        self.add_values(bus, operands, a, 1, dst);
        Outcome::Completed
    }

    pub(super) fn op_dec(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        dst: usize,
    ) -> Outcome {
        let a = u64::from(self.read_op(bus, &mut operands[dst]));
        self.sub_values(bus, operands, a, 1, dst);
        Outcome::Completed
    }

    /// Multiplication wraps at 32 bits and rewrites only N and Z.
    pub(super) fn op_mul(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        lhs: usize,
        rhs: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[lhs]);
        let b = self.read_op(bus, &mut operands[rhs]);
        let result = u64::from(a.wrapping_mul(b));
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        Outcome::Completed
    }

    /// Division, unsigned.  A zero divisor raises the zero-divide
    /// exception and leaves the destination untouched.  The dyadic
    /// form rewrites V from the result width; the triadic form
    /// leaves V alone.
    pub(super) fn op_div(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        divisor: usize,
        dividend: usize,
        dst: usize,
        update_v: bool,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[divisor]);
        let b = self.read_op(bus, &mut operands[dividend]);

        if a == 0 {
            self.raise(NormalException::IntegerZeroDivide);
            return Outcome::Completed;
        }

        let result = u64::from(b / a);
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        self.set_flag(psw::C_MASK, false);
        if update_v {
            self.set_v_flag_from(result, &operands[dst]);
        }
        Outcome::Completed
    }

    /// Remainder, unsigned, with the same zero-divisor exception as
    /// [`Cpu::op_div`].  Rewrites only N and Z.
    pub(super) fn op_mod(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        divisor: usize,
        dividend: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[divisor]);
        let b = self.read_op(bus, &mut operands[dividend]);

        if a == 0 {
            self.raise(NormalException::IntegerZeroDivide);
            return Outcome::Completed;
        }

        let result = u64::from(b % a);
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        Outcome::Completed
    }

    pub(super) fn op_and(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        lhs: usize,
        rhs: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[lhs]);
        let b = self.read_op(bus, &mut operands[rhs]);
        let result = u64::from(a & b);
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        self.set_flag(psw::C_MASK, false);
        self.set_v_flag(false);
        Outcome::Completed
    }

    /// Inclusive or.  The dyadic form clears C and V; the triadic
    /// form leaves them untouched.
    pub(super) fn op_or(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        lhs: usize,
        rhs: usize,
        dst: usize,
        clear_cv: bool,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[lhs]);
        let b = self.read_op(bus, &mut operands[rhs]);
        let result = u64::from(a | b);
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        if clear_cv {
            self.set_flag(psw::C_MASK, false);
            self.set_v_flag(false);
        }
        Outcome::Completed
    }

    /// Exclusive or.  Rewrites only N and Z.
    pub(super) fn op_xor(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        lhs: usize,
        rhs: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[lhs]);
        let b = self.read_op(bus, &mut operands[rhs]);
        let result = u64::from(a ^ b);
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        Outcome::Completed
    }

    /// Move complemented.
    pub(super) fn op_mcom(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src: usize,
        dst: usize,
    ) -> Outcome {
        let a = u64::from(!self.read_op(bus, &mut operands[src]));
        self.write_op(bus, &mut operands[dst], a);
        self.set_nz_flags(a, &operands[dst]);
        Outcome::Completed
    }

    /// Move negated (two's complement).
    pub(super) fn op_mneg(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src: usize,
        dst: usize,
    ) -> Outcome {
        let a = u64::from((!self.read_op(bus, &mut operands[src])).wrapping_add(1));
        self.write_op(bus, &mut operands[dst], a);
        self.set_nz_flags(a, &operands[dst]);
        Outcome::Completed
    }

    /// Bit test: ands the sources and sets N and Z from the result
    /// without writing it anywhere.  The flags take the second
    /// operand's width.
    pub(super) fn op_bit(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        lhs: usize,
        rhs: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[lhs]);
        let b = self.read_op(bus, &mut operands[rhs]);
        let result = u64::from(a & b);
        self.set_nz_flags(result, &operands[rhs]);
        self.set_flag(psw::C_MASK, false);
        self.set_v_flag(false);
        Outcome::Completed
    }

    /// Comparison: `second ? first` at the width the opcode names,
    /// regardless of any expanded operand type.  N is the signed
    /// less-than, C the unsigned one.
    pub(super) fn op_cmp(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        lhs: usize,
        rhs: usize,
        datatype: Datatype,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[lhs]);
        let b = self.read_op(bus, &mut operands[rhs]);
        match datatype {
            Datatype::Word | Datatype::UWord => {
                self.set_flag(psw::Z_MASK, b == a);
                self.set_flag(psw::N_MASK, (b as i32) < (a as i32));
                self.set_flag(psw::C_MASK, b < a);
            }
            Datatype::Half | Datatype::UHalf => {
                self.set_flag(psw::Z_MASK, b as u16 == a as u16);
                self.set_flag(psw::N_MASK, (b as i16) < (a as i16));
                self.set_flag(psw::C_MASK, (b as u16) < (a as u16));
            }
            Datatype::Byte | Datatype::SByte => {
                self.set_flag(psw::Z_MASK, b as u8 == a as u8);
                self.set_flag(psw::N_MASK, (b as i8) < (a as i8));
                self.set_flag(psw::C_MASK, (b as u8) < (a as u8));
            }
        }
        self.set_v_flag(false);
        Outcome::Completed
    }

    /// Test: N and Z from the operand value at the opcode's width, C
    /// and V cleared.
    pub(super) fn op_tst(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src: usize,
        datatype: Datatype,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[src]);
        self.set_nz_flags(u64::from(a & datatype.mask()), &operands[src]);
        self.set_flag(psw::C_MASK, false);
        self.set_v_flag(false);
        Outcome::Completed
    }

    /// Arithmetic left shift.  Shift counts are taken modulo 32.
    /// Bits shifted beyond bit 31 are lost before the V computation,
    /// so the word form always clears V.
    pub(super) fn op_als(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        count: usize,
        value: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[value]);
        let shift = self.read_op(bus, &mut operands[count]) & 0x1f;
        let result = u64::from(a << shift);
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        self.set_flag(psw::C_MASK, false);
        self.set_v_flag_from(result, &operands[dst]);
        Outcome::Completed
    }

    /// Logical left shift.  Rewrites only N and Z.
    pub(super) fn op_lls(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        count: usize,
        value: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[value]);
        let shift = self.read_op(bus, &mut operands[count]) & 0x1f;
        let result = u64::from(a << shift);
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        Outcome::Completed
    }

    /// Arithmetic right shift.  When the sign bit of the source's
    /// width is set, the vacated bits fill with ones; the unsigned
    /// expanded types shift logically.
    pub(super) fn op_ars(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        count: usize,
        value: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[value]);
        let shift = self.read_op(bus, &mut operands[count]) & 0x1f;
        let mut result = u64::from(a >> shift);
        match operands[value].op_type() {
            Datatype::Word if a & 0x8000_0000 != 0 => result |= sign_fill(32, shift),
            Datatype::Half if a & 0x8000 != 0 => result |= sign_fill(16, shift),
            Datatype::Byte if a & 0x80 != 0 => result |= sign_fill(8, shift),
            _ => {}
        }
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        Outcome::Completed
    }

    /// Logical right shift.  Rewrites only N and Z.
    pub(super) fn op_lrs(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        count: usize,
        value: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[value]);
        let shift = self.read_op(bus, &mut operands[count]) & 0x1f;
        let result = u64::from(a >> shift);
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        Outcome::Completed
    }

    /// Rotate right.  The count operand is read before the value.
    pub(super) fn op_rot(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        count: usize,
        value: usize,
        dst: usize,
    ) -> Outcome {
        let shift = self.read_op(bus, &mut operands[count]) & 31;
        let a = self.read_op(bus, &mut operands[value]);
        let result = u64::from(a.rotate_right(shift));
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        self.set_v_flag(false);
        self.set_flag(psw::C_MASK, false);
        Outcome::Completed
    }

    /// Field extract: `dst = (src >> offset) & mask`, where the
    /// first two operands give a field of `(w & 0x1f) + 1` bits at
    /// bit `offset & 0x1f`.
    pub(super) fn op_extf(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src1: usize,
        src2: usize,
        src3: usize,
        dst: usize,
    ) -> Outcome {
        let width = (self.read_op(bus, &mut operands[src1]) & 0x1f) + 1;
        let offset = self.read_op(bus, &mut operands[src2]) & 0x1f;
        let a = u64::from(self.read_op(bus, &mut operands[src3]));
        let mask = (1u64 << width) - 1;

        let result = (a & (mask << offset)) >> offset;
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        Outcome::Completed
    }

    /// Field insert: replaces the field in the destination with the
    /// low bits of the third operand.  The inserted value is not
    /// masked to the field width, faithfully to the processor.
    pub(super) fn op_insf(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src1: usize,
        src2: usize,
        src3: usize,
        dst: usize,
    ) -> Outcome {
        let width = (self.read_op(bus, &mut operands[src1]) & 0x1f) + 1;
        let offset = self.read_op(bus, &mut operands[src2]) & 0x1f;
        let a = u64::from(self.read_op(bus, &mut operands[src3]));
        let b = u64::from(self.read_op(bus, &mut operands[dst]));
        let mask = (1u64 << width) - 1;

        let result = (b & !(mask << offset)) | (a << offset);
        self.write_op(bus, &mut operands[dst], result);
        self.set_nz_flags(result, &operands[dst]);
        Outcome::Completed
    }

    /// Shared tail of the ADD/INC family.  Flags are computed before
    /// the destination write.
    fn add_values(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        a: u64,
        b: u64,
        dst: usize,
    ) {
        let result = a + b;
        self.set_nz_flags(result, &operands[dst]);

        let datatype = operands[dst].op_type();
        self.set_flag(psw::C_MASK, result > u64::from(datatype.mask()));
        let overflow = (a ^ !b) & (a ^ result) & u64::from(datatype.sign_bit());
        self.set_v_flag(overflow != 0);

        self.write_op(bus, &mut operands[dst], result);
    }

    /// Shared tail of the SUB/DEC family.  The destination is
    /// written before the flags.
    fn sub_values(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        a: u64,
        b: u64,
        dst: usize,
    ) {
        let result = a.wrapping_sub(b);
        self.write_op(bus, &mut operands[dst], result);

        self.set_nz_flags(result, &operands[dst]);
        self.set_flag(psw::C_MASK, (b as u32) > (a as u32));
        let datatype = operands[dst].op_type();
        let overflow = (a ^ b) & (!a ^ result) & u64::from(datatype.sign_bit());
        self.set_v_flag(overflow != 0);
    }
}

/// The top `shift + 1` bits of a field `width` bits wide, used as
/// the one-fill of an arithmetic right shift.
fn sign_fill(width: u32, shift: u32) -> u64 {
    let count = (shift + 1).min(width);
    let mask = (1u64 << width) - 1;
    (mask << (width - count)) & mask
}

#[cfg(test)]
mod tests {
    use base::prelude::*;
    use base::registers::{PC, PSW};

    use super::sign_fill;
    use crate::bus::{Bus, MemoryConfiguration, RAM_BASE};
    use crate::control::{Cpu, StopReason};

    const COMPLAIN: &str = "failed to set up ALU test program";

    /// Loads `program` at the bottom of RAM and points the program
    /// counter at it.  Translation is off, so virtual addresses are
    /// physical ones.
    fn set_up(program: &[u8]) -> (Cpu, Bus) {
        let mut bus = Bus::new(&MemoryConfiguration::default());
        for (index, byte) in program.iter().enumerate() {
            bus.write_byte(RAM_BASE + index as u32, *byte)
                .expect(COMPLAIN);
        }
        let mut cpu = Cpu::new();
        cpu.registers[PC] = RAM_BASE;
        (cpu, bus)
    }

    #[test]
    fn add_word_carry_out_sets_c_and_z() {
        // ADDW2 %r0,%r1
        let (mut cpu, mut bus) = set_up(&[0x9c, 0x40, 0x41]);
        cpu.registers[0] = 1;
        cpu.registers[1] = 0xffff_ffff;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0);
        assert!(cpu.z_flag());
        assert!(cpu.c_flag());
        assert!(!cpu.n_flag());
        assert!(!cpu.v_flag());
        assert_eq!(cpu.registers[PC], RAM_BASE + 3);
    }

    #[test]
    fn add_word_signed_overflow_sets_v() {
        let (mut cpu, mut bus) = set_up(&[0x9c, 0x40, 0x41]);
        cpu.registers[0] = 0x7fff_ffff;
        cpu.registers[1] = 1;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x8000_0000);
        assert!(cpu.n_flag());
        assert!(cpu.v_flag());
        assert!(!cpu.c_flag());
        assert!(!cpu.z_flag());
    }

    #[test]
    fn add_half_width_flags() {
        // ADDH2 %r0,%r1: 0x7fff + 1 overflows at halfword width.
        let (mut cpu, mut bus) = set_up(&[0x9e, 0x40, 0x41]);
        cpu.registers[0] = 0x7fff;
        cpu.registers[1] = 1;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x8000);
        assert!(cpu.n_flag());
        assert!(cpu.v_flag());
        assert!(!cpu.c_flag());
    }

    #[test]
    fn expanded_byte_add_narrows_the_flags() {
        // ADDW2 {ubyte}%r0,{ubyte}%r1: 0xff + 1 carries out of the
        // byte, and the register still takes all 32 result bits.
        let (mut cpu, mut bus) = set_up(&[0x9c, 0xe3, 0x40, 0x41]);
        cpu.registers[0] = 0x1ff;
        cpu.registers[1] = 1;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x100);
        assert!(cpu.z_flag());
        assert!(cpu.c_flag());
    }

    #[test]
    fn sub_borrow_sets_c_and_n() {
        // SUBW2 %r0,%r1 computes r1 - r0.
        let (mut cpu, mut bus) = set_up(&[0xbc, 0x40, 0x41]);
        cpu.registers[0] = 7;
        cpu.registers[1] = 5;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0xffff_fffe);
        assert!(cpu.n_flag());
        assert!(cpu.c_flag());
        assert!(!cpu.v_flag());
        assert!(!cpu.z_flag());
    }

    #[test]
    fn sub3_subtracts_first_source_from_second() {
        // SUBW3 %r0,%r1,%r2 computes r2 = r1 - r0.
        let (mut cpu, mut bus) = set_up(&[0xfc, 0x40, 0x41, 0x42]);
        cpu.registers[0] = 3;
        cpu.registers[1] = 10;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[2], 7);
        assert!(!cpu.c_flag());
    }

    #[test]
    fn inc_wraps_to_zero_with_carry() {
        // INCW %r0
        let (mut cpu, mut bus) = set_up(&[0x90, 0x40]);
        cpu.registers[0] = 0xffff_ffff;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[0], 0);
        assert!(cpu.z_flag());
        assert!(cpu.c_flag());
        assert!(!cpu.v_flag());
    }

    #[test]
    fn dec_underflows_with_borrow() {
        // DECW %r0
        let (mut cpu, mut bus) = set_up(&[0x94, 0x40]);
        cpu.registers[0] = 0;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[0], 0xffff_ffff);
        assert!(cpu.n_flag());
        assert!(cpu.c_flag());
        assert!(!cpu.v_flag());
    }

    #[test]
    fn mul_wraps_and_preserves_carry() {
        // MULW2 %r0,%r1
        let (mut cpu, mut bus) = set_up(&[0xa8, 0x40, 0x41]);
        cpu.registers[0] = 0x10000;
        cpu.registers[1] = 0x10000;
        cpu.registers[PSW] |= psw::C_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0);
        assert!(cpu.z_flag());
        assert!(cpu.c_flag());
    }

    #[test]
    fn div_is_unsigned_and_clears_c_and_v() {
        // DIVW2 %r0,%r1 computes r1 / r0.
        let (mut cpu, mut bus) = set_up(&[0xac, 0x40, 0x41]);
        cpu.registers[0] = 2;
        cpu.registers[1] = 0xffff_fffe;
        cpu.registers[PSW] |= psw::C_MASK | psw::V_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x7fff_ffff);
        assert!(!cpu.c_flag());
        assert!(!cpu.v_flag());
    }

    #[test]
    fn div3_leaves_v_alone() {
        // DIVW3 %r0,%r1,%r2
        let (mut cpu, mut bus) = set_up(&[0xec, 0x40, 0x41, 0x42]);
        cpu.registers[0] = 3;
        cpu.registers[1] = 10;
        cpu.registers[PSW] |= psw::V_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[2], 3);
        assert!(cpu.v_flag());
        assert!(!cpu.c_flag());
    }

    #[test]
    fn divide_by_zero_raises_without_touching_dst() {
        let (mut cpu, mut bus) = set_up(&[0xac, 0x40, 0x41]);
        cpu.set_halt_on_exception(true);
        cpu.registers[0] = 0;
        cpu.registers[1] = 55;
        let stop = cpu.step(&mut bus);
        assert_eq!(
            stop,
            Some(StopReason::HaltedOnException {
                pc: RAM_BASE,
                isc: NormalException::IntegerZeroDivide.code(),
            })
        );
        assert_eq!(cpu.registers[1], 55);
        // Exceptions dispatch before the program counter advances.
        assert_eq!(cpu.registers[PC], RAM_BASE);
    }

    #[test]
    fn mod_computes_remainder() {
        // MODW2 %r0,%r1
        let (mut cpu, mut bus) = set_up(&[0xa4, 0x40, 0x41]);
        cpu.registers[0] = 7;
        cpu.registers[1] = 23;
        cpu.registers[PSW] |= psw::C_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 2);
        assert!(cpu.c_flag());
    }

    #[test]
    fn mod_by_zero_raises() {
        let (mut cpu, mut bus) = set_up(&[0xa4, 0x40, 0x41]);
        cpu.set_halt_on_exception(true);
        cpu.registers[0] = 0;
        cpu.registers[1] = 23;
        let stop = cpu.step(&mut bus);
        assert_eq!(
            stop,
            Some(StopReason::HaltedOnException {
                pc: RAM_BASE,
                isc: NormalException::IntegerZeroDivide.code(),
            })
        );
        assert_eq!(cpu.registers[1], 23);
    }

    #[test]
    fn and_clears_c_and_v() {
        // ANDW2 %r0,%r1
        let (mut cpu, mut bus) = set_up(&[0xb8, 0x40, 0x41]);
        cpu.registers[0] = 0x0ff0;
        cpu.registers[1] = 0xff00;
        cpu.registers[PSW] |= psw::C_MASK | psw::V_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x0f00);
        assert!(!cpu.c_flag());
        assert!(!cpu.v_flag());
    }

    #[test]
    fn or2_clears_carry_but_or3_preserves_it() {
        let (mut cpu, mut bus) = set_up(&[0xb0, 0x40, 0x41]);
        cpu.registers[0] = 0x0f;
        cpu.registers[1] = 0xf0;
        cpu.registers[PSW] |= psw::C_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0xff);
        assert!(!cpu.c_flag());

        let (mut cpu, mut bus) = set_up(&[0xf0, 0x40, 0x41, 0x42]);
        cpu.registers[0] = 0x0f;
        cpu.registers[1] = 0xf0;
        cpu.registers[PSW] |= psw::C_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[2], 0xff);
        assert!(cpu.c_flag());
    }

    #[test]
    fn xor_preserves_carry() {
        // XORW2 %r0,%r1
        let (mut cpu, mut bus) = set_up(&[0xb4, 0x40, 0x41]);
        cpu.registers[0] = 0xff00_00ff;
        cpu.registers[1] = 0x0000_ffff;
        cpu.registers[PSW] |= psw::C_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0xff00_ff00);
        assert!(cpu.n_flag());
        assert!(cpu.c_flag());
    }

    #[test]
    fn mcom_complements() {
        // MCOMW %r0,%r1
        let (mut cpu, mut bus) = set_up(&[0x88, 0x40, 0x41]);
        cpu.registers[0] = 0x0000_ffff;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0xffff_0000);
        assert!(cpu.n_flag());
    }

    #[test]
    fn mneg_negates_and_zero_stays_zero() {
        // MNEGW %r0,%r1
        let (mut cpu, mut bus) = set_up(&[0x8c, 0x40, 0x41]);
        cpu.registers[0] = 5;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0xffff_fffb);
        assert!(cpu.n_flag());

        let (mut cpu, mut bus) = set_up(&[0x8c, 0x40, 0x41]);
        cpu.registers[0] = 0;
        cpu.registers[1] = 1;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0);
        assert!(cpu.z_flag());
    }

    #[test]
    fn bit_tests_without_writing() {
        // BITW %r0,%r1
        let (mut cpu, mut bus) = set_up(&[0x38, 0x40, 0x41]);
        cpu.registers[0] = 0xf0;
        cpu.registers[1] = 0x0f;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[0], 0xf0);
        assert_eq!(cpu.registers[1], 0x0f);
        assert!(cpu.z_flag());
        assert!(!cpu.c_flag());
    }

    #[test]
    fn cmp_word_flags() {
        // CMPW &5,%r0 with r0 = 3: the second operand is less.
        let (mut cpu, mut bus) = set_up(&[0x3c, 0x05, 0x40]);
        cpu.registers[0] = 3;
        assert_eq!(cpu.step(&mut bus), None);
        assert!(cpu.n_flag());
        assert!(cpu.c_flag());
        assert!(!cpu.z_flag());
        assert!(!cpu.v_flag());
    }

    #[test]
    fn cmp_byte_compares_signed_at_byte_width() {
        // CMPB %r0,%r1 with r0 = 0x80 (-128) and r1 = 0x7f (127):
        // signed says the second is greater, unsigned says less.
        let (mut cpu, mut bus) = set_up(&[0x3f, 0x40, 0x41]);
        cpu.registers[0] = 0x80;
        cpu.registers[1] = 0x7f;
        assert_eq!(cpu.step(&mut bus), None);
        assert!(!cpu.n_flag());
        assert!(cpu.c_flag());

        // The same values at word width are both positive.
        let (mut cpu, mut bus) = set_up(&[0x3c, 0x40, 0x41]);
        cpu.registers[0] = 0x80;
        cpu.registers[1] = 0x7f;
        assert_eq!(cpu.step(&mut bus), None);
        assert!(cpu.n_flag());
        assert!(cpu.c_flag());
    }

    #[test]
    fn tst_sets_n_and_clears_c_v() {
        // TSTW %r0
        let (mut cpu, mut bus) = set_up(&[0x28, 0x40]);
        cpu.registers[0] = 0x8000_0000;
        cpu.registers[PSW] |= psw::C_MASK | psw::V_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert!(cpu.n_flag());
        assert!(!cpu.z_flag());
        assert!(!cpu.c_flag());
        assert!(!cpu.v_flag());
    }

    #[test]
    fn als_shifts_left_and_clears_c() {
        // ALSW3 &4,%r0,%r1
        let (mut cpu, mut bus) = set_up(&[0xc0, 0x04, 0x40, 0x41]);
        cpu.registers[0] = 0x0800_0001;
        cpu.registers[PSW] |= psw::C_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x8000_0010);
        assert!(cpu.n_flag());
        assert!(!cpu.c_flag());
        assert!(!cpu.v_flag());
    }

    #[test]
    fn lls_half_keeps_full_register_result() {
        // LLSH3 &4,%r0,%r1: the halfword source sign-extends on
        // read, the shifted value lands in the register unmasked,
        // and the flags take halfword width.
        let (mut cpu, mut bus) = set_up(&[0xd2, 0x04, 0x40, 0x41]);
        cpu.registers[0] = 0xff00;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0xffff_f000);
        assert!(cpu.n_flag());
        assert!(!cpu.z_flag());
    }

    #[test]
    fn ars_fills_with_the_sign() {
        // ARSW3 &4,%r0,%r1
        let (mut cpu, mut bus) = set_up(&[0xc4, 0x04, 0x40, 0x41]);
        cpu.registers[0] = 0x8000_0000;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0xf800_0000);
        assert!(cpu.n_flag());

        // ARSB3 &1,%r0,%r1 at byte width: -128 >> 1 is -64.
        let (mut cpu, mut bus) = set_up(&[0xc7, 0x01, 0x40, 0x41]);
        cpu.registers[0] = 0x80;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0xc0);
        assert!(cpu.n_flag());
    }

    #[test]
    fn lrs_shifts_in_zeroes() {
        // LRSW3 &4,%r0,%r1
        let (mut cpu, mut bus) = set_up(&[0xd4, 0x04, 0x40, 0x41]);
        cpu.registers[0] = 0x8000_0000;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x0800_0000);
        assert!(!cpu.n_flag());
    }

    #[test]
    fn rot_rotates_right() {
        // ROTW &8,%r0,%r1
        let (mut cpu, mut bus) = set_up(&[0xd8, 0x08, 0x40, 0x41]);
        cpu.registers[0] = 0x1234_5678;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x7812_3456);
        assert!(!cpu.c_flag());
        assert!(!cpu.v_flag());
    }

    #[test]
    fn extf_extracts_a_field() {
        // EXTFW &7,&8,%r0,%r1: eight bits at offset eight.
        let (mut cpu, mut bus) = set_up(&[0xcc, 0x07, 0x08, 0x40, 0x41]);
        cpu.registers[0] = 0x1234_5678;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x56);
    }

    #[test]
    fn insf_replaces_a_field() {
        // INSFW &7,&8,%r0,%r1: insert the low byte of r0 at offset
        // eight in r1.
        let (mut cpu, mut bus) = set_up(&[0xc8, 0x07, 0x08, 0x40, 0x41]);
        cpu.registers[0] = 0xab;
        cpu.registers[1] = 0x1234_5678;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[1], 0x1234_ab78);
    }

    #[test]
    fn sign_fill_widths() {
        assert_eq!(sign_fill(32, 0), 0x8000_0000);
        assert_eq!(sign_fill(32, 4), 0xf800_0000);
        assert_eq!(sign_fill(32, 31), 0xffff_ffff);
        assert_eq!(sign_fill(8, 1), 0xc0);
        // Counts past the width saturate.
        assert_eq!(sign_fill(16, 30), 0xffff);
        assert_eq!(sign_fill(8, 31), 0xff);
    }
}
