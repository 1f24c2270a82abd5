//! Data transfer opcodes.
//!
//! - MOVW/MOVH/MOVB: [`Cpu::op_mov`]
//! - MOVAW: [`Cpu::op_movaw`]
//! - MOVTRW: [`Cpu::op_movtrw`]
//! - SWAPWI/SWAPHI/SWAPBI: [`Cpu::op_swap_interlocked`]
//! - CLRW/CLRH/CLRB: [`Cpu::op_clr`]
//! - PUSHW: [`Cpu::op_pushw`]
//! - PUSHAW: [`Cpu::op_pushaw`]
//! - POPW: [`Cpu::op_popw`]
//! - MOVBLW: [`Cpu::op_movblw`]
//! - STRCPY: [`Cpu::op_strcpy`]

use base::instruction::MAX_OPERANDS;
use base::prelude::*;
use base::registers::PSW;

use crate::bus::Bus;
use crate::control::{Cpu, Outcome};
use crate::decode::Operand;

impl Cpu {
    /// Move.  The datatype governs extension on the read side and V
    /// on the write side: a value with significant bits beyond a
    /// halfword or byte destination sets V.  When either operand is
    /// the PSW itself the flags are left entirely alone, and a move
    /// into the PSW whose value has OE set delivers the pending
    /// overflow trap.
    pub(super) fn op_mov(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[src]);
        self.write_op(bus, &mut operands[dst], u64::from(a));

        if !(is_psw_register(&operands[src]) || is_psw_register(&operands[dst])) {
            self.set_nz_flags(u64::from(a), &operands[dst]);
            self.set_flag(psw::C_MASK, false);
            self.set_v_flag_from(u64::from(a), &operands[dst]);
        }

        if is_psw_register(&operands[dst]) && self.registers[PSW] & psw::OE_MASK != 0 {
            self.raise(NormalException::IntegerOverflow);
        }
        Outcome::Completed
    }

    /// Move address: the source's effective address is the value.
    /// N and Z take the source operand's width.
    pub(super) fn op_movaw(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.effective_address(bus, &mut operands[src]);
        self.write_op(bus, &mut operands[dst], u64::from(a));
        self.set_nz_flags(u64::from(a), &operands[src]);
        self.set_v_flag(false);
        self.set_flag(psw::C_MASK, false);
        Outcome::Completed
    }

    /// Move translated: runs the source's effective address through
    /// the memory management unit and stores the physical result.  A
    /// translation fault latches and the destination takes zero.
    pub(super) fn op_movtrw(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src: usize,
        dst: usize,
    ) -> Outcome {
        let a = self.effective_address(bus, &mut operands[src]);
        let result = match bus.translate(a) {
            Ok(physical) => physical,
            Err(fault) => {
                self.memory_fault(fault);
                0
            }
        };
        self.write_op(bus, &mut operands[dst], u64::from(result));
        self.set_nz_flags(u64::from(result), &operands[dst]);
        self.set_v_flag(false);
        self.set_flag(psw::C_MASK, false);
        Outcome::Completed
    }

    /// Exchanges the operand with R0.  The flags describe the old
    /// operand value.  The bus interlock the hardware asserts during
    /// the exchange has no analogue in a single-threaded engine.
    pub(super) fn op_swap_interlocked(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        dst: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[dst]);
        self.write_op(bus, &mut operands[dst], u64::from(self.registers[0]));
        self.registers[0] = a;
        self.set_nz_flags(u64::from(a), &operands[dst]);
        self.set_v_flag(false);
        self.set_flag(psw::C_MASK, false);
        Outcome::Completed
    }

    pub(super) fn op_clr(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        dst: usize,
    ) -> Outcome {
        self.write_op(bus, &mut operands[dst], 0);
        self.set_flag(psw::N_MASK, false);
        self.set_flag(psw::Z_MASK, true);
        self.set_flag(psw::C_MASK, false);
        self.set_v_flag(false);
        Outcome::Completed
    }

    /// Pushes the operand value.  Rewrites only N and Z.
    pub(super) fn op_pushw(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src: usize,
    ) -> Outcome {
        let a = self.read_op(bus, &mut operands[src]);
        self.push_word(bus, a);
        self.set_nz_flags(u64::from(a), &operands[src]);
        Outcome::Completed
    }

    /// Pushes the operand's effective address.
    pub(super) fn op_pushaw(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src: usize,
    ) -> Outcome {
        let a = self.effective_address(bus, &mut operands[src]);
        self.push_word(bus, a);
        self.set_nz_flags(u64::from(a), &operands[src]);
        self.set_flag(psw::C_MASK, false);
        self.set_v_flag(false);
        Outcome::Completed
    }

    pub(super) fn op_popw(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        dst: usize,
    ) -> Outcome {
        let a = self.pop_word(bus);
        self.write_op(bus, &mut operands[dst], u64::from(a));
        self.set_nz_flags(u64::from(a), &operands[dst]);
        self.set_flag(psw::C_MASK, false);
        self.set_v_flag(false);
        Outcome::Completed
    }

    /// Block move: copies R2 words from the address in R0 to the
    /// address in R1, leaving the registers at their final values.
    pub(super) fn op_movblw(&mut self, bus: &mut Bus) -> Outcome {
        while self.registers[2] > 0 {
            let word = self.fetch_word(bus, self.registers[0]);
            self.store_word(bus, self.registers[1], word);
            self.registers[2] = self.registers[2].wrapping_sub(1);
            self.registers[0] = self.registers[0].wrapping_add(4);
            self.registers[1] = self.registers[1].wrapping_add(4);
        }
        Outcome::Completed
    }

    /// String copy: bytes from the address in R0 to the address in
    /// R1, up to and including the terminating NUL.  R0 and R1 are
    /// left pointing at the start of their strings.
    pub(super) fn op_strcpy(&mut self, bus: &mut Bus) -> Outcome {
        let mut offset = 0u32;
        loop {
            let byte = self.fetch_byte(bus, self.registers[0].wrapping_add(offset));
            self.store_byte(bus, self.registers[1].wrapping_add(offset), byte as u8);
            offset = offset.wrapping_add(1);
            if byte == 0 {
                break;
            }
        }
        Outcome::Completed
    }
}

/// Register mode naming the PSW.
fn is_psw_register(operand: &Operand) -> bool {
    operand.mode == 4 && usize::from(operand.reg) == PSW
}
