//! Transfer-of-control opcodes.
//!
//! - BR/BE/BNE/BG/BGE/BGEU/BGU/BL/BLE/BLEU/BLU/BVC/BVS (byte and
//!   halfword displacements): [`Cpu::op_branch`]
//! - BSBB/BSBH: [`Cpu::op_bsb`]
//! - JMP: [`Cpu::op_jmp`]
//! - JSB: [`Cpu::op_jsb`]
//! - CALL: [`Cpu::op_call`]
//! - RET: [`Cpu::op_ret`]
//! - RSB and the conditional returns: [`Cpu::op_return_when`]
//! - SAVE: [`Cpu::op_save`]
//! - RESTORE: [`Cpu::op_restore`]
//!
//! The dispatcher evaluates each branch or return condition from the
//! flags and hands the verdict down, so one method serves the whole
//! family.

use base::instruction::MAX_OPERANDS;
use base::registers::{AP, FP, PC, SP};

use crate::bus::Bus;
use crate::control::{Cpu, Outcome};
use crate::decode::Operand;

impl Cpu {
    /// Relative branch.  The displacement is relative to the opcode
    /// byte, already sign extended.
    pub(super) fn op_branch(&mut self, displacement: u32, taken: bool) -> Outcome {
        if taken {
            self.registers[PC] = self.registers[PC].wrapping_add(displacement);
            Outcome::Transfer
        } else {
            Outcome::Completed
        }
    }

    /// Branch to subroutine: stacks the return address, then branches.
    pub(super) fn op_bsb(&mut self, bus: &mut Bus, displacement: u32, next_pc: u32) -> Outcome {
        self.push_word(bus, next_pc);
        self.registers[PC] = self.registers[PC].wrapping_add(displacement);
        Outcome::Transfer
    }

    pub(super) fn op_jmp(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        dst: usize,
    ) -> Outcome {
        self.registers[PC] = self.effective_address(bus, &mut operands[dst]);
        Outcome::Transfer
    }

    pub(super) fn op_jsb(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        dst: usize,
        next_pc: u32,
    ) -> Outcome {
        self.push_word(bus, next_pc);
        self.registers[PC] = self.effective_address(bus, &mut operands[dst]);
        Outcome::Transfer
    }

    /// Call with an argument pointer: the first operand's address
    /// becomes the new AP after the return address and the old AP go
    /// to the stack.  Both addresses are computed before anything is
    /// pushed.
    pub(super) fn op_call(
        &mut self,
        bus: &mut Bus,
        operands: &mut [Operand; MAX_OPERANDS],
        src: usize,
        dst: usize,
        next_pc: u32,
    ) -> Outcome {
        let a = self.effective_address(bus, &mut operands[src]);
        let b = self.effective_address(bus, &mut operands[dst]);
        self.push_word(bus, next_pc);
        self.push_word(bus, self.registers[AP]);
        self.registers[AP] = a;
        self.registers[PC] = b;
        Outcome::Transfer
    }

    /// Return from a CALL.  The stack pointer comes back from AP, so
    /// anything the callee pushed above the frame is discarded along
    /// with the frame itself.
    pub(super) fn op_ret(&mut self, bus: &mut Bus) -> Outcome {
        let a = self.registers[AP];
        let b = self.pop_word(bus);
        let c = self.pop_word(bus);
        self.registers[AP] = b;
        self.registers[PC] = c;
        self.registers[SP] = a;
        Outcome::Transfer
    }

    /// Return from a BSB or JSB when the condition holds.
    pub(super) fn op_return_when(&mut self, bus: &mut Bus, taken: bool) -> Outcome {
        if taken {
            self.registers[PC] = self.pop_word(bus);
            Outcome::Transfer
        } else {
            Outcome::Completed
        }
    }

    /// Builds a register save area: the caller's FP, then the
    /// registers from the operand's number up through R8.  The stack
    /// pointer always moves up by the full seven-word frame no matter
    /// where the run starts, and FP marks the new top.
    pub(super) fn op_save(
        &mut self,
        bus: &mut Bus,
        operands: &[Operand; MAX_OPERANDS],
        src: usize,
    ) -> Outcome {
        let a = self.registers[SP];
        self.push_word(bus, self.registers[FP]);
        for register in usize::from(operands[src].reg)..FP {
            self.push_word(bus, self.registers[register]);
        }
        self.registers[SP] = a.wrapping_add(28);
        self.registers[FP] = self.registers[SP];
        Outcome::Completed
    }

    /// Unwinds a SAVE frame: the saved FP sits seven words below the
    /// current FP and the registers follow it upward.
    pub(super) fn op_restore(
        &mut self,
        bus: &mut Bus,
        operands: &[Operand; MAX_OPERANDS],
        src: usize,
    ) -> Outcome {
        let a = self.registers[FP].wrapping_sub(28);
        let b = self.fetch_word(bus, a);
        let mut c = self.registers[FP].wrapping_sub(24);
        for register in usize::from(operands[src].reg)..FP {
            self.registers[register] = self.fetch_word(bus, c);
            c = c.wrapping_add(4);
        }
        self.registers[FP] = b;
        self.registers[SP] = a;
        Outcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use base::prelude::*;
    use base::registers::{AP, FP, PC, PSW, SP};

    use crate::bus::{Bus, MemoryConfiguration, RAM_BASE};
    use crate::control::Cpu;

    const COMPLAIN: &str = "failed to set up transfer test program";

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
    fn br_is_relative_to_the_opcode() {
        // BRB 0x10
        let (mut cpu, mut bus) = set_up(&[0x7b, 0x10]);
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 0x10);
    }

    #[test]
    fn backward_branch_wraps_the_displacement() {
        // BRB -8 at offset 8.
        let (mut cpu, mut bus) = set_up(&[0, 0, 0, 0, 0, 0, 0, 0, 0x7b, 0xf8]);
        cpu.registers[PC] = RAM_BASE + 8;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE);
    }

    #[test]
    fn brh_takes_a_halfword_displacement() {
        // BRH 0x100
        let (mut cpu, mut bus) = set_up(&[0x7a, 0x00, 0x01]);
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 0x100);
    }

    #[test]
    fn conditional_branch_consults_the_flags() {
        // BEB 0x10, Z clear: falls through to the next instruction.
        let (mut cpu, mut bus) = set_up(&[0x7f, 0x10]);
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 2);

        // BEB 0x10, Z set: taken.
        let (mut cpu, mut bus) = set_up(&[0x7f, 0x10]);
        cpu.registers[PSW] |= psw::Z_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 0x10);
        assert!(cpu.z_flag());
    }

    #[test]
    fn bsb_rsb_round_trip() {
        // BSBB 4; RSB at the target.
        let (mut cpu, mut bus) = set_up(&[0x37, 0x04, 0x00, 0x00, 0x78]);
        cpu.registers[SP] = RAM_BASE + 0x200;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 4);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x204);
        assert_eq!(bus.read_word(RAM_BASE + 0x200).unwrap(), RAM_BASE + 2);
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 2);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x200);
    }

    #[test]
    fn jmp_lands_on_the_effective_address() {
        // JMP $0x02000020
        let (mut cpu, mut bus) = set_up(&[0x24, 0x7f, 0x20, 0x00, 0x00, 0x02]);
        cpu.registers[SP] = RAM_BASE + 0x200;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], 0x0200_0020);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x200);
    }

    #[test]
    fn jsb_stacks_the_return_address() {
        // JSB $0x02000020
        let (mut cpu, mut bus) = set_up(&[0x34, 0x7f, 0x20, 0x00, 0x00, 0x02]);
        cpu.registers[SP] = RAM_BASE + 0x200;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], 0x0200_0020);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x204);
        assert_eq!(bus.read_word(RAM_BASE + 0x200).unwrap(), RAM_BASE + 6);
    }

    #[test]
    fn call_ret_restores_the_caller_frame() {
        // CALL 0(%sp),$0x02000040 with RET at the target.
        let (mut cpu, mut bus) = set_up(&[0x2c, 0xcc, 0x00, 0x7f, 0x40, 0x00, 0x00, 0x02]);
        bus.write_byte(RAM_BASE + 0x40, 0x08).expect(COMPLAIN);
        cpu.registers[SP] = RAM_BASE + 0x300;
        cpu.registers[AP] = 0x1111_1111;

        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 0x40);
        assert_eq!(cpu.registers[AP], RAM_BASE + 0x300);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x308);
        assert_eq!(bus.read_word(RAM_BASE + 0x300).unwrap(), RAM_BASE + 8);
        assert_eq!(bus.read_word(RAM_BASE + 0x304).unwrap(), 0x1111_1111);

        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 8);
        assert_eq!(cpu.registers[AP], 0x1111_1111);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x300);
    }

    #[test]
    fn conditional_return_pops_only_when_taken() {
        // REQL with Z clear does not touch the stack.
        let (mut cpu, mut bus) = set_up(&[0x7c]);
        cpu.registers[SP] = RAM_BASE + 0x104;
        bus.write_word(RAM_BASE + 0x100, RAM_BASE + 0x20)
            .expect(COMPLAIN);
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 1);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x104);

        // REQL with Z set pops the return address.
        let (mut cpu, mut bus) = set_up(&[0x7c]);
        cpu.registers[SP] = RAM_BASE + 0x104;
        bus.write_word(RAM_BASE + 0x100, RAM_BASE + 0x20)
            .expect(COMPLAIN);
        cpu.registers[PSW] |= psw::Z_MASK;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[PC], RAM_BASE + 0x20);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x100);
    }

    #[test]
    fn save_restore_round_trip() {
        // SAVE %r3; RESTORE %r3
        let (mut cpu, mut bus) = set_up(&[0x10, 0x43, 0x18, 0x43]);
        cpu.registers[SP] = RAM_BASE + 0x400;
        cpu.registers[FP] = 0xfeed_0000;
        for register in 3..9 {
            cpu.registers[register] = 0x30 + register as u32;
        }

        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x41c);
        assert_eq!(cpu.registers[FP], RAM_BASE + 0x41c);
        assert_eq!(bus.read_word(RAM_BASE + 0x400).unwrap(), 0xfeed_0000);
        assert_eq!(bus.read_word(RAM_BASE + 0x404).unwrap(), 0x33);
        assert_eq!(bus.read_word(RAM_BASE + 0x418).unwrap(), 0x38);

        for register in 3..9 {
            cpu.registers[register] = 0;
        }
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[FP], 0xfeed_0000);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x400);
        for register in 3..9 {
            assert_eq!(cpu.registers[register], 0x30 + register as u32);
        }
    }

    #[test]
    fn save_reserves_seven_words_regardless() {
        // SAVE %r8 pushes only FP and R8 but claims the whole frame.
        let (mut cpu, mut bus) = set_up(&[0x10, 0x48]);
        cpu.registers[SP] = RAM_BASE + 0x400;
        cpu.registers[FP] = 0xfeed_0000;
        cpu.registers[8] = 0x88;
        assert_eq!(cpu.step(&mut bus), None);
        assert_eq!(cpu.registers[SP], RAM_BASE + 0x41c);
        assert_eq!(cpu.registers[FP], RAM_BASE + 0x41c);
        assert_eq!(bus.read_word(RAM_BASE + 0x400).unwrap(), 0xfeed_0000);
        assert_eq!(bus.read_word(RAM_BASE + 0x404).unwrap(), 0x88);
    }
}
