//! Process control and other privileged opcodes.
//!
//! - CALLPS: [`Cpu::op_callps`]
//! - RETPS: [`Cpu::op_retps`]
//! - RETG: [`Cpu::op_retg`]
//! - ENBVJMP: [`Cpu::op_enbvjmp`]
//! - DISVJMP: [`Cpu::op_disvjmp`]
//! - BPT: [`Cpu::op_bpt`]
//! - WAIT: [`Cpu::op_wait`]
//! - SPOP and friends: [`Cpu::op_coprocessor`]

use tracing::{event, Level};

use base::prelude::*;
use base::registers::{AP, FP, PC, PCBP, PSW};

use crate::bus::Bus;
use crate::control::{Cpu, Outcome};

impl Cpu {
    /// Call process: pushes the current PCB pointer to the interrupt
    /// stack and switches to the process whose PCB address is in R0.
    /// The stored PC points past the opcode so the caller resumes
    /// behind it.
    pub(super) fn op_callps(&mut self, bus: &mut Bus) -> Outcome {
        if !self.check_kernel_level() {
            return Outcome::Completed;
        }
        self.registers[PC] = self.registers[PC].wrapping_add(2);
        let a = self.registers[0];
        self.interrupt_push_word(bus, self.registers[PCBP]);
        self.context_switch_1(bus, a);
        Outcome::Transfer
    }

    /// Return to the process whose PCB pointer tops the interrupt
    /// stack.  The saved PSW's R bit decides whether AP, FP and
    /// R0-R8 come back from the PCB too.
    pub(super) fn op_retps(&mut self, bus: &mut Bus) -> Outcome {
        if !self.check_kernel_level() {
            return Outcome::Completed;
        }
        let a = self.interrupt_pop_word(bus);
        let b = self.fetch_word(bus, a);

        self.registers[PSW] &= !psw::R_MASK;
        self.registers[PSW] |= b & psw::R_MASK;

        if self.registers[PSW] & psw::R_MASK != 0 {
            self.registers[AP] = self.fetch_word(bus, a.wrapping_add(20));
            self.registers[FP] = self.fetch_word(bus, a.wrapping_add(24));
            for index in 0..9 {
                let slot = a.wrapping_add(28 + 4 * index);
                self.registers[index as usize] = self.fetch_word(bus, slot);
            }
        }

        self.context_switch_2(bus, a);
        Outcome::Transfer
    }

    /// Return from gate.  The stacked PSW comes back with the live
    /// PSW's interrupt and cache control bits grafted over it and
    /// ISC/ET forced to the gate-return signature.  A return that
    /// would land at a more privileged level than the current one is
    /// flagged but still taken.
    pub(super) fn op_retg(&mut self, bus: &mut Bus) -> Outcome {
        let mut a = self.pop_word(bus);
        let b = self.pop_word(bus);

        if (a & psw::CM_MASK) < (self.registers[PSW] & psw::CM_MASK) {
            self.raise(NormalException::IllegalLevelChange);
        }

        a &= !(psw::IPL_MASK
            | psw::CFD_MASK
            | psw::QIE_MASK
            | psw::CD_MASK
            | psw::R_MASK
            | psw::ISC_MASK
            | psw::TM_MASK
            | psw::ET_MASK);
        a |= self.registers[PSW] & psw::IPL_MASK;
        a |= self.registers[PSW] & psw::CFD_MASK;
        a |= self.registers[PSW] & psw::QIE_MASK;
        a |= self.registers[PSW] & psw::CD_MASK;
        a |= self.registers[PSW] & psw::R_MASK;
        a |= 7 << psw::ISC_SHIFT;
        a |= 3 << psw::ET_SHIFT;

        self.registers[PSW] = a;
        self.registers[PC] = b;
        Outcome::Transfer
    }

    /// Enables address translation and jumps to the virtual address
    /// in R0.
    pub(super) fn op_enbvjmp(&mut self, bus: &mut Bus) -> Outcome {
        if !self.check_kernel_level() {
            return Outcome::Completed;
        }
        bus.mmu_mut().enable();
        self.registers[PC] = self.registers[0];
        Outcome::Transfer
    }

    /// Disables address translation and jumps to the physical
    /// address in R0.
    pub(super) fn op_disvjmp(&mut self, bus: &mut Bus) -> Outcome {
        if !self.check_kernel_level() {
            return Outcome::Completed;
        }
        bus.mmu_mut().disable();
        self.registers[PC] = self.registers[0];
        Outcome::Transfer
    }

    /// Breakpoint: traps after the program counter moves past the
    /// opcode.
    pub(super) fn op_bpt(&mut self) -> Outcome {
        self.raise(NormalException::BreakpointTrap);
        Outcome::Completed
    }

    /// Idles the engine until an interrupt request arrives.
    pub(super) fn op_wait(&mut self) -> Outcome {
        self.waiting = true;
        Outcome::Completed
    }

    /// Coprocessor support operations fault: no coprocessor is ever
    /// attached.
    pub(super) fn op_coprocessor(&mut self, pc: u32) -> Outcome {
        event!(
            Level::DEBUG,
            pc = format_args!("{pc:08x}"),
            "coprocessor operation with no coprocessor attached"
        );
        self.raise(NormalException::ExternalMemoryFault);
        Outcome::Completed
    }

    fn check_kernel_level(&mut self) -> bool {
        if psw::current_level(self.registers[PSW]) != ExecutionLevel::Kernel {
            self.raise(NormalException::PrivilegedOpcode);
            return false;
        }
        true
    }
}
