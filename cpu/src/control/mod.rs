//! The execution engine.
//!
//! [`Cpu`] owns the sixteen-register file and the per-instruction
//! exception state, and drives the fetch/decode/execute loop against
//! a [`Bus`].  The engine is spread over several files:
//!
//! - operand resolution (effective addresses, reads, writes), the
//!   flag helpers and the exception/gate/context-switch machinery
//!   live here, together with the loop itself;
//! - arithmetic, logic, shifts and bit fields in [`op_alu`];
//! - moves, swaps and the stack push/pop family in [`op_loadstore`];
//! - branches, calls, returns and SAVE/RESTORE in [`op_jump`];
//! - process switching and the privileged leftovers in
//!   [`op_system`].
//!
//! A note on fault handling: memory access never aborts an
//! instruction midway.  A failed read latches an external memory
//! fault and yields zero, a failed write latches and is dropped, and
//! the instruction runs to completion on those values.  The latched
//! exception is dispatched at the end of the cycle.

mod op_alu;
mod op_jump;
mod op_loadstore;
mod op_system;
#[cfg(test)]
mod tests;

use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;
use base::registers::{AP, FP, ISP, NUM_REGISTERS, PC, PCBP, PSW, SP};

use crate::bus::{Bus, BusFault, IrqRequest, RomImageError};
use crate::decode::{decode, DecodedInstruction, Operand};
use crate::history::History;

/// Physical address of the word holding the boot PCB pointer.
const BOOT_PCBP_POINTER: u32 = 0x80;

/// Start of the interrupt vector table: vector `id` is the PCB
/// pointer in the word at `0x8c + 4 * id`.
const INTERRUPT_VECTOR_TABLE: u32 = 0x8c;

/// Why the instruction loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Reserved for front ends that check breakpoints between calls
    /// to [`Cpu::step`]; the loop itself never produces it.
    Breakpoint { pc: u32 },
    /// The opcode decodes but has no arm in the execution engine.
    /// The program counter has already advanced past it.
    UnimplementedOpcode { pc: u32, opcode: u16 },
    /// An exception or trap was latched while halt-on-exception mode
    /// was on.  The stop replaces the gate sequence, so the machine
    /// is left exactly as it was when the condition was raised.
    HaltedOnException { pc: u32, isc: u32 },
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            StopReason::Breakpoint { pc } => write!(f, "breakpoint at {pc:08x}"),
            StopReason::UnimplementedOpcode { pc, opcode } => {
                write!(f, "unimplemented opcode {opcode:#04x} at {pc:08x}")
            }
            StopReason::HaltedOnException { pc, isc } => {
                write!(f, "halted on exception (isc {isc}) at {pc:08x}")
            }
        }
    }
}

/// What an instruction arm did with control flow.
enum Outcome {
    /// Fell through; the loop advances the program counter by the
    /// decoded length.
    Completed,
    /// The arm rewrote the program counter itself.  The cycle ends
    /// at once: no generic advance, no trap check.
    Transfer,
    /// The loop cannot continue.
    Stop(StopReason),
}

/// The execution engine.
///
/// Construct one, [`boot`](Cpu::boot) it from a ROM image, and call
/// [`step`](Cpu::step) or [`run`](Cpu::run) with the bus it should
/// execute against.
#[derive(Debug)]
pub struct Cpu {
    registers: [u32; NUM_REGISTERS],
    /// Exception latched by the current instruction; dispatched
    /// before the program counter advances.
    exception: Option<NormalException>,
    /// Trap latched by the current instruction; dispatched after
    /// the program counter advances.
    trap: Option<NormalException>,
    /// Set by WAIT, cleared by the next interrupt request.
    waiting: bool,
    /// When set, a latched exception or trap stops the loop instead
    /// of gating through the vector table.
    halt_on_exception: bool,
    history: History,
}

impl Cpu {
    #[must_use]
    pub fn new() -> Cpu {
        Cpu {
            registers: [0; NUM_REGISTERS],
            exception: None,
            trap: None,
            waiting: false,
            halt_on_exception: false,
            history: History::default(),
        }
    }

    /// Like [`Cpu::new`] with an execution history ring of the given
    /// capacity.
    #[must_use]
    pub fn with_history_capacity(capacity: usize) -> Cpu {
        Cpu {
            history: History::new(capacity),
            ..Cpu::new()
        }
    }

    /// When on, a latched exception or trap stops the loop instead
    /// of gating to its handler.  Off by default.
    pub fn set_halt_on_exception(&mut self, halt: bool) {
        self.halt_on_exception = halt;
    }

    /// The register file.  Index it with the constants in
    /// [`base::registers`].
    #[must_use]
    pub fn registers(&self) -> &[u32; NUM_REGISTERS] {
        &self.registers
    }

    /// The ring of recently executed instructions.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Loads a ROM image and performs the power-on sequence: the
    /// boot PCB pointer is read from physical `0x80`, and PSW, PC
    /// and SP from the PCB it names.  A PSW with the I bit set marks
    /// an initial-context PCB whose fourth word holds the real PCBP.
    /// Translation is left off and ISC is forced to 3; the rest of
    /// the PSW is whatever the ROM put in the PCB.
    pub fn boot(&mut self, bus: &mut Bus, image: &[u8]) -> Result<(), RomImageError> {
        bus.mmu_mut().disable();
        bus.load_rom(image)?;

        self.registers[PCBP] = bus.read_word(BOOT_PCBP_POINTER).unwrap_or(0);
        self.registers[PSW] = bus.read_word(self.registers[PCBP]).unwrap_or(0);
        self.registers[PC] = bus
            .read_word(self.registers[PCBP].wrapping_add(4))
            .unwrap_or(0);
        self.registers[SP] = bus
            .read_word(self.registers[PCBP].wrapping_add(8))
            .unwrap_or(0);

        if self.registers[PSW] & psw::I_MASK != 0 {
            self.registers[PSW] &= !psw::I_MASK;
            self.registers[PCBP] = bus
                .read_word(self.registers[PCBP].wrapping_add(12))
                .unwrap_or(0);
        }

        self.registers[PSW] &= !psw::ISC_MASK;
        self.registers[PSW] |= 3 << psw::ISC_SHIFT;

        event!(
            Level::INFO,
            pc = format_args!("{:08x}", self.registers[PC]),
            pcbp = format_args!("{:08x}", self.registers[PCBP]),
            "boot"
        );
        Ok(())
    }

    /// Clears the interrupt latch, the wait state and the execution
    /// history.  Registers keep their values; [`Cpu::boot`]
    /// establishes them.
    pub fn reset(&mut self, bus: &mut Bus) {
        bus.irq_mut().clear();
        self.exception = None;
        self.trap = None;
        self.waiting = false;
        self.history.clear();
    }

    /// Executes up to `limit` instructions, returning early with the
    /// reason if the loop stops.
    pub fn run(&mut self, bus: &mut Bus, limit: u64) -> Option<StopReason> {
        for _ in 0..limit {
            if let Some(reason) = self.step(bus) {
                return Some(reason);
            }
        }
        None
    }

    /// One iteration of the instruction loop: interrupt delivery,
    /// device service, then a single decode/execute cycle.
    pub fn step(&mut self, bus: &mut Bus) -> Option<StopReason> {
        // A pending interrupt request is consumed whether or not it
        // is delivered, and always ends a WAIT.
        if let Some(request) = bus.irq_mut().take() {
            let handled = self.handle_interrupt(bus, &request);
            self.waiting = false;
            if handled {
                return None;
            }
        }

        bus.service_devices();

        if self.waiting {
            return None;
        }

        self.exception = None;
        self.trap = None;
        self.registers[PSW] |= psw::TM_MASK;

        let mut instruction = self.next_instruction(bus);

        // A decode fault dispatches with the program counter still
        // at the faulting instruction; it never executes.
        if self.exception.is_some() {
            let stop = self.dispatch_latched(bus, instruction.pc);
            self.history.record(instruction);
            return stop;
        }

        let outcome = self.dispatch(bus, &mut instruction);
        let stop = match outcome {
            Outcome::Transfer => None,
            Outcome::Stop(reason) => {
                self.registers[PC] = self.registers[PC].wrapping_add(u32::from(instruction.len));
                Some(reason)
            }
            Outcome::Completed => {
                if self.exception.is_some() {
                    self.dispatch_latched(bus, instruction.pc)
                } else {
                    self.registers[PC] =
                        self.registers[PC].wrapping_add(u32::from(instruction.len));
                    if self.trap.is_some() {
                        self.dispatch_latched(bus, instruction.pc)
                    } else {
                        None
                    }
                }
            }
        };

        self.history.record(instruction);
        stop
    }

    /// Decodes the instruction at PC, latching any fetch fault or
    /// decode fault as an exception.
    fn next_instruction(&mut self, bus: &mut Bus) -> DecodedInstruction {
        let pc = self.registers[PC];
        let psw = self.registers[PSW];

        let mut fetch_fault = None;
        let instruction = decode(pc, psw, |address| match bus.fetch_byte(address) {
            Ok(byte) => byte,
            Err(fault) => {
                fetch_fault = Some(fault);
                0
            }
        });

        if let Some(fault) = fetch_fault {
            self.memory_fault(fault);
        }
        if let Some(fault) = instruction.fault {
            self.raise(fault);
        }
        instruction
    }

    fn dispatch(&mut self, bus: &mut Bus, instruction: &mut DecodedInstruction) -> Outcome {
        let Some(mnemonic) = instruction.mnemonic else {
            return Outcome::Completed;
        };
        let next_pc = instruction.pc.wrapping_add(u32::from(instruction.len));

        // Bind the operand slots to their roles.  Roles the mnemonic
        // lacks bind to slot zero; its arm never touches them.
        let roles = mnemonic.roles();
        let src1 = roles.src1.map_or(0, usize::from);
        let src2 = roles.src2.map_or(0, usize::from);
        let src3 = roles.src3.map_or(0, usize::from);
        let dst = roles.dst.map_or(0, usize::from);

        match mnemonic.op {
            Opcode::Movw | Opcode::Movh | Opcode::Movb => {
                self.op_mov(bus, &mut instruction.operands, src1, dst)
            }
            Opcode::Movaw => self.op_movaw(bus, &mut instruction.operands, src1, dst),
            Opcode::Movtrw => self.op_movtrw(bus, &mut instruction.operands, src1, dst),
            Opcode::Swapwi | Opcode::Swaphi | Opcode::Swapbi => {
                self.op_swap_interlocked(bus, &mut instruction.operands, dst)
            }
            Opcode::Clrw | Opcode::Clrh | Opcode::Clrb => {
                self.op_clr(bus, &mut instruction.operands, dst)
            }
            Opcode::Pushw => self.op_pushw(bus, &mut instruction.operands, src1),
            Opcode::Pushaw => self.op_pushaw(bus, &mut instruction.operands, src1),
            Opcode::Popw => self.op_popw(bus, &mut instruction.operands, dst),
            Opcode::Movblw => self.op_movblw(bus),
            Opcode::Strcpy => self.op_strcpy(bus),

            Opcode::Addw2 | Opcode::Addh2 | Opcode::Addb2 => {
                self.op_add(bus, &mut instruction.operands, src1, dst, dst)
            }
            Opcode::Addw3 | Opcode::Addh3 | Opcode::Addb3 => {
                self.op_add(bus, &mut instruction.operands, src1, src2, dst)
            }
            Opcode::Subw2 | Opcode::Subh2 | Opcode::Subb2 => {
                self.op_sub(bus, &mut instruction.operands, dst, src1, dst)
            }
            Opcode::Subw3 | Opcode::Subh3 | Opcode::Subb3 => {
                self.op_sub(bus, &mut instruction.operands, src2, src1, dst)
            }
            Opcode::Incw | Opcode::Inch | Opcode::Incb => {
                self.op_inc(bus, &mut instruction.operands, dst)
            }
            Opcode::Decw | Opcode::Dech | Opcode::Decb => {
                self.op_dec(bus, &mut instruction.operands, dst)
            }
            Opcode::Mulw2 | Opcode::Mulh2 | Opcode::Mulb2 => {
                self.op_mul(bus, &mut instruction.operands, src1, dst, dst)
            }
            Opcode::Mulw3 | Opcode::Mulh3 | Opcode::Mulb3 => {
                self.op_mul(bus, &mut instruction.operands, src1, src2, dst)
            }
            Opcode::Divw2 | Opcode::Divh2 | Opcode::Divb2 => {
                self.op_div(bus, &mut instruction.operands, src1, dst, dst, true)
            }
            Opcode::Divw3 | Opcode::Divh3 | Opcode::Divb3 => {
                self.op_div(bus, &mut instruction.operands, src1, src2, dst, false)
            }
            Opcode::Modw2 | Opcode::Modh2 | Opcode::Modb2 => {
                self.op_mod(bus, &mut instruction.operands, src1, dst, dst)
            }
            Opcode::Modw3 | Opcode::Modh3 | Opcode::Modb3 => {
                self.op_mod(bus, &mut instruction.operands, src1, src2, dst)
            }
            Opcode::Andw2 | Opcode::Andh2 | Opcode::Andb2 => {
                self.op_and(bus, &mut instruction.operands, src1, dst, dst)
            }
            Opcode::Andw3 | Opcode::Andh3 | Opcode::Andb3 => {
                self.op_and(bus, &mut instruction.operands, src1, src2, dst)
            }
            Opcode::Orw2 | Opcode::Orh2 | Opcode::Orb2 => {
                self.op_or(bus, &mut instruction.operands, src1, dst, dst, true)
            }
            Opcode::Orw3 | Opcode::Orh3 | Opcode::Orb3 => {
                self.op_or(bus, &mut instruction.operands, src1, src2, dst, false)
            }
            Opcode::Xorw2 | Opcode::Xorh2 | Opcode::Xorb2 => {
                self.op_xor(bus, &mut instruction.operands, src1, dst, dst)
            }
            Opcode::Xorw3 | Opcode::Xorh3 | Opcode::Xorb3 => {
                self.op_xor(bus, &mut instruction.operands, src1, src2, dst)
            }
            Opcode::Mcomw | Opcode::Mcomh | Opcode::Mcomb => {
                self.op_mcom(bus, &mut instruction.operands, src1, dst)
            }
            Opcode::Mnegw | Opcode::Mnegh | Opcode::Mnegb => {
                self.op_mneg(bus, &mut instruction.operands, src1, dst)
            }
            Opcode::Bitw | Opcode::Bith | Opcode::Bitb => {
                self.op_bit(bus, &mut instruction.operands, src1, src2)
            }
            Opcode::Cmpw => self.op_cmp(bus, &mut instruction.operands, src1, src2, Datatype::Word),
            Opcode::Cmph => self.op_cmp(bus, &mut instruction.operands, src1, src2, Datatype::Half),
            Opcode::Cmpb => self.op_cmp(bus, &mut instruction.operands, src1, src2, Datatype::Byte),
            Opcode::Tstw => self.op_tst(bus, &mut instruction.operands, src1, Datatype::Word),
            Opcode::Tsth => self.op_tst(bus, &mut instruction.operands, src1, Datatype::Half),
            Opcode::Tstb => self.op_tst(bus, &mut instruction.operands, src1, Datatype::Byte),
            Opcode::Alsw3 => self.op_als(bus, &mut instruction.operands, src1, src2, dst),
            Opcode::Llsw3 | Opcode::Llsh3 | Opcode::Llsb3 => {
                self.op_lls(bus, &mut instruction.operands, src1, src2, dst)
            }
            Opcode::Arsw3 | Opcode::Arsh3 | Opcode::Arsb3 => {
                self.op_ars(bus, &mut instruction.operands, src1, src2, dst)
            }
            Opcode::Lrsw3 => self.op_lrs(bus, &mut instruction.operands, src1, src2, dst),
            Opcode::Rotw => self.op_rot(bus, &mut instruction.operands, src1, src2, dst),
            Opcode::Extfw | Opcode::Extfh | Opcode::Extfb => {
                self.op_extf(bus, &mut instruction.operands, src1, src2, src3, dst)
            }
            Opcode::Insfw | Opcode::Insfh | Opcode::Insfb => {
                self.op_insf(bus, &mut instruction.operands, src1, src2, src3, dst)
            }

            Opcode::Brh => {
                self.op_branch(sign_extend_half(instruction.operands[0].embedded), true)
            }
            Opcode::Brb => {
                self.op_branch(sign_extend_byte(instruction.operands[0].embedded), true)
            }
            Opcode::Beh => {
                self.op_branch(sign_extend_half(instruction.operands[0].embedded), self.z_flag())
            }
            Opcode::Beb => {
                self.op_branch(sign_extend_byte(instruction.operands[0].embedded), self.z_flag())
            }
            Opcode::Bneh => self.op_branch(
                sign_extend_half(instruction.operands[0].embedded),
                !self.z_flag(),
            ),
            Opcode::Bneb => self.op_branch(
                sign_extend_byte(instruction.operands[0].embedded),
                !self.z_flag(),
            ),
            Opcode::Bgh => self.op_branch(
                sign_extend_half(instruction.operands[0].embedded),
                !(self.n_flag() || self.z_flag()),
            ),
            Opcode::Bgb => self.op_branch(
                sign_extend_byte(instruction.operands[0].embedded),
                !(self.n_flag() || self.z_flag()),
            ),
            Opcode::Bgeh => self.op_branch(
                sign_extend_half(instruction.operands[0].embedded),
                !self.n_flag() || self.z_flag(),
            ),
            Opcode::Bgeb => self.op_branch(
                sign_extend_byte(instruction.operands[0].embedded),
                !self.n_flag() || self.z_flag(),
            ),
            Opcode::Bgeuh => self.op_branch(
                sign_extend_half(instruction.operands[0].embedded),
                !self.c_flag(),
            ),
            Opcode::Bgeub => self.op_branch(
                sign_extend_byte(instruction.operands[0].embedded),
                !self.c_flag(),
            ),
            Opcode::Bguh => self.op_branch(
                sign_extend_half(instruction.operands[0].embedded),
                !(self.c_flag() || self.z_flag()),
            ),
            Opcode::Bgub => self.op_branch(
                sign_extend_byte(instruction.operands[0].embedded),
                !(self.c_flag() || self.z_flag()),
            ),
            Opcode::Blh => self.op_branch(
                sign_extend_half(instruction.operands[0].embedded),
                self.n_flag() && !self.z_flag(),
            ),
            Opcode::Blb => self.op_branch(
                sign_extend_byte(instruction.operands[0].embedded),
                self.n_flag() && !self.z_flag(),
            ),
            Opcode::Bleh => self.op_branch(
                sign_extend_half(instruction.operands[0].embedded),
                self.n_flag() || self.z_flag(),
            ),
            Opcode::Bleb => self.op_branch(
                sign_extend_byte(instruction.operands[0].embedded),
                self.n_flag() || self.z_flag(),
            ),
            Opcode::Bleuh => self.op_branch(
                sign_extend_half(instruction.operands[0].embedded),
                self.c_flag() || self.z_flag(),
            ),
            Opcode::Bleub => self.op_branch(
                sign_extend_byte(instruction.operands[0].embedded),
                self.c_flag() || self.z_flag(),
            ),
            Opcode::Bluh => {
                self.op_branch(sign_extend_half(instruction.operands[0].embedded), self.c_flag())
            }
            Opcode::Blub => {
                self.op_branch(sign_extend_byte(instruction.operands[0].embedded), self.c_flag())
            }
            Opcode::Bvch => self.op_branch(
                sign_extend_half(instruction.operands[0].embedded),
                !self.v_flag(),
            ),
            Opcode::Bvcb => self.op_branch(
                sign_extend_byte(instruction.operands[0].embedded),
                !self.v_flag(),
            ),
            Opcode::Bvsh => {
                self.op_branch(sign_extend_half(instruction.operands[0].embedded), self.v_flag())
            }
            Opcode::Bvsb => {
                self.op_branch(sign_extend_byte(instruction.operands[0].embedded), self.v_flag())
            }
            Opcode::Bsbh => self.op_bsb(
                bus,
                sign_extend_half(instruction.operands[0].embedded),
                next_pc,
            ),
            Opcode::Bsbb => self.op_bsb(
                bus,
                sign_extend_byte(instruction.operands[0].embedded),
                next_pc,
            ),
            Opcode::Jmp => self.op_jmp(bus, &mut instruction.operands, dst),
            Opcode::Jsb => self.op_jsb(bus, &mut instruction.operands, dst, next_pc),
            Opcode::Call => self.op_call(bus, &mut instruction.operands, src1, dst, next_pc),
            Opcode::Ret => self.op_ret(bus),
            Opcode::Rsb => self.op_return_when(bus, true),
            Opcode::Rgeq => self.op_return_when(bus, !self.n_flag() || self.z_flag()),
            Opcode::Rgtr => self.op_return_when(bus, !(self.n_flag() || self.z_flag())),
            Opcode::Rleq => self.op_return_when(bus, self.n_flag() || self.z_flag()),
            Opcode::Rgequ => self.op_return_when(bus, !self.c_flag()),
            Opcode::Rlequ => self.op_return_when(bus, self.c_flag() || self.z_flag()),
            Opcode::Rneq | Opcode::Rnequ => self.op_return_when(bus, !self.z_flag()),
            Opcode::Reql | Opcode::Reqlu => self.op_return_when(bus, self.z_flag()),
            Opcode::Save => self.op_save(bus, &instruction.operands, src1),
            Opcode::Restore => self.op_restore(bus, &instruction.operands, src1),

            Opcode::Callps => self.op_callps(bus),
            Opcode::Retps => self.op_retps(bus),
            Opcode::Retg => self.op_retg(bus),
            Opcode::Enbvjmp => self.op_enbvjmp(bus),
            Opcode::Disvjmp => self.op_disvjmp(bus),
            Opcode::Bpt => self.op_bpt(),
            Opcode::Wait => self.op_wait(),
            Opcode::Spop | Opcode::Spoprd | Opcode::Spoprs => self.op_coprocessor(instruction.pc),
            Opcode::Nop | Opcode::Cflush => Outcome::Completed,
            Opcode::Nop2 => {
                instruction.len = instruction.len.wrapping_add(1);
                Outcome::Completed
            }
            Opcode::Nop3 => {
                instruction.len = instruction.len.wrapping_add(2);
                Outcome::Completed
            }

            _ => {
                event!(
                    Level::INFO,
                    pc = format_args!("{:08x}", instruction.pc),
                    opcode = mnemonic.name,
                    "unimplemented opcode"
                );
                Outcome::Stop(StopReason::UnimplementedOpcode {
                    pc: instruction.pc,
                    opcode: mnemonic.op.number(),
                })
            }
        }
    }

    /// Dispatches a latched exception or trap: stop the loop in
    /// halt-on-exception mode, otherwise gate through vector zero
    /// with the ISC field selecting the handler slot.
    fn dispatch_latched(&mut self, bus: &mut Bus, pc: u32) -> Option<StopReason> {
        let isc = psw::isc(self.registers[PSW]);
        if self.halt_on_exception {
            event!(
                Level::INFO,
                pc = format_args!("{pc:08x}"),
                isc,
                "halting on exception"
            );
            return Some(StopReason::HaltedOnException { pc, isc });
        }
        self.gate(bus, 0, isc << 3);
        None
    }

    /// Delivers an interrupt request.  Returns whether a context
    /// switch happened: a request whose priority is at or below the
    /// PSW's IPL field (and is not an NMI) is ignored, and a request
    /// arriving with quick-interrupt mode enabled is consumed
    /// without effect.
    fn handle_interrupt(&mut self, bus: &mut Bus, request: &IrqRequest) -> bool {
        let psw_ipl = psw::ipl(self.registers[PSW]);
        let quick = self.registers[PSW] & psw::QIE_MASK != 0;

        if u32::from(request.ipl) <= psw_ipl && !request.nmi {
            event!(Level::DEBUG, ipl = request.ipl, "ignoring masked interrupt");
            return false;
        }

        let id = if request.nmi { 0 } else { request.id };

        if quick {
            // Quick-interrupt delivery (PC/PSW on the interrupt
            // stack, no PCB switch) is not implemented; the request
            // is consumed and dropped.
            event!(Level::WARN, id, "quick interrupt ignored");
            return false;
        }

        let vector = INTERRUPT_VECTOR_TABLE.wrapping_add(4 * u32::from(id));
        let new_pcbp = self.fetch_word(bus, vector);

        event!(
            Level::DEBUG,
            id,
            pcbp = format_args!("{new_pcbp:08x}"),
            "delivering interrupt"
        );

        self.interrupt_push_word(bus, self.registers[PCBP]);
        self.context_switch_1(bus, new_pcbp);
        true
    }

    /// The gate microsequence: a forced transfer to kernel level
    /// through a two-level table of PSW/PC pairs.  `table` is the
    /// address of the first-level pointer and `offset` the byte
    /// offset into the second-level table it names.
    fn gate(&mut self, bus: &mut Bus, table: u32, offset: u32) {
        let old_level = psw::current_level(self.registers[PSW]);
        self.registers[PSW] =
            psw::with_level_transfer(self.registers[PSW], ExecutionLevel::Kernel);

        // Stamp ISC=1, TM=0, ET=2 into the outgoing PSW.  ISC and ET
        // are ORed over whatever is already latched in those fields.
        self.registers[PSW] |= 1 << psw::ISC_SHIFT;
        self.registers[PSW] &= !psw::TM_MASK;
        self.registers[PSW] |= 2 << psw::ET_SHIFT;

        let old_psw = self.registers[PSW];
        self.push_word(bus, self.registers[PC]);
        self.push_word(bus, old_psw);

        let pair = self.fetch_word(bus, table).wrapping_add(offset);
        let mut new_psw = self.fetch_word(bus, pair);
        new_psw |= (old_psw & psw::CM_MASK) << 2;
        new_psw |= 3;
        new_psw |= 7 << psw::ISC_SHIFT;
        new_psw |= psw::TM_MASK;

        self.registers[PC] = self.fetch_word(bus, pair.wrapping_add(4));
        self.registers[PSW] = new_psw;

        event!(
            Level::DEBUG,
            pc = format_args!("{:08x}", self.registers[PC]),
            psw = format_args!("{:08x}", self.registers[PSW]),
            "gate"
        );

        self.registers[PSW] = psw::with_level_transfer(self.registers[PSW], old_level);
    }

    /// Phase one of a process switch: adopt the new PCB's R bit,
    /// save PSW/PC/SP into the current PCB (plus AP, FP and R0-R8
    /// when R is set), then load the new context.
    fn context_switch_1(&mut self, bus: &mut Bus, new_pcbp: u32) {
        let current_pcbp = self.registers[PCBP];
        let new_psw = self.fetch_word(bus, new_pcbp);

        self.registers[PSW] &= !psw::R_MASK;
        self.registers[PSW] |= new_psw & psw::R_MASK;

        self.store_word(bus, current_pcbp, self.registers[PSW]);
        self.store_word(bus, current_pcbp.wrapping_add(4), self.registers[PC]);
        self.store_word(bus, current_pcbp.wrapping_add(8), self.registers[SP]);

        if self.registers[PSW] & psw::R_MASK != 0 {
            self.store_word(bus, current_pcbp.wrapping_add(20), self.registers[AP]);
            self.store_word(bus, current_pcbp.wrapping_add(24), self.registers[FP]);
            for index in 0..9 {
                let slot = current_pcbp.wrapping_add(28 + 4 * index);
                self.store_word(bus, slot, self.registers[index as usize]);
            }
        }

        self.context_switch_2(bus, new_pcbp);
    }

    /// Phase two: load PSW/PC/SP from the new PCB and stamp the
    /// switch into the PSW control fields.
    fn context_switch_2(&mut self, bus: &mut Bus, new_pcbp: u32) {
        let new_psw = self.fetch_word(bus, new_pcbp);
        let new_pc = self.fetch_word(bus, new_pcbp.wrapping_add(4));
        let new_sp = self.fetch_word(bus, new_pcbp.wrapping_add(8));

        self.registers[PCBP] = new_pcbp;
        self.registers[PSW] = new_psw;
        self.registers[PC] = new_pc;
        self.registers[SP] = new_sp;

        if self.registers[PSW] & psw::I_MASK != 0 {
            self.registers[PSW] &= !psw::I_MASK;
            self.registers[PCBP] = self.registers[PCBP].wrapping_add(12);
        }

        self.registers[PSW] = psw::with_et_isc(self.registers[PSW], 3, 7);
        self.registers[PSW] &= !psw::TM_MASK;

        // The R bit is force-cleared here, which makes the restore
        // path below unreachable.  The sequence is kept in the order
        // the hardware microcode performs it.
        self.registers[PSW] &= !psw::R_MASK;

        if self.registers[PSW] & psw::R_MASK != 0 {
            self.registers[0] = self.registers[PCBP].wrapping_add(64);
            self.registers[2] = self.fetch_word(bus, self.registers[0]);
            self.registers[0] = self.registers[0].wrapping_add(4);

            while self.registers[2] != 0 {
                self.registers[1] = self.fetch_word(bus, self.registers[0]);
                self.registers[0] = self.registers[0].wrapping_add(4);

                while self.registers[2] > 0 {
                    let word = self.fetch_word(bus, self.registers[0]);
                    self.store_word(bus, self.registers[1], word);
                    self.registers[2] = self.registers[2].wrapping_sub(1);
                    self.registers[0] = self.registers[0].wrapping_add(4);
                    self.registers[1] = self.registers[1].wrapping_add(4);
                }

                self.registers[2] = self.fetch_word(bus, self.registers[0]);
                self.registers[0] = self.registers[0].wrapping_add(4);
            }

            self.registers[0] = self.registers[0].wrapping_add(4);
        }
    }

    /// Latches an exception or trap and stamps the PSW's ET and ISC
    /// fields.  Integer overflow is suppressed entirely while the OE
    /// bit is clear.
    fn raise(&mut self, exception: NormalException) {
        if exception == NormalException::IntegerOverflow
            && self.registers[PSW] & psw::OE_MASK == 0
        {
            return;
        }

        event!(
            Level::DEBUG,
            pc = format_args!("{:08x}", self.registers[PC]),
            ?exception,
            "raising exception"
        );

        self.registers[PSW] = psw::with_et_isc(
            self.registers[PSW],
            ExceptionClass::Normal.code(),
            exception.code(),
        );

        if exception.is_trap() {
            self.trap = Some(exception);
        } else {
            self.exception = Some(exception);
        }
    }

    /// Converts a bus fault into the external-memory-fault
    /// exception.
    fn memory_fault(&mut self, fault: BusFault) {
        event!(
            Level::DEBUG,
            pc = format_args!("{:08x}", self.registers[PC]),
            %fault,
            "memory fault"
        );
        self.raise(NormalException::ExternalMemoryFault);
    }

    fn flag(&self, mask: u32) -> bool {
        self.registers[PSW] & mask != 0
    }

    fn n_flag(&self) -> bool {
        self.flag(psw::N_MASK)
    }

    fn z_flag(&self) -> bool {
        self.flag(psw::Z_MASK)
    }

    fn c_flag(&self) -> bool {
        self.flag(psw::C_MASK)
    }

    fn v_flag(&self) -> bool {
        self.flag(psw::V_MASK)
    }

    fn set_flag(&mut self, mask: u32, value: bool) {
        self.registers[PSW] = psw::with_bit(self.registers[PSW], mask, value);
    }

    /// Rewrites N and Z from a result at the operand's width.
    fn set_nz_flags(&mut self, value: u64, operand: &Operand) {
        let datatype = operand.op_type();
        self.set_flag(psw::N_MASK, value & u64::from(datatype.sign_bit()) != 0);
        self.set_flag(psw::Z_MASK, value & u64::from(datatype.mask()) == 0);
    }

    /// Setting V raises the overflow trap when the OE bit is on.
    fn set_v_flag(&mut self, value: bool) {
        if value {
            self.registers[PSW] |= psw::V_MASK;
            if self.registers[PSW] & psw::OE_MASK != 0 {
                self.raise(NormalException::IntegerOverflow);
            }
        } else {
            self.registers[PSW] &= !psw::V_MASK;
        }
    }

    /// V from a result exceeding the operand's width.  Word-width
    /// operands always clear it.
    fn set_v_flag_from(&mut self, value: u64, operand: &Operand) {
        match operand.op_type() {
            Datatype::Word | Datatype::UWord => self.set_v_flag(false),
            Datatype::Half | Datatype::UHalf => self.set_v_flag(value > u64::from(u16::MAX)),
            Datatype::Byte | Datatype::SByte => self.set_v_flag(value > u64::from(u8::MAX)),
        }
    }

    /// Reads through address translation, latching any fault and
    /// yielding zero.  Every load path in the engine degrades this
    /// way.
    fn fetch_word(&mut self, bus: &mut Bus, va: u32) -> u32 {
        match bus.fetch_word(va) {
            Ok(value) => value,
            Err(fault) => {
                self.memory_fault(fault);
                0
            }
        }
    }

    /// Word read tolerating a misaligned address; operand word loads
    /// come through here.
    fn fetch_word_unaligned(&mut self, bus: &mut Bus, va: u32) -> u32 {
        match bus.fetch_word_unaligned(va) {
            Ok(value) => value,
            Err(fault) => {
                self.memory_fault(fault);
                0
            }
        }
    }

    fn fetch_half(&mut self, bus: &mut Bus, va: u32) -> u32 {
        match bus.fetch_half(va) {
            Ok(value) => u32::from(value),
            Err(fault) => {
                self.memory_fault(fault);
                0
            }
        }
    }

    fn fetch_byte(&mut self, bus: &mut Bus, va: u32) -> u32 {
        match bus.fetch_byte(va) {
            Ok(value) => u32::from(value),
            Err(fault) => {
                self.memory_fault(fault);
                0
            }
        }
    }

    /// Stores latch faults the same way; a faulting store is
    /// dropped.
    fn store_word(&mut self, bus: &mut Bus, va: u32, value: u32) {
        if let Err(fault) = bus.store_word(va, value) {
            self.memory_fault(fault);
        }
    }

    fn store_half(&mut self, bus: &mut Bus, va: u32, value: u16) {
        if let Err(fault) = bus.store_half(va, value) {
            self.memory_fault(fault);
        }
    }

    fn store_byte(&mut self, bus: &mut Bus, va: u32, value: u8) {
        if let Err(fault) = bus.store_byte(va, value) {
            self.memory_fault(fault);
        }
    }

    /// The execution stack grows upward: push stores at SP, then
    /// bumps it.
    fn push_word(&mut self, bus: &mut Bus, value: u32) {
        self.store_word(bus, self.registers[SP], value);
        self.registers[SP] = self.registers[SP].wrapping_add(4);
    }

    fn pop_word(&mut self, bus: &mut Bus) -> u32 {
        self.registers[SP] = self.registers[SP].wrapping_sub(4);
        self.fetch_word(bus, self.registers[SP])
    }

    /// Interrupt-stack variants, used by interrupt delivery and
    /// CALLPS/RETPS.
    fn interrupt_push_word(&mut self, bus: &mut Bus, value: u32) {
        self.store_word(bus, self.registers[ISP], value);
        self.registers[ISP] = self.registers[ISP].wrapping_add(4);
    }

    fn interrupt_pop_word(&mut self, bus: &mut Bus) -> u32 {
        self.registers[ISP] = self.registers[ISP].wrapping_sub(4);
        self.fetch_word(bus, self.registers[ISP])
    }

    /// The memory address an operand names.  Indirect modes read
    /// their pointer word here, so a fault can latch during address
    /// computation.  The address is recorded in the operand's `data`
    /// field for the history trace.
    fn effective_address(&mut self, bus: &mut Bus, operand: &mut Operand) -> u32 {
        let reg = usize::from(operand.reg);
        let address = match (operand.mode, operand.reg) {
            (5, r) if r != 11 => self.registers[reg],
            (7, 15) => operand.embedded,
            (14, 15) => self.fetch_word(bus, operand.embedded),
            (6, r) if r != 15 => {
                self.registers[FP].wrapping_add(sign_extend_byte(operand.embedded))
            }
            (7, r) if r != 15 => {
                self.registers[AP].wrapping_add(sign_extend_byte(operand.embedded))
            }
            (8, _) => self.registers[reg].wrapping_add(operand.embedded),
            (9, _) => {
                let pointer = self.registers[reg].wrapping_add(operand.embedded);
                self.fetch_word(bus, pointer)
            }
            (10, _) => self.registers[reg].wrapping_add(sign_extend_half(operand.embedded)),
            (11, _) => {
                let pointer =
                    self.registers[reg].wrapping_add(sign_extend_half(operand.embedded));
                self.fetch_word(bus, pointer)
            }
            (12, _) => self.registers[reg].wrapping_add(sign_extend_byte(operand.embedded)),
            (13, _) => {
                let pointer =
                    self.registers[reg].wrapping_add(sign_extend_byte(operand.embedded));
                self.fetch_word(bus, pointer)
            }
            _ => {
                // Literal, immediate and register operands name no
                // memory location.
                self.raise(NormalException::InvalidDescriptor);
                0
            }
        };
        operand.data = address;
        address
    }

    /// Reads an operand's value, extended to 32 bits per its
    /// datatype, and records it in the operand's `data` field.
    fn read_op(&mut self, bus: &mut Bus, operand: &mut Operand) -> u32 {
        let value = if operand.is_register() {
            operand
                .op_type()
                .extend(self.registers[usize::from(operand.reg)])
        } else if operand.is_literal() {
            sign_extend_byte(operand.embedded)
        } else if operand.is_immediate() {
            match operand.mode {
                4 => operand.embedded,
                5 => sign_extend_half(operand.embedded),
                _ => sign_extend_byte(operand.embedded),
            }
        } else {
            let address = self.effective_address(bus, operand);
            match operand.op_type() {
                Datatype::Word | Datatype::UWord => self.fetch_word_unaligned(bus, address),
                Datatype::Half => sign_extend_half(self.fetch_half(bus, address)),
                Datatype::UHalf => self.fetch_half(bus, address),
                Datatype::SByte => sign_extend_byte(self.fetch_byte(bus, address)),
                Datatype::Byte => self.fetch_byte(bus, address),
            }
        };
        operand.data = value;
        value
    }

    /// Writes a value to an operand.  Privileged registers reject
    /// non-kernel writes; a literal or immediate destination is
    /// surfaced as an external memory fault.  Halfword and byte
    /// stores whose value has significant bits beyond the operand
    /// width set the V flag.
    fn write_op(&mut self, bus: &mut Bus, operand: &mut Operand, value: u64) {
        operand.data = value as u32;

        if operand.is_register() {
            let reg = usize::from(operand.reg);
            if registers::is_privileged(reg)
                && psw::current_level(self.registers[PSW]) != ExecutionLevel::Kernel
            {
                self.raise(NormalException::PrivilegedRegister);
                return;
            }
            self.registers[reg] = value as u32;
            return;
        }

        if operand.is_literal() || operand.is_immediate() {
            event!(
                Level::DEBUG,
                mode = operand.mode,
                "write to a literal or immediate operand"
            );
            self.raise(NormalException::ExternalMemoryFault);
            return;
        }

        let address = self.effective_address(bus, operand);
        // The address computation clobbered `data`; the trace wants
        // the stored value.
        operand.data = value as u32;
        match operand.op_type() {
            Datatype::Word | Datatype::UWord => self.store_word(bus, address, value as u32),
            Datatype::Half | Datatype::UHalf => {
                if value > u64::from(u16::MAX) {
                    self.set_v_flag(true);
                }
                self.store_half(bus, address, value as u16);
            }
            Datatype::Byte | Datatype::SByte => {
                if value > u64::from(u8::MAX) {
                    self.set_v_flag(true);
                }
                self.store_byte(bus, address, value as u8);
            }
        }
    }
}

impl Default for Cpu {
    fn default() -> Cpu {
        Cpu::new()
    }
}

fn sign_extend_byte(value: u32) -> u32 {
    value as u8 as i8 as i32 as u32
}

fn sign_extend_half(value: u32) -> u32 {
    value as u16 as i16 as i32 as u32
}

#[test]
fn sign_extension_helpers() {
    assert_eq!(sign_extend_byte(0x7f), 0x7f);
    assert_eq!(sign_extend_byte(0x80), 0xffff_ff80);
    assert_eq!(sign_extend_byte(0x1234_56ff), 0xffff_ffff);
    assert_eq!(sign_extend_half(0x1234), 0x1234);
    assert_eq!(sign_extend_half(0x8000), 0xffff_8000);
}

#[test]
fn stop_reason_rendering() {
    assert_eq!(
        StopReason::UnimplementedOpcode {
            pc: 0x2000,
            opcode: 0x3009,
        }
        .to_string(),
        "unimplemented opcode 0x3009 at 00002000"
    );
    assert_eq!(
        StopReason::HaltedOnException { pc: 0x40, isc: 5 }.to_string(),
        "halted on exception (isc 5) at 00000040"
    );
    assert_eq!(
        StopReason::Breakpoint { pc: 0x10 }.to_string(),
        "breakpoint at 00000010"
    );
}
