//! Scenario tests for the execution loop: the power-on sequence,
//! exception gating, interrupt delivery and the wait state.  Tests
//! for individual instruction arms live with the arms.

use base::prelude::*;
use base::registers::{AP, FP, ISP, PC, PCBP, PSW, SP};

use crate::bus::{Bus, IrqRequest, MemoryConfiguration, MMU_BASE, RAM_BASE};
use crate::control::{Cpu, StopReason};

const COMPLAIN: &str = "failed to set up execution loop test program";

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

/// ROM images place byte 0 in the high bits of each word.
fn put_word(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[test]
fn boot_loads_the_initial_context() {
    let mut image = vec![0u8; 0x200];
    put_word(&mut image, 0x80, 0x100);
    put_word(&mut image, 0x100, 0);
    put_word(&mut image, 0x104, RAM_BASE);
    put_word(&mut image, 0x108, RAM_BASE + 0x800);

    let mut bus = Bus::new(&MemoryConfiguration::default());
    let mut cpu = Cpu::new();
    cpu.boot(&mut bus, &image).expect(COMPLAIN);

    assert_eq!(cpu.registers[PCBP], 0x100);
    assert_eq!(cpu.registers[PC], RAM_BASE);
    assert_eq!(cpu.registers[SP], RAM_BASE + 0x800);
    assert_eq!(psw::isc(cpu.registers[PSW]), 3);
    assert!(!bus.mmu().enabled());
}

#[test]
fn boot_follows_the_initial_context_indirection() {
    // A PCB whose PSW has the I bit set points at the real PCB with
    // its fourth word.
    let mut image = vec![0u8; 0x200];
    put_word(&mut image, 0x80, 0x100);
    put_word(&mut image, 0x100, psw::I_MASK);
    put_word(&mut image, 0x104, RAM_BASE + 4);
    put_word(&mut image, 0x108, RAM_BASE + 0x800);
    put_word(&mut image, 0x10c, 0x140);

    let mut bus = Bus::new(&MemoryConfiguration::default());
    let mut cpu = Cpu::new();
    cpu.boot(&mut bus, &image).expect(COMPLAIN);

    assert_eq!(cpu.registers[PCBP], 0x140);
    assert_eq!(cpu.registers[PSW] & psw::I_MASK, 0);
    assert_eq!(cpu.registers[PC], RAM_BASE + 4);
}

#[test]
fn gate_merges_the_old_level_into_the_new_psw() {
    // An illegal opcode raised at user level gates through the
    // second-level table slot for ISC 2.
    let (mut cpu, mut bus) = set_up(&[0x00]);
    let mut image = vec![0u8; 0x200];
    put_word(&mut image, 0, 0x100);
    put_word(&mut image, 0x114, RAM_BASE + 0x10);
    bus.load_rom(&image).expect(COMPLAIN);

    cpu.registers[PSW] = 3 << psw::CM_SHIFT;
    cpu.registers[SP] = RAM_BASE + 0x200;

    assert_eq!(cpu.step(&mut bus), None);

    assert_eq!(cpu.registers[PC], RAM_BASE + 0x10);
    let expected = (3 << psw::CM_SHIFT)
        | (3 << psw::IPL_SHIFT)
        | (7 << psw::ISC_SHIFT)
        | (3 << psw::ET_SHIFT)
        | psw::TM_MASK;
    assert_eq!(cpu.registers[PSW], expected);

    // The faulting PC and the outgoing PSW were pushed in that
    // order.
    assert_eq!(bus.read_word(RAM_BASE + 0x200), Ok(RAM_BASE));
    let pushed = (3 << psw::CM_SHIFT)
        | (3 << psw::PM_SHIFT)
        | (3 << psw::ISC_SHIFT)
        | (3 << psw::ET_SHIFT);
    assert_eq!(bus.read_word(RAM_BASE + 0x204), Ok(pushed));
    assert_eq!(cpu.registers[SP], RAM_BASE + 0x208);
}

#[test]
fn illegal_opcode_halts_without_advancing() {
    let (mut cpu, mut bus) = set_up(&[0x00]);
    cpu.set_halt_on_exception(true);
    assert_eq!(
        cpu.step(&mut bus),
        Some(StopReason::HaltedOnException {
            pc: RAM_BASE,
            isc: 2
        })
    );
    assert_eq!(cpu.registers[PC], RAM_BASE);
}

#[test]
fn reserved_datatype_is_a_decode_fault() {
    // ADDW2 with an expanded-operand prefix naming type 1.
    let (mut cpu, mut bus) = set_up(&[0x9c, 0xe1, 0x40, 0x41]);
    cpu.set_halt_on_exception(true);
    assert_eq!(
        cpu.step(&mut bus),
        Some(StopReason::HaltedOnException {
            pc: RAM_BASE,
            isc: 8
        })
    );
    assert_eq!(cpu.registers[PC], RAM_BASE);
}

#[test]
fn unimplemented_opcode_stops_past_the_instruction() {
    // MVERNO decodes but has no execution arm.
    let (mut cpu, mut bus) = set_up(&[0x30, 0x09]);
    assert_eq!(
        cpu.step(&mut bus),
        Some(StopReason::UnimplementedOpcode {
            pc: RAM_BASE,
            opcode: 0x3009
        })
    );
    assert_eq!(cpu.registers[PC], RAM_BASE + 2);
}

#[test]
fn privileged_register_write_is_rejected() {
    // MOVW %r0,%pcbp from user level.
    let (mut cpu, mut bus) = set_up(&[0x84, 0x40, 0x4d]);
    cpu.registers[PSW] |= 3 << psw::CM_SHIFT;
    cpu.set_halt_on_exception(true);
    assert_eq!(
        cpu.step(&mut bus),
        Some(StopReason::HaltedOnException {
            pc: RAM_BASE,
            isc: 15
        })
    );
    assert_eq!(cpu.registers[PC], RAM_BASE);
}

#[test]
fn interrupt_delivery_switches_context() {
    let old_pcb = RAM_BASE + 0x600;
    let new_pcb = RAM_BASE + 0x500;
    let (mut cpu, mut bus) = set_up(&[0x70]);

    let mut image = vec![0u8; 0x100];
    put_word(&mut image, 0x90, new_pcb);
    bus.load_rom(&image).expect(COMPLAIN);

    bus.write_word(new_pcb, 0).expect(COMPLAIN);
    bus.write_word(new_pcb + 4, RAM_BASE + 0x40).expect(COMPLAIN);
    bus.write_word(new_pcb + 8, RAM_BASE + 0x700).expect(COMPLAIN);

    cpu.registers[PSW] = psw::C_MASK;
    cpu.registers[PCBP] = old_pcb;
    cpu.registers[SP] = RAM_BASE + 0x300;
    cpu.registers[ISP] = RAM_BASE + 0x800;
    bus.irq_mut().raise(IrqRequest {
        ipl: 15,
        id: 1,
        nmi: false,
    });

    assert_eq!(cpu.step(&mut bus), None);

    assert_eq!(cpu.registers[PCBP], new_pcb);
    assert_eq!(cpu.registers[PC], RAM_BASE + 0x40);
    assert_eq!(cpu.registers[SP], RAM_BASE + 0x700);
    assert_eq!(psw::isc(cpu.registers[PSW]), 7);
    assert_eq!(psw::et(cpu.registers[PSW]), 3);

    // The outgoing context landed in the old PCB, with the program
    // counter still on the instruction the request pre-empted, and
    // the old PCB pointer went to the interrupt stack.
    assert_eq!(bus.read_word(old_pcb), Ok(psw::C_MASK));
    assert_eq!(bus.read_word(old_pcb + 4), Ok(RAM_BASE));
    assert_eq!(bus.read_word(old_pcb + 8), Ok(RAM_BASE + 0x300));
    assert_eq!(bus.read_word(RAM_BASE + 0x800), Ok(old_pcb));
    assert_eq!(cpu.registers[ISP], RAM_BASE + 0x804);
    assert!(!bus.irq().is_pending());
}

#[test]
fn masked_interrupt_is_dropped() {
    let (mut cpu, mut bus) = set_up(&[0x70]);
    cpu.registers[PSW] = psw::IPL_MASK;
    bus.irq_mut().raise(IrqRequest {
        ipl: 3,
        id: 1,
        nmi: false,
    });

    assert_eq!(cpu.step(&mut bus), None);

    // The request was consumed without a context switch and the
    // instruction ran.
    assert!(!bus.irq().is_pending());
    assert_eq!(cpu.registers[PCBP], 0);
    assert_eq!(cpu.registers[PC], RAM_BASE + 1);
}

#[test]
fn nmi_forces_vector_zero() {
    let new_pcb = RAM_BASE + 0x500;
    let (mut cpu, mut bus) = set_up(&[0x70]);

    let mut image = vec![0u8; 0x100];
    put_word(&mut image, 0x8c, new_pcb);
    bus.load_rom(&image).expect(COMPLAIN);

    bus.write_word(new_pcb, 0).expect(COMPLAIN);
    bus.write_word(new_pcb + 4, RAM_BASE + 0x40).expect(COMPLAIN);
    bus.write_word(new_pcb + 8, RAM_BASE + 0x700).expect(COMPLAIN);

    cpu.registers[PSW] = psw::IPL_MASK;
    cpu.registers[PCBP] = RAM_BASE + 0x600;
    cpu.registers[ISP] = RAM_BASE + 0x800;
    bus.irq_mut().raise(IrqRequest {
        ipl: 0,
        id: 7,
        nmi: true,
    });

    assert_eq!(cpu.step(&mut bus), None);

    // Vector slot 0 was used even though the request named id 7,
    // and the IPL mask did not apply.
    assert_eq!(cpu.registers[PCBP], new_pcb);
    assert_eq!(cpu.registers[PC], RAM_BASE + 0x40);
}

#[test]
fn quick_interrupt_is_consumed_without_effect() {
    let (mut cpu, mut bus) = set_up(&[0x70]);
    cpu.registers[PSW] = psw::QIE_MASK;
    cpu.registers[PCBP] = RAM_BASE + 0x600;
    bus.irq_mut().raise(IrqRequest {
        ipl: 15,
        id: 1,
        nmi: false,
    });

    assert_eq!(cpu.step(&mut bus), None);

    assert!(!bus.irq().is_pending());
    assert_eq!(cpu.registers[PCBP], RAM_BASE + 0x600);
    assert_eq!(cpu.registers[PC], RAM_BASE + 1);
}

#[test]
fn interrupt_request_ends_the_wait() {
    // WAIT, then a NOP the engine only reaches once a request
    // arrives.
    let (mut cpu, mut bus) = set_up(&[0x2f, 0x70]);
    cpu.registers[PSW] = psw::IPL_MASK;

    assert_eq!(cpu.step(&mut bus), None);
    assert_eq!(cpu.registers[PC], RAM_BASE + 1);

    // Idle: nothing pending, nothing executes.
    assert_eq!(cpu.step(&mut bus), None);
    assert_eq!(cpu.registers[PC], RAM_BASE + 1);

    // Even a masked request ends the wait.
    bus.irq_mut().raise(IrqRequest {
        ipl: 3,
        id: 0,
        nmi: false,
    });
    assert_eq!(cpu.step(&mut bus), None);
    assert_eq!(cpu.registers[PC], RAM_BASE + 2);
}

#[test]
fn callps_saves_the_full_context_when_r_is_set() {
    let old_pcb = RAM_BASE + 0x600;
    let new_pcb = RAM_BASE + 0x500;
    let (mut cpu, mut bus) = set_up(&[0x30, 0xac]);

    bus.write_word(new_pcb, psw::R_MASK).expect(COMPLAIN);
    bus.write_word(new_pcb + 4, RAM_BASE + 0x40).expect(COMPLAIN);
    bus.write_word(new_pcb + 8, RAM_BASE + 0x700).expect(COMPLAIN);

    cpu.registers[0] = new_pcb;
    cpu.registers[1] = 0x3333;
    cpu.registers[8] = 0x4444;
    cpu.registers[AP] = 0x1111;
    cpu.registers[FP] = 0x2222;
    cpu.registers[PCBP] = old_pcb;
    cpu.registers[ISP] = RAM_BASE + 0x800;

    assert_eq!(cpu.step(&mut bus), None);

    // The R bit from the new PCB extends the save with AP, FP and
    // the general registers; the switch itself then clears it.
    assert_eq!(bus.read_word(old_pcb + 4), Ok(RAM_BASE + 2));
    assert_eq!(bus.read_word(old_pcb + 20), Ok(0x1111));
    assert_eq!(bus.read_word(old_pcb + 24), Ok(0x2222));
    assert_eq!(bus.read_word(old_pcb + 28), Ok(new_pcb));
    assert_eq!(bus.read_word(old_pcb + 32), Ok(0x3333));
    assert_eq!(bus.read_word(old_pcb + 60), Ok(0x4444));
    assert_eq!(cpu.registers[PSW] & psw::R_MASK, 0);

    assert_eq!(cpu.registers[PCBP], new_pcb);
    assert_eq!(cpu.registers[PC], RAM_BASE + 0x40);
    assert_eq!(bus.read_word(RAM_BASE + 0x800), Ok(old_pcb));
}

#[test]
fn history_keeps_the_most_recent_instructions() {
    let (_, mut bus) = set_up(&[0x70, 0x70]);
    let mut cpu = Cpu::with_history_capacity(8);
    cpu.registers[PC] = RAM_BASE;

    assert_eq!(cpu.run(&mut bus, 2), None);

    let history = cpu.history();
    assert_eq!(history.len(), 2);
    let pcs: Vec<u32> = history.iter().map(|instruction| instruction.pc).collect();
    assert_eq!(pcs, vec![RAM_BASE, RAM_BASE + 1]);
    assert_eq!(
        history.latest().map(|instruction| instruction.pc),
        Some(RAM_BASE + 1)
    );
}

#[test]
fn boot_program_runs_from_rom() {
    // A ROM program loads a constant, stores it to main memory and
    // runs into an illegal opcode.
    let mut image = vec![0u8; 0x300];
    put_word(&mut image, 0x80, 0x100);
    put_word(&mut image, 0x100, 0);
    put_word(&mut image, 0x104, 0x200);
    put_word(&mut image, 0x108, RAM_BASE + 0x800);
    image[0x200..0x20f].copy_from_slice(&[
        0x84, 0x4f, 0x78, 0x56, 0x34, 0x12, 0x40, // MOVW &0x12345678,%r0
        0x84, 0x40, 0x7f, 0x00, 0x01, 0x00, 0x02, // MOVW %r0,$0x02000100
        0x00,
    ]);

    let mut bus = Bus::new(&MemoryConfiguration::default());
    let mut cpu = Cpu::new();
    cpu.set_halt_on_exception(true);
    cpu.boot(&mut bus, &image).expect(COMPLAIN);

    assert_eq!(
        cpu.run(&mut bus, 10),
        Some(StopReason::HaltedOnException { pc: 0x20e, isc: 2 })
    );
    assert_eq!(cpu.registers[0], 0x1234_5678);

    // The stored word reads back big-endian, high byte first.
    assert_eq!(bus.read_word(RAM_BASE + 0x100), Ok(0x1234_5678));
    assert_eq!(bus.read_byte(RAM_BASE + 0x100), Ok(0x12));
    assert_eq!(bus.read_byte(RAM_BASE + 0x103), Ok(0x78));
}

#[test]
fn translation_fault_latches_an_external_memory_fault() {
    // MOVW %r0,$0x02020000: the program's own segment translates,
    // but the store target's descriptor has its valid bit clear.
    let (mut cpu, mut bus) = set_up(&[0x84, 0x40, 0x7f, 0x00, 0x00, 0x02, 0x02]);
    let sdt = RAM_BASE + 0x4000;
    // Section 0: segment 0x100 (the program, identity-mapped) is
    // valid and contiguous; segment 0x101 is not present.
    bus.write_word(sdt + 0x800, 0x05).expect(COMPLAIN);
    bus.write_word(sdt + 0x804, RAM_BASE).expect(COMPLAIN);
    bus.write_word(sdt + 0x808, 0x04).expect(COMPLAIN);
    bus.write_word(sdt + 0x80c, 0).expect(COMPLAIN);
    bus.write_word(MMU_BASE + 0x600, sdt).expect(COMPLAIN);
    bus.mmu_mut().enable();

    cpu.registers[0] = 0xdead_beef;
    cpu.set_halt_on_exception(true);

    assert_eq!(
        cpu.step(&mut bus),
        Some(StopReason::HaltedOnException {
            pc: RAM_BASE,
            isc: NormalException::ExternalMemoryFault.code(),
        })
    );
    assert_eq!(bus.mmu().fault_code(), 7);
    assert_eq!(bus.mmu().fault_address(), 0x0202_0000);
}

#[test]
fn plain_context_switch_skips_the_extended_save_area() {
    // The incoming PCB's PSW has R clear, so only PSW, PC and SP go
    // back to the outgoing PCB; the AP/FP/register slots keep
    // whatever was in them.
    let old_pcb = RAM_BASE + 0x600;
    let new_pcb = RAM_BASE + 0x500;
    let (mut cpu, mut bus) = set_up(&[0x70]);

    let mut image = vec![0u8; 0x100];
    put_word(&mut image, 0x90, new_pcb);
    bus.load_rom(&image).expect(COMPLAIN);

    bus.write_word(new_pcb, 0).expect(COMPLAIN);
    bus.write_word(new_pcb + 4, RAM_BASE + 0x40).expect(COMPLAIN);
    bus.write_word(new_pcb + 8, RAM_BASE + 0x700).expect(COMPLAIN);
    for offset in [20, 24, 28, 60] {
        bus.write_word(old_pcb + offset, 0x5a5a_5a5a).expect(COMPLAIN);
    }

    cpu.registers[AP] = 0x1111;
    cpu.registers[FP] = 0x2222;
    cpu.registers[PCBP] = old_pcb;
    cpu.registers[ISP] = RAM_BASE + 0x800;
    bus.irq_mut().raise(IrqRequest {
        ipl: 15,
        id: 1,
        nmi: false,
    });

    assert_eq!(cpu.step(&mut bus), None);

    assert_eq!(cpu.registers[PCBP], new_pcb);
    assert_eq!(bus.read_word(old_pcb + 4), Ok(RAM_BASE));
    for offset in [20, 24, 28, 60] {
        assert_eq!(bus.read_word(old_pcb + offset), Ok(0x5a5a_5a5a));
    }
}

#[test]
fn block_move_restore_is_never_replayed() {
    // The switch microsequence clears R after loading the new PSW,
    // so a restore list in the incoming PCB is never walked.
    let old_pcb = RAM_BASE + 0x600;
    let new_pcb = RAM_BASE + 0x500;
    let (mut cpu, mut bus) = set_up(&[0x70]);

    let mut image = vec![0u8; 0x100];
    put_word(&mut image, 0x90, new_pcb);
    bus.load_rom(&image).expect(COMPLAIN);

    bus.write_word(new_pcb, psw::R_MASK).expect(COMPLAIN);
    bus.write_word(new_pcb + 4, RAM_BASE + 0x40).expect(COMPLAIN);
    bus.write_word(new_pcb + 8, RAM_BASE + 0x700).expect(COMPLAIN);
    // A one-entry restore list: a single word destined for
    // RAM_BASE + 0x300, then the terminating zero count.
    bus.write_word(new_pcb + 64, 1).expect(COMPLAIN);
    bus.write_word(new_pcb + 68, RAM_BASE + 0x300).expect(COMPLAIN);
    bus.write_word(new_pcb + 72, 0x5555).expect(COMPLAIN);
    bus.write_word(new_pcb + 76, 0).expect(COMPLAIN);

    cpu.registers[2] = 0x2222;
    cpu.registers[PCBP] = old_pcb;
    cpu.registers[ISP] = RAM_BASE + 0x800;
    bus.irq_mut().raise(IrqRequest {
        ipl: 15,
        id: 1,
        nmi: false,
    });

    assert_eq!(cpu.step(&mut bus), None);

    assert_eq!(cpu.registers[PSW] & psw::R_MASK, 0);
    assert_eq!(bus.read_word(RAM_BASE + 0x300), Ok(0));
    assert_eq!(cpu.registers[2], 0x2222);
}

#[test]
fn movw_tolerates_unaligned_operands() {
    // MOVW 1(%r1),%r0: the odd source address resolves to the word
    // containing it rather than faulting.
    let (mut cpu, mut bus) = set_up(&[0x84, 0xc1, 0x01, 0x40]);
    bus.write_word(RAM_BASE + 0x100, 0x1234_5678)
        .expect(COMPLAIN);
    cpu.registers[1] = RAM_BASE + 0x100;
    cpu.set_halt_on_exception(true);

    assert_eq!(cpu.step(&mut bus), None);
    assert_eq!(cpu.registers[0], 0x1234_5678);
    assert_eq!(cpu.registers[PC], RAM_BASE + 4);
}
