//! Names and indices for the WE32100 register file.
//!
//! The processor exposes sixteen 32-bit general registers.  Registers
//! 0 through 8 are truly general purpose; the remaining seven are
//! assigned roles by the architecture and the operating-system
//! support instructions ("WE 32100 Microprocessor Information
//! Manual", Section 2.2):
//!
//! |Index|Name |Role                           |
//! |-----|-----|-------------------------------|
//! |9    |FP   |Frame pointer                  |
//! |10   |AP   |Argument pointer               |
//! |11   |PSW  |Processor status word          |
//! |12   |SP   |Stack pointer                  |
//! |13   |PCBP |Process control block pointer  |
//! |14   |ISP  |Interrupt stack pointer        |
//! |15   |PC   |Program counter                |
//!
//! PSW, PCBP and ISP are privileged: a write in any execution level
//! other than kernel raises a privileged-register exception.

pub const NUM_REGISTERS: usize = 16;

pub const FP: usize = 9;
pub const AP: usize = 10;
pub const PSW: usize = 11;
pub const SP: usize = 12;
pub const PCBP: usize = 13;
pub const ISP: usize = 14;
pub const PC: usize = 15;

const NAMES: [&str; NUM_REGISTERS] = [
    "%r0", "%r1", "%r2", "%r3", "%r4", "%r5", "%r6", "%r7", "%r8", "%fp", "%ap", "%psw", "%sp",
    "%pcbp", "%isp", "%pc",
];

/// The assembler-style name of a register, as printed in execution
/// traces.
#[must_use]
pub fn name(index: usize) -> &'static str {
    NAMES[index & 0xf]
}

/// True for the registers only kernel-level code may write.
#[must_use]
pub fn is_privileged(index: usize) -> bool {
    matches!(index, PSW | PCBP | ISP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_registers_have_symbolic_names() {
        assert_eq!(name(0), "%r0");
        assert_eq!(name(FP), "%fp");
        assert_eq!(name(AP), "%ap");
        assert_eq!(name(PSW), "%psw");
        assert_eq!(name(SP), "%sp");
        assert_eq!(name(PCBP), "%pcbp");
        assert_eq!(name(ISP), "%isp");
        assert_eq!(name(PC), "%pc");
    }

    #[test]
    fn only_control_registers_are_privileged() {
        let privileged: Vec<usize> = (0..NUM_REGISTERS).filter(|r| is_privileged(*r)).collect();
        assert_eq!(privileged, vec![PSW, PCBP, ISP]);
    }
}
