//! The WE32101 memory management unit.
//!
//! The MMU is a companion chip sitting between the processor and the
//! bus.  To software it is two things: a page of memory-mapped
//! registers at physical 0x40000, and (once enabled) a translator
//! that turns every virtual address into a physical one by walking
//! descriptor tables in main memory.
//!
//! The register page is organised as sixteen 256-byte subpages
//! selected by bits 8-11 of the address.  Twelve are defined: the
//! segment and page descriptor caches (flat storage here; the
//! emulation walks the in-memory tables on every access and gains
//! nothing from caching), the two section RAMs, the fault code and
//! fault address registers, and the configuration and virtual
//! address registers.  The undefined subpages read zero and ignore
//! writes.
//!
//! A virtual address splits into a 2-bit section id, a 13-bit
//! segment select, and a 17-bit offset.  Writing section RAM A sets
//! the physical base of that section's segment descriptor table;
//! each descriptor is two words.  A contiguous segment maps the
//! whole 17-bit offset from its base; a paged segment points at a
//! page descriptor table indexed by bits 11-16 of the address, each
//! entry mapping one 2 KB page.

use tracing::{event, Level};

use crate::bus::BusFault;

const SECTIONS: usize = 4;
const CACHE_WORDS: usize = 0x20;

const PAGE_SDC_LOW: u32 = 0;
const PAGE_SDC_HIGH: u32 = 1;
const PAGE_PDC_RIGHT_LOW: u32 = 2;
const PAGE_PDC_RIGHT_HIGH: u32 = 3;
const PAGE_PDC_LEFT_LOW: u32 = 4;
const PAGE_PDC_LEFT_HIGH: u32 = 5;
const PAGE_SRAM_A: u32 = 6;
const PAGE_SRAM_B: u32 = 7;
const PAGE_FAULT_CODE: u32 = 8;
const PAGE_FAULT_ADDRESS: u32 = 9;
const PAGE_CONFIGURATION: u32 = 10;
const PAGE_VIRTUAL_ADDRESS: u32 = 11;

/// Fault code reported when a segment or page descriptor has its
/// valid bit clear.
const FAULT_NOT_PRESENT: u32 = 7;

/// One section's slice of the address space: the location of its
/// segment descriptor table, as programmed through the section RAMs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Section {
    /// Physical base of the segment descriptor table (32-byte
    /// aligned; section RAM A writes mask the low bits).
    base: u32,
    /// Table length in entries, from section RAM B.  Stored for
    /// software to read back; the walk does not bounds-check
    /// against it.
    len: u32,
}

/// Decoded view of a two-word segment descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegmentDescriptor {
    valid: bool,
    modified: bool,
    contiguous: bool,
    cacheable: bool,
    object_trap: bool,
    indirect: bool,
    /// Bits 10-23 of word 0: the largest valid offset, in 8-byte
    /// units.
    max_offset: u32,
    /// Four 2-bit permission fields, kernel first.  Decoded for
    /// inspection; access checking is not modelled.
    access: [u8; 4],
    /// Word 1: physical base of the segment (contiguous) or of its
    /// page descriptor table (paged).
    base: u32,
}

impl SegmentDescriptor {
    fn decode(word0: u32, word1: u32) -> SegmentDescriptor {
        let mut access = [0u8; 4];
        for (level, slot) in access.iter_mut().enumerate() {
            *slot = ((word0 >> (24 + level * 2)) & 3) as u8;
        }
        SegmentDescriptor {
            valid: word0 & 0x01 != 0,
            modified: word0 & 0x02 != 0,
            contiguous: word0 & 0x04 != 0,
            cacheable: word0 & 0x08 != 0,
            object_trap: word0 & 0x10 != 0,
            indirect: word0 & 0x20 != 0,
            max_offset: (word0 >> 10) & 0x3fff,
            access,
            base: word1 & 0xffff_ffe0,
        }
    }
}

/// MMU state: the register file and the enable flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mmu {
    enabled: bool,
    sdc_low: [u32; CACHE_WORDS],
    sdc_high: [u32; CACHE_WORDS],
    pdc_right_low: [u32; CACHE_WORDS],
    pdc_right_high: [u32; CACHE_WORDS],
    pdc_left_low: [u32; CACHE_WORDS],
    pdc_left_high: [u32; CACHE_WORDS],
    sram_a: [u32; SECTIONS],
    sram_b: [u32; SECTIONS],
    fault_code: u32,
    fault_address: u32,
    configuration: u32,
    virtual_address: u32,
    sections: [Section; SECTIONS],
}

impl Mmu {
    #[must_use]
    pub fn new() -> Mmu {
        Mmu {
            enabled: false,
            sdc_low: [0; CACHE_WORDS],
            sdc_high: [0; CACHE_WORDS],
            pdc_right_low: [0; CACHE_WORDS],
            pdc_right_high: [0; CACHE_WORDS],
            pdc_left_low: [0; CACHE_WORDS],
            pdc_left_high: [0; CACHE_WORDS],
            sram_a: [0; SECTIONS],
            sram_b: [0; SECTIONS],
            fault_code: 0,
            fault_address: 0,
            configuration: 0,
            virtual_address: 0,
            sections: [Section::default(); SECTIONS],
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        event!(Level::DEBUG, "MMU enabled");
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        event!(Level::DEBUG, "MMU disabled");
        self.enabled = false;
    }

    #[must_use]
    pub fn fault_code(&self) -> u32 {
        self.fault_code
    }

    #[must_use]
    pub fn fault_address(&self) -> u32 {
        self.fault_address
    }

    /// A read from the memory-mapped register page.  The offset
    /// within a subpage wraps around the register array it selects.
    pub(crate) fn read_register(&self, pa: u32) -> u32 {
        let offset = ((pa & 0xff) >> 2) as usize;
        match (pa >> 8) & 0xf {
            PAGE_SDC_LOW => self.sdc_low[offset & (CACHE_WORDS - 1)],
            PAGE_SDC_HIGH => self.sdc_high[offset & (CACHE_WORDS - 1)],
            PAGE_PDC_RIGHT_LOW => self.pdc_right_low[offset & (CACHE_WORDS - 1)],
            PAGE_PDC_RIGHT_HIGH => self.pdc_right_high[offset & (CACHE_WORDS - 1)],
            PAGE_PDC_LEFT_LOW => self.pdc_left_low[offset & (CACHE_WORDS - 1)],
            PAGE_PDC_LEFT_HIGH => self.pdc_left_high[offset & (CACHE_WORDS - 1)],
            PAGE_SRAM_A => self.sram_a[offset & (SECTIONS - 1)],
            PAGE_SRAM_B => self.sram_b[offset & (SECTIONS - 1)],
            PAGE_FAULT_CODE => self.fault_code,
            PAGE_FAULT_ADDRESS => self.fault_address,
            PAGE_CONFIGURATION => self.configuration,
            PAGE_VIRTUAL_ADDRESS => self.virtual_address,
            _ => 0,
        }
    }

    /// A write to the memory-mapped register page.  Section RAM
    /// writes also update the decoded section table bases; writes to
    /// undefined subpages are ignored.
    pub(crate) fn write_register(&mut self, pa: u32, val: u32) {
        let offset = ((pa & 0xff) >> 2) as usize;
        match (pa >> 8) & 0xf {
            PAGE_SDC_LOW => self.sdc_low[offset & (CACHE_WORDS - 1)] = val,
            PAGE_SDC_HIGH => self.sdc_high[offset & (CACHE_WORDS - 1)] = val,
            PAGE_PDC_RIGHT_LOW => self.pdc_right_low[offset & (CACHE_WORDS - 1)] = val,
            PAGE_PDC_RIGHT_HIGH => self.pdc_right_high[offset & (CACHE_WORDS - 1)] = val,
            PAGE_PDC_LEFT_LOW => self.pdc_left_low[offset & (CACHE_WORDS - 1)] = val,
            PAGE_PDC_LEFT_HIGH => self.pdc_left_high[offset & (CACHE_WORDS - 1)] = val,
            PAGE_SRAM_A => {
                let slot = offset & (SECTIONS - 1);
                self.sram_a[slot] = val;
                self.sections[slot].base = val & 0xffff_ffe0;
                event!(
                    Level::DEBUG,
                    section = slot,
                    base = format_args!("{:08x}", self.sections[slot].base),
                    "section descriptor table base set"
                );
            }
            PAGE_SRAM_B => {
                let slot = offset & (SECTIONS - 1);
                self.sram_b[slot] = val;
                self.sections[slot].len = (val >> 10) & 0x1fff;
                event!(
                    Level::DEBUG,
                    section = slot,
                    len = self.sections[slot].len,
                    "section descriptor table length set"
                );
            }
            PAGE_FAULT_CODE => self.fault_code = val,
            PAGE_FAULT_ADDRESS => self.fault_address = val,
            PAGE_CONFIGURATION => self.configuration = val,
            PAGE_VIRTUAL_ADDRESS => self.virtual_address = val,
            _ => {}
        }
    }

    /// Translates `va` by walking the descriptor tables, reading
    /// table words with `read` (an unaligned-tolerant physical word
    /// read restricted to memory).  With the MMU disabled the
    /// address passes through unchanged.
    ///
    /// A descriptor whose valid bit is clear records the fault in
    /// the fault code and fault address registers and fails with
    /// [`BusFault::NotPresent`]; a fault from `read` itself (a table
    /// walked off the edge of memory) propagates as-is.
    pub fn translate<F>(&mut self, va: u32, mut read: F) -> Result<u32, BusFault>
    where
        F: FnMut(u32) -> Result<u32, BusFault>,
    {
        if !self.enabled {
            return Ok(va);
        }

        let sid = ((va >> 30) & 3) as usize;
        let ssl = (va >> 17) & 0x1fff;
        let sd_addr = self.sections[sid].base.wrapping_add(ssl * 8);
        let word0 = read(sd_addr)?;
        let word1 = read(sd_addr.wrapping_add(4))?;
        let sd = SegmentDescriptor::decode(word0, word1);
        event!(
            Level::TRACE,
            va = format_args!("{va:08x}"),
            valid = sd.valid,
            modified = sd.modified,
            contiguous = sd.contiguous,
            cacheable = sd.cacheable,
            object_trap = sd.object_trap,
            indirect = sd.indirect,
            max_offset = sd.max_offset,
            access = ?sd.access,
            base = format_args!("{:08x}", sd.base),
            "segment descriptor"
        );

        if !sd.valid {
            return Err(self.not_present(va));
        }
        if sd.indirect {
            event!(
                Level::DEBUG,
                va = format_args!("{va:08x}"),
                descriptor = format_args!("{word0:08x}"),
                "indirect segment descriptor"
            );
            return Err(BusFault::IndirectDescriptor {
                vaddr: va,
                descriptor: word0,
            });
        }

        if sd.contiguous {
            return Ok(sd.base.wrapping_add(va & 0x1_ffff));
        }

        // Paged segment: one more level through the page descriptor
        // table.
        let psl = (va >> 11) & 0x3f;
        let pd = read(sd.base.wrapping_add(psl * 4))?;
        if pd & 1 == 0 {
            return Err(self.not_present(va));
        }
        Ok((pd & 0xffff_f800) | (va & 0x7ff))
    }

    fn not_present(&mut self, va: u32) -> BusFault {
        self.fault_code = FAULT_NOT_PRESENT;
        self.fault_address = va;
        event!(
            Level::DEBUG,
            va = format_args!("{va:08x}"),
            "descriptor not present"
        );
        BusFault::NotPresent { vaddr: va }
    }
}

impl Default for Mmu {
    fn default() -> Mmu {
        Mmu::new()
    }
}

#[cfg(test)]
fn memory(words: &[(u32, u32)]) -> impl FnMut(u32) -> Result<u32, BusFault> + '_ {
    move |pa| {
        words
            .iter()
            .find_map(|&(addr, word)| (addr == pa).then_some(word))
            .ok_or(BusFault::Unmapped(pa))
    }
}

#[cfg(test)]
const SRAM_A_PAGE: u32 = crate::bus::MMU_BASE + (PAGE_SRAM_A << 8);
#[cfg(test)]
const SRAM_B_PAGE: u32 = crate::bus::MMU_BASE + (PAGE_SRAM_B << 8);

#[test]
fn test_disabled_mmu_is_identity() {
    let mut mmu = Mmu::new();
    let pa = mmu
        .translate(0xdead_beef, |_| panic!("no table walk expected"))
        .expect("disabled translation cannot fail");
    assert_eq!(pa, 0xdead_beef);
}

#[test]
fn test_section_ram_writes_decode_sections() {
    let mut mmu = Mmu::new();
    // Section 2's table lives at 0x2004000; the low five bits are
    // ignored.
    mmu.write_register(SRAM_A_PAGE + 8, 0x0200_401f);
    mmu.write_register(SRAM_B_PAGE + 8, 40 << 10);
    assert_eq!(mmu.sections[2].base, 0x0200_4000);
    assert_eq!(mmu.sections[2].len, 40);
    assert_eq!(mmu.read_register(SRAM_A_PAGE + 8), 0x0200_401f);
    assert_eq!(mmu.read_register(SRAM_B_PAGE + 8), 40 << 10);
}

#[test]
fn test_undefined_register_pages_are_inert() {
    let mut mmu = Mmu::new();
    let undefined = crate::bus::MMU_BASE + (12 << 8);
    mmu.write_register(undefined, 0xffff_ffff);
    assert_eq!(mmu.read_register(undefined), 0);
    assert_eq!(mmu, Mmu::new());
}

#[test]
fn test_descriptor_cache_pages_are_flat_storage() {
    let mut mmu = Mmu::new();
    let sdc_low = crate::bus::MMU_BASE + (PAGE_SDC_LOW << 8);
    mmu.write_register(sdc_low + 0x7c, 0x1234_5678);
    assert_eq!(mmu.read_register(sdc_low + 0x7c), 0x1234_5678);
    assert_eq!(mmu.read_register(sdc_low), 0);
}

#[test]
fn test_contiguous_translation() {
    let mut mmu = Mmu::new();
    mmu.enable();
    // Section 0, segment 1: valid + contiguous, base 0x2010000.
    mmu.write_register(SRAM_A_PAGE, 0x0200_0000);
    let tables = [(0x0200_0008, 0x0000_0005), (0x0200_000c, 0x0201_0000)];
    let va = (1 << 17) | 0x1234;
    let pa = mmu.translate(va, memory(&tables)).expect("translation");
    assert_eq!(pa, 0x0201_1234);
}

#[test]
fn test_paged_translation() {
    let mut mmu = Mmu::new();
    mmu.enable();
    mmu.write_register(SRAM_A_PAGE, 0x0200_0000);
    // Section 0, segment 0: valid, paged, PDT at 0x2000100.  Page 3
    // of the segment maps to the frame at 0x2020800.
    let tables = [
        (0x0200_0000, 0x0000_0001),
        (0x0200_0004, 0x0200_0100),
        (0x0200_010c, 0x0202_0801),
    ];
    let va = (3 << 11) | 0x7ff;
    let pa = mmu.translate(va, memory(&tables)).expect("translation");
    assert_eq!(pa, 0x0202_0fff);
}

#[test]
fn test_not_present_segment_records_fault() {
    let mut mmu = Mmu::new();
    mmu.enable();
    mmu.write_register(SRAM_A_PAGE + 12, 0x0200_0000);
    // Section 3, segment 0: valid bit clear.
    let tables = [(0x0200_0000, 0x0000_0004), (0x0200_0004, 0x0201_0000)];
    let va = 3 << 30;
    assert_eq!(
        mmu.translate(va, memory(&tables)),
        Err(BusFault::NotPresent { vaddr: va })
    );
    assert_eq!(mmu.fault_code(), 7);
    assert_eq!(mmu.fault_address(), va);
    // The fault registers are software visible.
    assert_eq!(
        mmu.read_register(crate::bus::MMU_BASE + (PAGE_FAULT_CODE << 8)),
        7
    );
    assert_eq!(
        mmu.read_register(crate::bus::MMU_BASE + (PAGE_FAULT_ADDRESS << 8)),
        va
    );
}

#[test]
fn test_not_present_page_records_fault() {
    let mut mmu = Mmu::new();
    mmu.enable();
    mmu.write_register(SRAM_A_PAGE, 0x0200_0000);
    let tables = [
        (0x0200_0000, 0x0000_0001),
        (0x0200_0004, 0x0200_0100),
        // Page 0's descriptor: present bit clear.
        (0x0200_0100, 0x0202_0800),
    ];
    assert_eq!(
        mmu.translate(0, memory(&tables)),
        Err(BusFault::NotPresent { vaddr: 0 })
    );
    assert_eq!(mmu.fault_code(), 7);
    assert_eq!(mmu.fault_address(), 0);
}

#[test]
fn test_indirect_descriptor_is_surfaced() {
    let mut mmu = Mmu::new();
    mmu.enable();
    mmu.write_register(SRAM_A_PAGE, 0x0200_0000);
    let tables = [(0x0200_0000, 0x0000_0025), (0x0200_0004, 0x0201_0000)];
    assert_eq!(
        mmu.translate(0, memory(&tables)),
        Err(BusFault::IndirectDescriptor {
            vaddr: 0,
            descriptor: 0x0000_0025,
        })
    );
    // Indirection is table corruption, not an address fault, so the
    // fault registers stay clear.
    assert_eq!(mmu.fault_code(), 0);
}

#[test]
fn test_walk_fault_propagates() {
    let mut mmu = Mmu::new();
    mmu.enable();
    // No section RAM setup: the walk reads descriptors from
    // physical 0, which the test memory does not map.
    assert_eq!(
        mmu.translate(0x42, memory(&[])),
        Err(BusFault::Unmapped(0))
    );
}

#[test]
fn test_segment_descriptor_decoding() {
    let sd = SegmentDescriptor::decode(0xe4ff_fc3f, 0x0123_45ff);
    assert!(sd.valid);
    assert!(sd.modified);
    assert!(sd.contiguous);
    assert!(sd.cacheable);
    assert!(sd.object_trap);
    assert!(sd.indirect);
    assert_eq!(sd.max_offset, 0x3fff);
    assert_eq!(sd.access, [0, 1, 2, 3]);
    assert_eq!(sd.base, 0x0123_45e0);
}
