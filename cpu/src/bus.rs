//! Physical address space of the 3B2/400 system board.
//!
//! The WE32100 sees a flat 32-bit physical space with three mapped
//! windows: the boot ROM at the bottom, main memory high up at
//! 0x2000000, and two IO windows in between (the on-board device
//! page group at 0x40000 and the much larger IO-board expansion area
//! at 0x200000).  Everything else is open bus: reads fault, writes
//! fault and are dropped.
//!
//! Storage is word-granular.  The machine is big-endian, so byte 0 of
//! a word is its most significant byte; byte and halfword access is
//! shift arithmetic on the containing word.  IO access is delegated,
//! width in hand, to whatever device claims the address.
//!
//! Nothing in this module raises processor exceptions.  Every
//! operation that can fail returns a [`BusFault`], and the execution
//! engine decides what a fault means (usually: latch an
//! external-memory exception, read zero, drop the write).

use std::error;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::Serialize;
use tracing::{event, Level};

use crate::mmu::Mmu;

pub(crate) const ROM_SIZE: u32 = 0x8000;
pub(crate) const RAM_BASE: u32 = 0x0200_0000;
pub(crate) const IO_BASE: u32 = 0x0004_0000;
pub(crate) const IO_SIZE: u32 = 0x0001_0000;
pub(crate) const IO_BOARD_BASE: u32 = 0x0020_0000;
pub(crate) const IO_BOARD_SIZE: u32 = 0x01e0_0000;
pub(crate) const MMU_BASE: u32 = IO_BASE;
pub(crate) const MMU_SIZE: u32 = 0x1000;

/// Reads of this on-board IO address report the installed memory
/// size to the ROM's sizing routine.
const MEMSIZE_REGISTER: u32 = 0x0004_c003;

/// Shift count which brings the byte addressed by `pa` to the bottom
/// of its containing word: 24, 16, 8 or 0 as `pa & 3` runs 0 to 3.
const fn byte_shift(pa: u32) -> u32 {
    (!(pa & 3) << 3) & 0x1f
}

/// The width of a single bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
}

impl Display for AccessWidth {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            AccessWidth::Byte => "byte",
            AccessWidth::Half => "halfword",
            AccessWidth::Word => "word",
        })
    }
}

/// Why a bus operation could not complete.  The first three arise
/// from physical access, the last two from MMU translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BusFault {
    /// No memory or device decodes this physical address.
    Unmapped(u32),
    /// A store targeted the boot ROM.
    ReadOnly(u32),
    /// A word or halfword access not aligned to its width.
    Misaligned { address: u32, width: AccessWidth },
    /// Translation reached a segment or page descriptor whose valid
    /// bit is clear.
    NotPresent { vaddr: u32 },
    /// Translation reached an indirect segment descriptor.  The
    /// section RAM registers can only describe ordinary tables, so a
    /// descriptor with the indirect bit set means the tables
    /// themselves are corrupt.
    IndirectDescriptor { vaddr: u32, descriptor: u32 },
}

impl Display for BusFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            BusFault::Unmapped(pa) => {
                write!(f, "physical address {pa:08x} is not mapped")
            }
            BusFault::ReadOnly(pa) => {
                write!(f, "physical address {pa:08x} is in the boot ROM")
            }
            BusFault::Misaligned { address, width } => {
                write!(f, "misaligned {width} access at {address:08x}")
            }
            BusFault::NotPresent { vaddr } => {
                write!(f, "descriptor for virtual address {vaddr:08x} is not present")
            }
            BusFault::IndirectDescriptor { vaddr, descriptor } => {
                write!(
                    f,
                    "indirect segment descriptor {descriptor:08x} for virtual address {vaddr:08x}"
                )
            }
        }
    }
}

impl error::Error for BusFault {}

/// The four main-memory populations the system board supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RamSize {
    Kb512,
    Mb1,
    Mb2,
    Mb4,
}

impl RamSize {
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            RamSize::Kb512 => 0x8_0000,
            RamSize::Mb1 => 0x10_0000,
            RamSize::Mb2 => 0x20_0000,
            RamSize::Mb4 => 0x40_0000,
        }
    }

    /// The value the memory-size register reports for this
    /// population.  The encoding is not monotonic: 1 MB reads back
    /// as 2 and 2 MB as 1.
    #[must_use]
    pub const fn memsize_code(self) -> u32 {
        match self {
            RamSize::Kb512 => 0,
            RamSize::Mb1 => 2,
            RamSize::Mb2 => 1,
            RamSize::Mb4 => 3,
        }
    }
}

impl Default for RamSize {
    fn default() -> RamSize {
        RamSize::Mb4
    }
}

impl Display for RamSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            RamSize::Kb512 => "512K",
            RamSize::Mb1 => "1M",
            RamSize::Mb2 => "2M",
            RamSize::Mb4 => "4M",
        })
    }
}

/// A RAM size argument which is not one of the four populations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRamSize(pub String);

impl Display for UnknownRamSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "'{}' is not an installable RAM size (expected 512K, 1M, 2M or 4M)",
            self.0
        )
    }
}

impl error::Error for UnknownRamSize {}

impl FromStr for RamSize {
    type Err = UnknownRamSize;

    fn from_str(s: &str) -> Result<RamSize, UnknownRamSize> {
        match s.to_ascii_uppercase().as_str() {
            "512K" | "512KB" => Ok(RamSize::Kb512),
            "1M" | "1MB" => Ok(RamSize::Mb1),
            "2M" | "2MB" => Ok(RamSize::Mb2),
            "4M" | "4MB" => Ok(RamSize::Mb4),
            _ => Err(UnknownRamSize(s.to_string())),
        }
    }
}

/// Configuration options for the memory subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryConfiguration {
    pub ram_size: RamSize,
}

/// A ROM image which cannot be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomImageError {
    /// The image does not fit in the 32 KB boot ROM.
    TooLarge { len: usize },
}

impl Display for RomImageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            RomImageError::TooLarge { len } => {
                write!(
                    f,
                    "ROM image is {len} bytes but the boot ROM holds only {ROM_SIZE}"
                )
            }
        }
    }
}

impl error::Error for RomImageError {}

/// A device's request for processor attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IrqRequest {
    /// Priority level, compared against the PSW IPL field.
    pub ipl: u8,
    /// Device id; selects the interrupt vector slot.
    pub id: u8,
    /// A non-maskable request ignores the IPL comparison and forces
    /// id 0.
    pub nmi: bool,
}

/// The single shared interrupt request line.
///
/// The board wire-ORs its interrupt sources, and the emulation keeps
/// that shape: one request may be latched at a time, and a new
/// request arriving while one is pending is dropped.  The execution
/// engine consumes the latch at the top of each cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqLine {
    pending: Option<IrqRequest>,
}

impl IrqLine {
    /// Latches a request, unless one is already pending.
    pub fn raise(&mut self, request: IrqRequest) {
        if self.pending.is_some() {
            return;
        }
        event!(
            Level::DEBUG,
            ipl = request.ipl,
            id = request.id,
            nmi = request.nmi,
            "interrupt request latched"
        );
        self.pending = Some(request);
    }

    /// Consumes the pending request, if any.
    pub fn take(&mut self) -> Option<IrqRequest> {
        self.pending.take()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// An IO device model.
///
/// Devices claim a physical address window when registered with
/// [`Bus::add_device`] and see every access within it.  Reads and
/// writes carry the access width because some real devices decode
/// byte and word cycles differently.  `service` runs once per
/// execution-loop iteration and is where a device raises interrupt
/// requests.
pub trait Device {
    fn name(&self) -> &str;
    fn read(&mut self, pa: u32, width: AccessWidth) -> u32;
    fn write(&mut self, pa: u32, val: u32, width: AccessWidth);
    fn service(&mut self, _irq: &mut IrqLine) {}
}

struct DeviceSlot {
    base: u32,
    size: u32,
    device: Box<dyn Device>,
}

/// Where a physical address lands.  The value in `Rom` and `Ram` is
/// the index of the containing word.
enum Routing {
    Rom(usize),
    Ram(usize),
    Io,
}

fn route(pa: u32, ram_bytes: u32) -> Option<Routing> {
    if (IO_BASE..IO_BASE + IO_SIZE).contains(&pa)
        || (IO_BOARD_BASE..IO_BOARD_BASE + IO_BOARD_SIZE).contains(&pa)
    {
        Some(Routing::Io)
    } else if pa < ROM_SIZE {
        Some(Routing::Rom((pa >> 2) as usize))
    } else if (RAM_BASE..RAM_BASE + ram_bytes).contains(&pa) {
        Some(Routing::Ram(((pa - RAM_BASE) >> 2) as usize))
    } else {
        None
    }
}

/// Reads the word containing `pa` from ROM or RAM, ignoring
/// alignment.  This is the restricted read the MMU table walker
/// uses: translation tables live in memory, never in device space,
/// so a walk never touches the IO windows.
fn memory_word(rom: &[u32], ram: &[u32], pa: u32) -> Result<u32, BusFault> {
    if pa < ROM_SIZE {
        Ok(rom[(pa >> 2) as usize])
    } else {
        let ram_bytes = (ram.len() as u32) << 2;
        if (RAM_BASE..RAM_BASE + ram_bytes).contains(&pa) {
            Ok(ram[((pa - RAM_BASE) >> 2) as usize])
        } else {
            Err(BusFault::Unmapped(pa))
        }
    }
}

/// The system board: ROM, RAM, the MMU and the IO dispatch table.
///
/// All memory access by the execution engine comes through here.
/// The `fetch_*`/`store_*` methods take virtual addresses and
/// translate them through the MMU first; the `read_*`/`write_*`
/// methods are physical.
pub struct Bus {
    rom: Box<[u32]>,
    ram: Box<[u32]>,
    ram_size: RamSize,
    mmu: Mmu,
    devices: Vec<DeviceSlot>,
    irq: IrqLine,
}

impl Bus {
    #[must_use]
    pub fn new(config: &MemoryConfiguration) -> Bus {
        Bus {
            rom: vec![0; (ROM_SIZE >> 2) as usize].into_boxed_slice(),
            ram: vec![0; (config.ram_size.bytes() >> 2) as usize].into_boxed_slice(),
            ram_size: config.ram_size,
            mmu: Mmu::new(),
            devices: Vec::new(),
            irq: IrqLine::default(),
        }
    }

    /// Copies a byte-packed ROM image into the boot ROM's word
    /// storage.  Short images leave the rest of the ROM zeroed.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), RomImageError> {
        if image.len() > ROM_SIZE as usize {
            return Err(RomImageError::TooLarge { len: image.len() });
        }
        self.rom.fill(0);
        for (i, byte) in image.iter().enumerate() {
            self.rom[i >> 2] |= u32::from(*byte) << byte_shift(i as u32);
        }
        event!(Level::INFO, bytes = image.len(), "ROM image loaded");
        Ok(())
    }

    /// Registers `device` over the physical window
    /// `base..base + size`.  Earlier registrations win on overlap.
    pub fn add_device(&mut self, base: u32, size: u32, device: Box<dyn Device>) {
        event!(
            Level::DEBUG,
            name = device.name(),
            base = format_args!("{base:08x}"),
            size,
            "device registered"
        );
        self.devices.push(DeviceSlot { base, size, device });
    }

    /// Gives every registered device a chance to run and raise
    /// interrupt requests.  Called once per execution-loop cycle.
    pub fn service_devices(&mut self) {
        for slot in self.devices.iter_mut() {
            slot.device.service(&mut self.irq);
        }
    }

    #[must_use]
    pub fn irq(&self) -> &IrqLine {
        &self.irq
    }

    pub fn irq_mut(&mut self) -> &mut IrqLine {
        &mut self.irq
    }

    #[must_use]
    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut Mmu {
        &mut self.mmu
    }

    #[must_use]
    pub fn ram_size(&self) -> RamSize {
        self.ram_size
    }

    fn io_read(&mut self, pa: u32, width: AccessWidth) -> Result<u32, BusFault> {
        if pa == MEMSIZE_REGISTER {
            return Ok(self.ram_size.memsize_code());
        }
        if (IO_BOARD_BASE..IO_BOARD_BASE + IO_BOARD_SIZE).contains(&pa) {
            // No IO boards are modelled.  The two-byte id codes at
            // the slot probe addresses let sizing software see an
            // empty backplane instead of a bus error.
            event!(Level::TRACE, pa = format_args!("{pa:08x}"), "IO board read");
            return Ok(match pa {
                0x0020_0000 => 0x00,
                0x0020_0001 => 0x03,
                0x0040_0000 => 0x00,
                0x0040_0001 => 0x05,
                _ => 0,
            });
        }
        if (MMU_BASE..MMU_BASE + MMU_SIZE).contains(&pa) {
            return Ok(self.mmu.read_register(pa));
        }
        for slot in self.devices.iter_mut() {
            if (slot.base..slot.base + slot.size).contains(&pa) {
                return Ok(slot.device.read(pa, width));
            }
        }
        event!(
            Level::DEBUG,
            pa = format_args!("{pa:08x}"),
            "no device listening on read"
        );
        Err(BusFault::Unmapped(pa))
    }

    fn io_write(&mut self, pa: u32, val: u32, width: AccessWidth) -> Result<(), BusFault> {
        if (IO_BOARD_BASE..IO_BOARD_BASE + IO_BOARD_SIZE).contains(&pa) {
            event!(
                Level::TRACE,
                pa = format_args!("{pa:08x}"),
                val = format_args!("{val:08x}"),
                "IO board write dropped"
            );
            return Ok(());
        }
        if (MMU_BASE..MMU_BASE + MMU_SIZE).contains(&pa) {
            self.mmu.write_register(pa, val);
            return Ok(());
        }
        for slot in self.devices.iter_mut() {
            if (slot.base..slot.base + slot.size).contains(&pa) {
                slot.device.write(pa, val, width);
                return Ok(());
            }
        }
        event!(
            Level::DEBUG,
            pa = format_args!("{pa:08x}"),
            "no device listening on write"
        );
        Err(BusFault::Unmapped(pa))
    }

    pub fn read_byte(&mut self, pa: u32) -> Result<u8, BusFault> {
        let sc = byte_shift(pa);
        match route(pa, self.ram_size.bytes()) {
            Some(Routing::Io) => Ok(self.io_read(pa, AccessWidth::Byte)? as u8),
            Some(Routing::Rom(index)) => Ok((self.rom[index] >> sc) as u8),
            Some(Routing::Ram(index)) => Ok((self.ram[index] >> sc) as u8),
            None => Err(BusFault::Unmapped(pa)),
        }
    }

    pub fn read_half(&mut self, pa: u32) -> Result<u16, BusFault> {
        if pa & 1 != 0 {
            return Err(BusFault::Misaligned {
                address: pa,
                width: AccessWidth::Half,
            });
        }
        match route(pa, self.ram_size.bytes()) {
            Some(Routing::Io) => Ok(self.io_read(pa, AccessWidth::Half)? as u16),
            Some(Routing::Rom(index)) => Ok(half_of(self.rom[index], pa)),
            Some(Routing::Ram(index)) => Ok(half_of(self.ram[index], pa)),
            None => Err(BusFault::Unmapped(pa)),
        }
    }

    pub fn read_word(&mut self, pa: u32) -> Result<u32, BusFault> {
        if pa & 3 != 0 {
            return Err(BusFault::Misaligned {
                address: pa,
                width: AccessWidth::Word,
            });
        }
        self.read_word_unaligned(pa)
    }

    /// Reads the word containing `pa`, without an alignment check.
    /// Instruction fetch and some descriptor reads need this; data
    /// paths use [`Bus::read_word`].
    pub fn read_word_unaligned(&mut self, pa: u32) -> Result<u32, BusFault> {
        match route(pa, self.ram_size.bytes()) {
            Some(Routing::Io) => self.io_read(pa, AccessWidth::Word),
            Some(Routing::Rom(index)) => Ok(self.rom[index]),
            Some(Routing::Ram(index)) => Ok(self.ram[index]),
            None => Err(BusFault::Unmapped(pa)),
        }
    }

    pub fn write_byte(&mut self, pa: u32, val: u8) -> Result<(), BusFault> {
        let sc = byte_shift(pa);
        match route(pa, self.ram_size.bytes()) {
            Some(Routing::Io) => self.io_write(pa, u32::from(val), AccessWidth::Byte),
            Some(Routing::Rom(_)) => Err(BusFault::ReadOnly(pa)),
            Some(Routing::Ram(index)) => {
                let mask = 0xff << sc;
                self.ram[index] = (self.ram[index] & !mask) | (u32::from(val) << sc);
                Ok(())
            }
            None => Err(BusFault::Unmapped(pa)),
        }
    }

    pub fn write_half(&mut self, pa: u32, val: u16) -> Result<(), BusFault> {
        if pa & 1 != 0 {
            return Err(BusFault::Misaligned {
                address: pa,
                width: AccessWidth::Half,
            });
        }
        match route(pa, self.ram_size.bytes()) {
            Some(Routing::Io) => self.io_write(pa, u32::from(val), AccessWidth::Half),
            Some(Routing::Rom(_)) => Err(BusFault::ReadOnly(pa)),
            Some(Routing::Ram(index)) => {
                let word = self.ram[index];
                self.ram[index] = if pa & 2 != 0 {
                    (word & 0xffff_0000) | u32::from(val)
                } else {
                    (word & 0xffff) | (u32::from(val) << 16)
                };
                Ok(())
            }
            None => Err(BusFault::Unmapped(pa)),
        }
    }

    pub fn write_word(&mut self, pa: u32, val: u32) -> Result<(), BusFault> {
        if pa & 3 != 0 {
            return Err(BusFault::Misaligned {
                address: pa,
                width: AccessWidth::Word,
            });
        }
        match route(pa, self.ram_size.bytes()) {
            Some(Routing::Io) => self.io_write(pa, val, AccessWidth::Word),
            Some(Routing::Rom(_)) => Err(BusFault::ReadOnly(pa)),
            Some(Routing::Ram(index)) => {
                self.ram[index] = val;
                Ok(())
            }
            None => Err(BusFault::Unmapped(pa)),
        }
    }

    /// Translates a virtual address through the MMU.  With the MMU
    /// disabled this is the identity.
    pub fn translate(&mut self, va: u32) -> Result<u32, BusFault> {
        let Bus {
            ref rom,
            ref ram,
            ref mut mmu,
            ..
        } = *self;
        mmu.translate(va, |pa| memory_word(rom, ram, pa))
    }

    pub fn fetch_byte(&mut self, va: u32) -> Result<u8, BusFault> {
        let pa = self.translate(va)?;
        self.read_byte(pa)
    }

    pub fn fetch_half(&mut self, va: u32) -> Result<u16, BusFault> {
        let pa = self.translate(va)?;
        self.read_half(pa)
    }

    pub fn fetch_word(&mut self, va: u32) -> Result<u32, BusFault> {
        let pa = self.translate(va)?;
        self.read_word(pa)
    }

    pub fn fetch_word_unaligned(&mut self, va: u32) -> Result<u32, BusFault> {
        let pa = self.translate(va)?;
        self.read_word_unaligned(pa)
    }

    pub fn store_byte(&mut self, va: u32, val: u8) -> Result<(), BusFault> {
        let pa = self.translate(va)?;
        self.write_byte(pa, val)
    }

    pub fn store_half(&mut self, va: u32, val: u16) -> Result<(), BusFault> {
        let pa = self.translate(va)?;
        self.write_half(pa, val)
    }

    pub fn store_word(&mut self, va: u32, val: u32) -> Result<(), BusFault> {
        let pa = self.translate(va)?;
        self.write_word(pa, val)
    }
}

const fn half_of(word: u32, pa: u32) -> u16 {
    if pa & 2 != 0 {
        word as u16
    } else {
        (word >> 16) as u16
    }
}

#[cfg(test)]
fn make_bus() -> Bus {
    Bus::new(&MemoryConfiguration::default())
}

#[test]
fn test_ram_byte_order_is_big_endian() {
    let mut bus = make_bus();
    bus.write_word(RAM_BASE, 0x1122_3344).unwrap();
    assert_eq!(bus.read_byte(RAM_BASE).unwrap(), 0x11);
    assert_eq!(bus.read_byte(RAM_BASE + 1).unwrap(), 0x22);
    assert_eq!(bus.read_byte(RAM_BASE + 2).unwrap(), 0x33);
    assert_eq!(bus.read_byte(RAM_BASE + 3).unwrap(), 0x44);
    assert_eq!(bus.read_half(RAM_BASE).unwrap(), 0x1122);
    assert_eq!(bus.read_half(RAM_BASE + 2).unwrap(), 0x3344);
}

#[test]
fn test_partial_stores_merge_into_word() {
    let mut bus = make_bus();
    bus.write_word(RAM_BASE, 0xffff_ffff).unwrap();
    bus.write_byte(RAM_BASE + 1, 0xab).unwrap();
    assert_eq!(bus.read_word(RAM_BASE).unwrap(), 0xffab_ffff);
    bus.write_half(RAM_BASE + 2, 0x1234).unwrap();
    assert_eq!(bus.read_word(RAM_BASE).unwrap(), 0xffab_1234);
}

#[test]
fn test_misaligned_word_access_faults() {
    let mut bus = make_bus();
    assert_eq!(
        bus.read_word(RAM_BASE + 2),
        Err(BusFault::Misaligned {
            address: RAM_BASE + 2,
            width: AccessWidth::Word,
        })
    );
    assert_eq!(
        bus.write_half(RAM_BASE + 1, 0),
        Err(BusFault::Misaligned {
            address: RAM_BASE + 1,
            width: AccessWidth::Half,
        })
    );
    // The tolerant variant reads the containing word.
    bus.write_word(RAM_BASE, 0xdead_beef).unwrap();
    assert_eq!(bus.read_word_unaligned(RAM_BASE + 2).unwrap(), 0xdead_beef);
}

#[test]
fn test_rom_is_read_only() {
    let mut bus = make_bus();
    bus.load_rom(&[0x10, 0x20, 0x30, 0x40]).unwrap();
    assert_eq!(bus.read_word(0).unwrap(), 0x1020_3040);
    assert_eq!(bus.read_byte(2).unwrap(), 0x30);
    assert_eq!(bus.write_word(0, 0), Err(BusFault::ReadOnly(0)));
    assert_eq!(bus.write_byte(1, 0), Err(BusFault::ReadOnly(1)));
    // The dropped store left the image intact.
    assert_eq!(bus.read_word(0).unwrap(), 0x1020_3040);
}

#[test]
fn test_oversized_rom_image_rejected() {
    let mut bus = make_bus();
    let image = vec![0u8; ROM_SIZE as usize + 1];
    assert_eq!(
        bus.load_rom(&image),
        Err(RomImageError::TooLarge {
            len: ROM_SIZE as usize + 1,
        })
    );
}

#[test]
fn test_unmapped_addresses_fault() {
    let mut bus = make_bus();
    // The gap between ROM and the on-board IO window.
    assert_eq!(bus.read_word(0x0001_0000), Err(BusFault::Unmapped(0x0001_0000)));
    // Just past the end of a full RAM population.
    let past = RAM_BASE + RamSize::Mb4.bytes();
    assert_eq!(bus.write_word(past, 0), Err(BusFault::Unmapped(past)));
}

#[test]
fn test_ram_size_bounds_memory() {
    let mut bus = Bus::new(&MemoryConfiguration {
        ram_size: RamSize::Kb512,
    });
    let last = RAM_BASE + RamSize::Kb512.bytes() - 4;
    bus.write_word(last, 7).unwrap();
    assert_eq!(bus.read_word(last).unwrap(), 7);
    assert_eq!(bus.read_word(last + 4), Err(BusFault::Unmapped(last + 4)));
}

#[test]
fn test_memsize_register_reports_population() {
    for (size, code) in [
        (RamSize::Kb512, 0),
        (RamSize::Mb1, 2),
        (RamSize::Mb2, 1),
        (RamSize::Mb4, 3),
    ] {
        let mut bus = Bus::new(&MemoryConfiguration { ram_size: size });
        assert_eq!(bus.read_byte(MEMSIZE_REGISTER).unwrap(), code);
    }
}

#[test]
fn test_io_board_window_reads_probe_codes() {
    let mut bus = make_bus();
    assert_eq!(bus.read_byte(0x0020_0000).unwrap(), 0x00);
    assert_eq!(bus.read_byte(0x0020_0001).unwrap(), 0x03);
    assert_eq!(bus.read_byte(0x0040_0000).unwrap(), 0x00);
    assert_eq!(bus.read_byte(0x0040_0001).unwrap(), 0x05);
    assert_eq!(bus.read_word(0x0080_0000).unwrap(), 0);
    // Writes into the window are dropped without fault.
    bus.write_word(0x0080_0000, 0xffff_ffff).unwrap();
    assert_eq!(bus.read_word(0x0080_0000).unwrap(), 0);
}

#[test]
fn test_registered_device_claims_window() {
    struct Latch {
        value: u32,
    }

    impl Device for Latch {
        fn name(&self) -> &str {
            "latch"
        }
        fn read(&mut self, _pa: u32, _width: AccessWidth) -> u32 {
            self.value
        }
        fn write(&mut self, _pa: u32, val: u32, _width: AccessWidth) {
            self.value = val;
        }
    }

    let mut bus = make_bus();
    bus.add_device(0x0004_2000, 0x100, Box::new(Latch { value: 0x55 }));
    assert_eq!(bus.read_word(0x0004_2000).unwrap(), 0x55);
    bus.write_word(0x0004_2004, 0x99).unwrap();
    assert_eq!(bus.read_byte(0x0004_2008).unwrap(), 0x99);
    // Outside the claimed window the on-board IO page faults.
    assert_eq!(
        bus.read_word(0x0004_3000),
        Err(BusFault::Unmapped(0x0004_3000))
    );
}

#[test]
fn test_device_service_raises_interrupts() {
    struct Ticker;

    impl Device for Ticker {
        fn name(&self) -> &str {
            "ticker"
        }
        fn read(&mut self, _pa: u32, _width: AccessWidth) -> u32 {
            0
        }
        fn write(&mut self, _pa: u32, _val: u32, _width: AccessWidth) {}
        fn service(&mut self, irq: &mut IrqLine) {
            irq.raise(IrqRequest {
                ipl: 12,
                id: 3,
                nmi: false,
            });
        }
    }

    let mut bus = make_bus();
    bus.add_device(0x0004_2000, 0x100, Box::new(Ticker));
    assert!(!bus.irq().is_pending());
    bus.service_devices();
    assert_eq!(
        bus.irq_mut().take(),
        Some(IrqRequest {
            ipl: 12,
            id: 3,
            nmi: false,
        })
    );
}

#[test]
fn test_irq_line_drops_requests_while_pending() {
    let mut line = IrqLine::default();
    line.raise(IrqRequest {
        ipl: 8,
        id: 1,
        nmi: false,
    });
    line.raise(IrqRequest {
        ipl: 15,
        id: 2,
        nmi: true,
    });
    assert_eq!(
        line.take(),
        Some(IrqRequest {
            ipl: 8,
            id: 1,
            nmi: false,
        })
    );
    assert_eq!(line.take(), None);
}

#[test]
fn test_ram_size_parsing() {
    assert_eq!("512k".parse::<RamSize>(), Ok(RamSize::Kb512));
    assert_eq!("4M".parse::<RamSize>(), Ok(RamSize::Mb4));
    assert_eq!("1mb".parse::<RamSize>(), Ok(RamSize::Mb1));
    assert!("3M".parse::<RamSize>().is_err());
}
