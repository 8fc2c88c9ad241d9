//! The 64 KiB VIC-20 address space and MMIO dispatch, per spec.md §4.1.
//!
//! Every cell defaults to {read backing-RAM, write backing-RAM}. Devices and
//! the memory model install closures over specific addresses after
//! construction, per the "cyclic cartridge-/machine-/device references" note
//! in spec.md §9: the bus never holds a reference to a device, only to a
//! closure that itself owns a clone of the device's `Rc<RefCell<_>>`.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::constants::memory_range;
use crate::rom::MemoryModel;

const MEMORY_SIZE: usize = 0x1_0000;

type ReadHook = Box<dyn Fn(&[u8; MEMORY_SIZE]) -> u8>;
type WriteHook = Box<dyn FnMut(&mut [u8; MEMORY_SIZE], u8)>;

/// Shared-ownership handle used by every device that needs to read or write
/// the bus. Mirrors the teacher's `SharedBus = Rc<RefCell<Bus>>` pattern.
pub type SharedBus = Rc<RefCell<Bus>>;

/// Ranges a memory model makes writable beyond the always-populated
/// zero-page/stack/main-RAM region, per spec.md §6's memory map.
fn writable_expansion_ranges(model: MemoryModel) -> &'static [memory_range::Range] {
    use memory_range::{BLK1, BLK2, BLK3, RAM1, RAM2, RAM3};
    match model {
        MemoryModel::Unexpanded => &[],
        MemoryModel::Expanded3k => {
            const R: [memory_range::Range; 3] = [RAM1, RAM2, RAM3];
            &R
        }
        MemoryModel::Expanded8k => {
            const R: [memory_range::Range; 4] = [RAM1, RAM2, RAM3, BLK1];
            &R
        }
        MemoryModel::Expanded16k => {
            const R: [memory_range::Range; 5] = [RAM1, RAM2, RAM3, BLK1, BLK2];
            &R
        }
        MemoryModel::Expanded24k | MemoryModel::Expanded32k | MemoryModel::Expanded35k => {
            const R: [memory_range::Range; 6] = [RAM1, RAM2, RAM3, BLK1, BLK2, BLK3];
            &R
        }
        MemoryModel::Test => {
            const R: [memory_range::Range; 1] = [memory_range::KERNAL_ROM];
            &R
        }
    }
}

/// Flat 64 KiB address space with per-address read/write dispatch.
pub struct Bus {
    ram: Box<[u8; MEMORY_SIZE]>,
    read_hooks: Vec<Option<ReadHook>>,
    write_hooks: Vec<Option<WriteHook>>,
}

impl Bus {
    pub fn new(model: MemoryModel) -> SharedBus {
        let mut bus = Bus {
            ram: Box::new([0u8; MEMORY_SIZE]),
            read_hooks: (0..MEMORY_SIZE).map(|_| None).collect(),
            write_hooks: (0..MEMORY_SIZE).map(|_| None).collect(),
        };
        bus.install_memory_model(model);
        Rc::new(RefCell::new(bus))
    }

    fn install_memory_model(&mut self, model: MemoryModel) {
        // Everything outside the always-populated RAM region is unwritable
        // (writeNull) unless the model explicitly opens it.
        for range in [
            memory_range::BLK1,
            memory_range::BLK2,
            memory_range::BLK3,
            memory_range::RAM1,
            memory_range::RAM2,
            memory_range::RAM3,
        ] {
            self.install_write_null(range.min, range.max);
        }
        for range in [
            memory_range::CHARACTER_ROM,
            memory_range::BLK5,
            memory_range::BASIC_ROM,
            memory_range::KERNAL_ROM,
        ] {
            self.install_write_null(range.min, range.max);
        }
        for range in writable_expansion_ranges(model) {
            self.install_write_ram(range.min, range.max);
        }
    }

    /// Installs a handler that silently discards writes across `min..=max`,
    /// per spec.md §3: "Writes to unmapped regions are silently discarded."
    pub fn install_write_null(&mut self, min: u16, max: u16) {
        for addr in min..=max {
            self.write_hooks[addr as usize] = Some(Box::new(|_ram, _value| {}));
        }
    }

    /// Restores the default backing-RAM write behavior across `min..=max`.
    pub fn install_write_ram(&mut self, min: u16, max: u16) {
        for addr in min..=max {
            self.write_hooks[addr as usize] = None;
        }
    }

    /// Installs device MMIO over `min..=max`. `read`/`write` close over the
    /// device's own `Rc<RefCell<_>>`; the bus never stores the device itself.
    pub fn install_device(
        &mut self,
        min: u16,
        max: u16,
        read: impl Fn(u16) -> u8 + 'static,
        write: impl Fn(u16, u8) + 'static,
    ) {
        let read = Rc::new(read);
        let write = Rc::new(write);
        for addr in min..=max {
            let r = Rc::clone(&read);
            self.read_hooks[addr as usize] = Some(Box::new(move |_ram| r(addr)));
            let w = Rc::clone(&write);
            self.write_hooks[addr as usize] = Some(Box::new(move |_ram, value| w(addr, value)));
        }
    }

    #[inline]
    pub fn read_u8(&self, addr: u16) -> u8 {
        match &self.read_hooks[addr as usize] {
            Some(hook) => hook(&self.ram),
            None => self.ram[addr as usize],
        }
    }

    #[inline]
    pub fn write_u8(&mut self, addr: u16, value: u8) {
        trace!("bus write {addr:#06x} = {value:#04x}");
        // SAFETY-free workaround for borrowing `self.ram` mutably while also
        // borrowing `self.write_hooks`: hooks are taken, invoked, then put back.
        if let Some(mut hook) = self.write_hooks[addr as usize].take() {
            hook(&mut self.ram, value);
            self.write_hooks[addr as usize] = Some(hook);
        } else {
            self.ram[addr as usize] = value;
        }
    }

    /// Little-endian 16-bit read. Per spec.md §4.1, the high byte address
    /// wraps modulo 0x10000 rather than panicking at the top of memory.
    #[inline]
    pub fn read_u16(&self, addr: u16) -> u16 {
        let lo = self.read_u8(addr);
        let hi = self.read_u8(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    #[inline]
    pub fn write_u16(&mut self, addr: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_u8(addr, lo);
        self.write_u8(addr.wrapping_add(1), hi);
    }

    /// Installs `bytes` starting at `offset`, bypassing write hooks — used for
    /// ROM/cartridge installation, not ordinary CPU stores.
    pub fn load_block(&mut self, offset: u16, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            let addr = offset.wrapping_add(i as u16);
            self.ram[addr as usize] = b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_write_is_discarded() {
        let bus = Bus::new(MemoryModel::Unexpanded);
        bus.borrow_mut().write_u8(memory_range::KERNAL_ROM.min, 0xAA);
        assert_eq!(bus.borrow().read_u8(memory_range::KERNAL_ROM.min), 0);
    }

    #[test]
    fn test_model_allows_writing_kernal_region() {
        let bus = Bus::new(MemoryModel::Test);
        bus.borrow_mut().write_u8(memory_range::KERNAL_ROM.min, 0xAA);
        assert_eq!(bus.borrow().read_u8(memory_range::KERNAL_ROM.min), 0xAA);
    }

    #[test]
    fn word_read_wraps_at_top_of_memory() {
        let bus = Bus::new(MemoryModel::Test);
        {
            let mut b = bus.borrow_mut();
            b.ram[0xFFFF] = 0x34;
            b.ram[0x0000] = 0x12;
        }
        assert_eq!(bus.borrow().read_u16(0xFFFF), 0x1234);
    }

    #[test]
    fn device_mmio_dispatch_round_trips() {
        let bus = Bus::new(MemoryModel::Unexpanded);
        let last_write = Rc::new(RefCell::new(0u8));
        let lw = Rc::clone(&last_write);
        bus.borrow_mut().install_device(
            0x9000,
            0x900F,
            |_addr| 0x42,
            move |_addr, value| *lw.borrow_mut() = value,
        );
        assert_eq!(bus.borrow().read_u8(0x9000), 0x42);
        bus.borrow_mut().write_u8(0x9005, 0x7F);
        assert_eq!(*last_write.borrow(), 0x7F);
    }
}
