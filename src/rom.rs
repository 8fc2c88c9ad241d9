//! ROM roles, cartridge loading, and the memory-expansion model, per
//! spec.md §6 and the "Supplemental features" of SPEC_FULL.md §10.
//!
//! ROM *archive* parsing (the zip + `index.json` format of spec.md §6) is an
//! external collaborator's concern and explicitly out of scope (§1); this
//! module only consumes already-decoded byte slices through [`RomSet`].

use log::{debug, warn};

use crate::bus::SharedBus;
use crate::constants::{memory_range, rom_load_address};
use crate::error::ConfigError;

/// Which 8 KiB blocks of the unexpanded memory map become writable RAM.
/// Spec.md §3/§6: "Memory model selects which 8 KiB blocks are writable."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryModel {
    Unexpanded,
    Expanded3k,
    Expanded8k,
    Expanded16k,
    Expanded24k,
    Expanded32k,
    Expanded35k,
    /// All RAM, used by CPU-only test harnesses (spec.md §8 S4).
    Test,
}

impl std::str::FromStr for MemoryModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unexpanded" => Ok(MemoryModel::Unexpanded),
            "+3k" | "3k" => Ok(MemoryModel::Expanded3k),
            "+8k" | "8k" => Ok(MemoryModel::Expanded8k),
            "+16k" | "16k" => Ok(MemoryModel::Expanded16k),
            "+24k" | "24k" => Ok(MemoryModel::Expanded24k),
            "+32k" | "32k" => Ok(MemoryModel::Expanded32k),
            "+35k" | "35k" => Ok(MemoryModel::Expanded35k),
            "test" => Ok(MemoryModel::Test),
            other => Err(ConfigError::InvalidExpansionTag(other.to_string())),
        }
    }
}

/// Video region a [`RomSet`] supplies a kernal image for. Spec.md §6 lists
/// `default|ntsc|pal|japan|denmark|sweden`; the emulation core only cares
/// about the PAL/NTSC split that also selects [`crate::vic::VideoStandard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Pal,
    Ntsc,
}

/// Collaborator contract the Machine consumes for boot ROM bytes. Spec.md §6
/// requires "at least PAL kernal, NTSC kernal, default BASIC, and default
/// character ROMs" in a valid package; this trait is the in-process shape of
/// that requirement once archive parsing has already happened upstream.
pub trait RomSet {
    fn character(&self) -> &[u8];
    fn basic(&self) -> &[u8];
    fn kernal(&self, region: Region) -> Option<&[u8]>;
}

/// Raw cartridge image: `[load_lo, load_hi, payload...]`, per spec.md §6.
pub struct Cartridge {
    pub load_address: u16,
    pub payload: Vec<u8>,
}

impl Cartridge {
    /// Parses a raw cartridge image. Returns [`ConfigError::EmptyCartridge`]
    /// if the image doesn't even carry a load address.
    pub fn from_image(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() < 2 {
            return Err(ConfigError::EmptyCartridge);
        }
        let load_address = u16::from_le_bytes([bytes[0], bytes[1]]);
        let payload = bytes[2..].to_vec();
        let max_len = memory_range::BLK5.len() as usize;
        if payload.len() > max_len {
            return Err(ConfigError::CartridgeTooLarge(payload.len()));
        }
        Ok(Cartridge { load_address, payload })
    }

    /// True when this image autoboots rather than needing the BASIC
    /// bootstrap keystroke injection, per spec.md §4.5.
    pub fn is_autoboot(&self) -> bool {
        self.load_address == rom_load_address::AUTOBOOT_CARTRIDGE
    }
}

/// Installs the fixed boot ROMs plus an optional cartridge onto `bus`, per
/// spec.md §4.5. Returns the keystrokes to inject (if any) so the caller
/// (the Machine) can drive the bootstrap through its own tick loop.
pub fn install_rom_set(
    bus: &SharedBus,
    roms: &dyn RomSet,
    region: Region,
    cartridge: Option<&Cartridge>,
) -> Result<(), ConfigError> {
    let kernal = roms
        .kernal(region)
        .ok_or(ConfigError::MissingRom("kernal"))?;
    if roms.character().is_empty() {
        return Err(ConfigError::MissingRom("character"));
    }
    if roms.basic().is_empty() {
        return Err(ConfigError::MissingRom("basic"));
    }

    let mut b = bus.borrow_mut();
    b.load_block(rom_load_address::CHARACTER, roms.character());
    b.load_block(rom_load_address::BASIC, roms.basic());
    b.load_block(rom_load_address::KERNAL, kernal);
    debug!("installed ROM set for region {region:?}");

    if let Some(cart) = cartridge {
        if cart.load_address >= memory_range::BLK5.min
            && cart.load_address + cart.payload.len() as u16 > memory_range::BLK5.max + 1
        {
            warn!(
                "cartridge at {:#06x} overruns BLK5 and will collide with adjacent ROM",
                cart.load_address
            );
        }
        b.load_block(cart.load_address, &cart.payload);
        debug!("installed cartridge at {:#06x}", cart.load_address);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    struct FixedRomSet {
        character: Vec<u8>,
        basic: Vec<u8>,
        kernal_pal: Vec<u8>,
    }

    impl RomSet for FixedRomSet {
        fn character(&self) -> &[u8] {
            &self.character
        }
        fn basic(&self) -> &[u8] {
            &self.basic
        }
        fn kernal(&self, region: Region) -> Option<&[u8]> {
            match region {
                Region::Pal => Some(&self.kernal_pal),
                Region::Ntsc => None,
            }
        }
    }

    #[test]
    fn cartridge_autoboot_detection() {
        let mut image = vec![0x00, 0xA0];
        image.extend_from_slice(&[0xEA; 4]);
        let cart = Cartridge::from_image(&image).unwrap();
        assert!(cart.is_autoboot());
        assert_eq!(cart.payload, vec![0xEA; 4]);
    }

    #[test]
    fn empty_cartridge_is_rejected() {
        assert!(matches!(
            Cartridge::from_image(&[]),
            Err(ConfigError::EmptyCartridge)
        ));
    }

    #[test]
    fn missing_kernal_region_is_a_config_error() {
        let roms = FixedRomSet {
            character: vec![0u8; 0x1000],
            basic: vec![0u8; 0x2000],
            kernal_pal: vec![0u8; 0x2000],
        };
        let bus = Bus::new(MemoryModel::Unexpanded);
        let err = install_rom_set(&bus, &roms, Region::Ntsc, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRom("kernal")));
    }

    #[test]
    fn install_rom_set_loads_fixed_addresses() {
        let roms = FixedRomSet {
            character: vec![0x11u8; 0x1000],
            basic: vec![0x22u8; 0x2000],
            kernal_pal: vec![0x33u8; 0x2000],
        };
        let bus = Bus::new(MemoryModel::Unexpanded);
        install_rom_set(&bus, &roms, Region::Pal, None).unwrap();
        assert_eq!(bus.borrow().read_u8(rom_load_address::CHARACTER), 0x11);
        assert_eq!(bus.borrow().read_u8(rom_load_address::BASIC), 0x22);
        assert_eq!(bus.borrow().read_u8(rom_load_address::KERNAL), 0x33);
    }
}
