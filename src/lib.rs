pub mod bus;
pub mod constants;
pub mod cpu;
pub mod error;
pub mod machine;
pub mod rom;
pub mod via;
pub mod vic;

pub use bus::{Bus, SharedBus};
pub use cpu::Cpu;
pub use error::{ConfigError, CpuFault, DebugError};
pub use machine::{Machine, MachineState};
pub use rom::{Cartridge, MemoryModel, Region, RomSet};
pub use via::Via;
pub use vic::{Vic, VideoStandard, VoiceSwitch};
