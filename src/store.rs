//! The persistent-storage collaborator contract.
//!
//! The core never talks to a memory device directly. Everything it needs
//! from persistence goes through [`Store`]; the real EEPROM driver implements
//! this trait in the firmware, and [`RamStore`] serves the test suite (and
//! stands in on boards without storage wired up yet).

use crate::config::Configuration;
use crate::scale::{Scale, NUM_BANKS};

/// What the core consumes from persistent storage.
pub trait Store {
    /// The stored configuration, or `None` when storage is uninitialized,
    /// carries a stale version marker, or a factory reset was requested.
    /// The core then falls back to the built-in defaults and persists them
    /// immediately; the fallback is authoritative, no retry is needed.
    fn load_configuration(&mut self) -> Option<Configuration>;

    fn save_configuration(&mut self, config: &Configuration);

    /// Scale preset `bank` (0..=11). Unwritten banks read as empty.
    fn load_scale_bank(&mut self, bank: u8) -> Scale;

    fn save_scale_bank(&mut self, bank: u8, scale: Scale);

    /// Bit `b` set iff bank `b` holds at least one allowed note.
    fn scale_bank_occupancy_mask(&mut self) -> u16;
}

/// A volatile [`Store`].
pub struct RamStore {
    version: Option<u8>,
    config: Configuration,
    banks: [Scale; NUM_BANKS],
}

impl RamStore {
    /// `RamStore::uninitialized()` behaves like a blank memory device: the
    /// first configuration load reports nothing stored.
    pub fn uninitialized() -> Self {
        Self {
            version: None,
            config: Configuration::default(),
            banks: [Scale::empty(); NUM_BANKS],
        }
    }
}

impl Store for RamStore {
    fn load_configuration(&mut self) -> Option<Configuration> {
        match self.version {
            Some(CONFIG_VERSION) => Some(self.config),
            _ => None,
        }
    }

    fn save_configuration(&mut self, config: &Configuration) {
        self.config = *config;
        self.version = Some(CONFIG_VERSION);
    }

    fn load_scale_bank(&mut self, bank: u8) -> Scale {
        self.banks[usize::from(bank) % NUM_BANKS]
    }

    fn save_scale_bank(&mut self, bank: u8, scale: Scale) {
        self.banks[usize::from(bank) % NUM_BANKS] = scale;
    }

    fn scale_bank_occupancy_mask(&mut self) -> u16 {
        let mut mask = 0;
        for (i, bank) in self.banks.iter().enumerate() {
            if !bank.is_empty() {
                mask |= 1 << i;
            }
        }
        mask
    }
}

/// Version marker of the stored configuration image. Bump on layout changes;
/// mismatching storage reads as uninitialized.
pub const CONFIG_VERSION: u8 = 1;
