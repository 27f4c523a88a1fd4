//! # Register File Backend
//!
//! Storage for every register of a schema. The ROM window serves an image describing
//! the same schema, so clients can bootstrap from the simulated device like from a real
//! one.
//!
//! ## Example Usage
//!
//! ```ignore
//! use leep_sim::backends::regfile::RegisterFile;
//! use leep_sim::server::{Config, Server};
//!
//! let regs = RegisterFile::from_json(&json, "simulated device")?;
//! let server = Server::new(regs, Config::default());
//! ```
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use leep_protocol::{
    rom::{ROM_BASE, ROM_WORDS, RomBuilder, RomInfo},
    schema::{RegisterInfo, Schema},
};

use crate::{RegisterBackend, error::SimError};

#[derive(Debug)]
struct Slot {
    end: u32,
    mask: u32,
}

#[derive(Debug)]
pub struct RegisterFile {
    schema: Schema,
    rom: Vec<u32>,
    /// Keyed by base address
    layout: BTreeMap<u32, Slot>,
    storage: Mutex<HashMap<u32, u32>>,
}

fn data_mask(info: &RegisterInfo) -> u32 {
    if info.data_width >= 32 {
        u32::MAX
    } else {
        (1u32 << info.data_width) - 1
    }
}

impl RegisterFile {
    /// Creates zeroed registers for `schema`, serving `rom` in the ROM window.
    pub fn new(schema: Schema, mut rom: Vec<u32>) -> Result<RegisterFile, SimError> {
        rom.resize(ROM_WORDS, 0);
        let rom_window = RomInfo::addresses();

        let mut layout: BTreeMap<u32, Slot> = BTreeMap::new();
        for info in schema.iter() {
            let range = info.addresses();
            let conflict = rom_window.contains(&range.start)
                || range.contains(&rom_window.start)
                || layout
                    .range(..range.end)
                    .next_back()
                    .is_some_and(|(_, slot)| slot.end > range.start);
            if conflict {
                return Err(SimError::AddressConflict {
                    name: info.name.clone(),
                    addr: range.start,
                });
            }
            layout.insert(
                range.start,
                Slot {
                    end: range.end,
                    mask: data_mask(info),
                },
            );
        }

        Ok(RegisterFile {
            schema,
            rom,
            layout,
            storage: Mutex::new(HashMap::new()),
        })
    }

    /// Creates registers for the JSON `schema` with a ROM carrying the schema and
    /// `description`.
    pub fn from_json(json: &str, description: &str) -> Result<RegisterFile, SimError> {
        let schema = Schema::from_json(json)?;
        let rom = RomBuilder::new().text(description).schema(json)?.build()?;
        log::debug!(
            "Built ROM for {} registers ({} words)",
            schema.len(),
            ROM_WORDS
        );
        RegisterFile::new(schema, rom)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn info(&self, name: &str) -> Result<&RegisterInfo, SimError> {
        self.schema
            .get(name)
            .ok_or_else(|| SimError::MissingRegister(format!("No register named {}", name)))
    }

    fn slot(&self, addr: u32) -> Option<&Slot> {
        self.layout
            .range(..=addr)
            .next_back()
            .map(|(_, slot)| slot)
            .filter(|slot| addr < slot.end)
    }

    /// Stores `values` starting at the first element of `info`.
    pub fn store(&self, info: &RegisterInfo, values: impl IntoIterator<Item = u32>) {
        let mask = data_mask(info);
        let Ok(mut storage) = self.storage.lock() else {
            return;
        };
        for (addr, value) in info.addresses().zip(values) {
            storage.insert(addr, value & mask);
        }
    }

    /// The contents of every element of `info`.
    pub fn load(&self, info: &RegisterInfo) -> Vec<u32> {
        match self.storage.lock() {
            Ok(storage) => info
                .addresses()
                .map(|addr| storage.get(&addr).copied().unwrap_or(0))
                .collect(),
            Err(_) => vec![0; info.len()],
        }
    }
}

impl RegisterBackend for RegisterFile {
    fn read(&self, addr: u32) -> u32 {
        if RomInfo::addresses().contains(&addr) {
            return self.rom[(addr - ROM_BASE) as usize];
        }
        if self.slot(addr).is_none() {
            log::error!("Read of unknown address {:06x}", addr);
            return 0;
        }
        self.storage
            .lock()
            .map(|storage| storage.get(&addr).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn write(&self, addr: u32, value: u32) {
        if RomInfo::addresses().contains(&addr) {
            log::warn!("Ignoring write to ROM address {:06x}", addr);
            return;
        }
        let Some(slot) = self.slot(addr) else {
            log::error!("Write of unknown address {:06x}", addr);
            return;
        };
        if let Ok(mut storage) = self.storage.lock() {
            storage.insert(addr, value & slot.mask);
        }
    }
}
