//! The device contract and the raw LEEP backend.
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use leep_protocol::{Pair, rom::RomInfo, schema::RegisterInfo};

use crate::{
    access::{ReadPlan, Value, write_pairs},
    acquire::{self, AcqConfig, Snapshot, WaitOptions},
    config::Config,
    error::Result,
    regmap::{RegisterMap, Token},
    sequencer::{Instruction, assemble},
    transport::Transport,
};

/// Named register access.
///
/// Every method taking an `instance` resolves register names with the handle's default
/// instance followed by `instance`.
pub trait RegisterAccess {
    fn register_map(&self) -> &RegisterMap;

    /// Instance tokens applied before the tokens of every call
    fn default_instance(&self) -> &[Token] {
        &[]
    }

    fn qualify(&self, instance: &[Token]) -> Vec<Token> {
        self.default_instance()
            .iter()
            .chain(instance)
            .cloned()
            .collect()
    }

    /// Writes all `ops` in one batch.
    fn reg_write(&mut self, ops: &[(&str, Value)], instance: &[Token]) -> Result<()>;

    /// Reads all `names` in one batch, returning one value per name.
    fn reg_read(&mut self, names: &[&str], instance: &[Token]) -> Result<Vec<Value>>;

    fn get_reg_info(&self, name: &str, instance: &[Token]) -> Result<RegisterInfo> {
        self.register_map()
            .get_reg_info(name, &self.qualify(instance))
            .cloned()
    }
}

/// Operations every device backend provides on top of register access.
///
/// The default implementations only use [`RegisterAccess`].
pub trait Device: RegisterAccess {
    /// Register names and constants of the acquisition engine
    fn acquisition(&self) -> &AcqConfig;

    /// Enables exactly the channels in `chans`.
    fn set_channel_mask(&mut self, chans: &[usize], instance: &[Token]) -> Result<()> {
        let acq = self.acquisition().clone();
        acquire::set_channel_mask(self, &acq, chans, instance)
    }

    /// Sets the waveform decimation ratio, 1 to 255.
    fn set_decimate(&mut self, ratio: u32, instance: &[Token]) -> Result<()> {
        let acq = self.acquisition().clone();
        acquire::set_decimate(self, &acq, ratio, instance)
    }

    /// Waits for the next acquisition, see [`acquire::wait_for_acq`].
    fn wait_for_acq(&mut self, options: &WaitOptions, instance: &[Token]) -> Result<Snapshot> {
        let acq = self.acquisition().clone();
        acquire::wait_for_acq(self, &acq, options, instance)
    }

    /// The scaled waveforms of `chans`, in the order given.
    fn get_channels(&mut self, chans: &[usize], instance: &[Token]) -> Result<Vec<Vec<f64>>> {
        let acq = self.acquisition().clone();
        acquire::get_channels(self, &acq, chans, instance)
    }

    /// Sample times in seconds matching [`Device::get_channels`].
    fn get_timebase(&mut self, chans: &[usize], instance: &[Token]) -> Result<Vec<Vec<f64>>> {
        let acq = self.acquisition().clone();
        acquire::get_timebase(self, &acq, chans, instance)
    }

    /// Assembles `program` and writes it to the sequencer register `target`.
    fn load_sequence(
        &mut self,
        target: &str,
        program: &[Instruction],
        instance: &[Token],
    ) -> Result<()> {
        let words = assemble(self.register_map(), target, program, &self.qualify(instance))?;
        self.reg_write(&[(target, Value::from(words))], instance)
    }

    /// The decoded ROM, for backends which bootstrap from one
    fn rom_info(&self) -> Option<&RomInfo> {
        None
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A device reached through the raw UDP protocol.
pub struct LeepDevice {
    transport: Transport,
    map: RegisterMap,
    rom: RomInfo,
    instance: Vec<Token>,
    acq: AcqConfig,
}

impl LeepDevice {
    /// Connects to `addr` and loads the register map from the device ROM.
    pub fn connect(addr: impl ToSocketAddrs, config: Config) -> Result<LeepDevice> {
        let mut transport = Transport::connect(addr, &config)?;
        let raw = transport.read(RomInfo::addresses())?;
        let rom = RomInfo::decode(&raw)?;
        let map = RegisterMap::from_json(&rom.schema)?;
        log::info!(
            "Connected to {} ({} registers, schema hash {})",
            transport.dest(),
            map.schema().len(),
            rom.schema_hash.as_deref().unwrap_or("<none>")
        );
        Ok(LeepDevice {
            transport,
            map,
            rom,
            instance: config.instance,
            acq: config.acquisition,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.transport.dest()
    }

    pub fn rom(&self) -> &RomInfo {
        &self.rom
    }

    /// Firmware description text from the ROM
    pub fn description(&self) -> Option<&str> {
        self.rom.description.as_deref()
    }

    pub fn schema_hash(&self) -> Option<&str> {
        self.rom.schema_hash.as_deref()
    }

    pub fn firmware_hash(&self) -> Option<&str> {
        self.rom.firmware_hash.as_deref()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.transport.set_timeout(timeout);
    }

    /// Exchanges raw address/value pairs.
    pub fn exchange(&mut self, pairs: &[Pair]) -> Result<Vec<u32>> {
        self.transport.exchange(pairs)
    }
}

impl RegisterAccess for LeepDevice {
    fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    fn default_instance(&self) -> &[Token] {
        &self.instance
    }

    fn reg_write(&mut self, ops: &[(&str, Value)], instance: &[Token]) -> Result<()> {
        let pairs = write_pairs(&self.map, ops, &self.qualify(instance))?;
        self.transport.exchange(&pairs)?;
        Ok(())
    }

    fn reg_read(&mut self, names: &[&str], instance: &[Token]) -> Result<Vec<Value>> {
        let plan = ReadPlan::new(&self.map, names, &self.qualify(instance))?;
        let raw = self.transport.exchange(&plan.pairs())?;
        plan.split(&raw)
    }
}

impl Device for LeepDevice {
    fn acquisition(&self) -> &AcqConfig {
        &self.acq
    }

    fn rom_info(&self) -> Option<&RomInfo> {
        Some(&self.rom)
    }

    fn close(&mut self) -> Result<()> {
        log::debug!("Closing connection to {}", self.transport.dest());
        Ok(())
    }
}
