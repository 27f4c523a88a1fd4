//! Opening devices by address and tracking open handles.
use std::collections::BTreeMap;

use leep_protocol::DEFAULT_PORT;

use crate::{
    config::Config,
    device::{Device, LeepDevice},
    error::{Error, Result},
};

pub const LEEP_SCHEME: &str = "leep://";
pub const CA_SCHEME: &str = "ca://";

/// Splits `host[:port]`, accepting bracketed IPv6 hosts.
fn host_port(addr: &str) -> Result<(String, u16)> {
    let invalid = || Error::InvalidArgument(format!("Invalid device address '{}'", addr));
    let (host, port) = match addr.strip_prefix('[') {
        Some(rest) => {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
            }
        }
        None => match addr.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        },
    };
    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}

/// Opens the device at `uri`.
///
/// `leep://host[:port]` connects through the raw protocol. `ca://` addresses name a
/// device published on a process control bus, which this crate does not implement.
pub fn open(uri: &str, config: Config) -> Result<Box<dyn Device>> {
    if let Some(addr) = uri.strip_prefix(LEEP_SCHEME) {
        let (host, port) = host_port(addr)?;
        log::debug!("Opening {}:{}", host, port);
        Ok(Box::new(LeepDevice::connect((host.as_str(), port), config)?))
    } else if uri.starts_with(CA_SCHEME) {
        Err(Error::UnsupportedBackend(uri.to_string()))
    } else {
        Err(Error::InvalidArgument(format!(
            "Unknown device address '{}', must begin with {} or {}",
            uri, CA_SCHEME, LEEP_SCHEME
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u64);

/// Owns every device opened through it and closes them together.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<DeviceId, Box<dyn Device>>,
    next: u64,
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry::default()
    }

    /// Opens `uri` and keeps the handle.
    pub fn open(&mut self, uri: &str, config: Config) -> Result<DeviceId> {
        let device = open(uri, config)?;
        Ok(self.insert(device))
    }

    /// Takes ownership of an already opened device.
    pub fn insert(&mut self, device: Box<dyn Device>) -> DeviceId {
        let id = DeviceId(self.next);
        self.next += 1;
        self.devices.insert(id, device);
        id
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut (dyn Device + 'static)> {
        self.devices.get_mut(&id).map(|device| device.as_mut())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Closes and forgets a single device.
    pub fn close(&mut self, id: DeviceId) -> Result<()> {
        match self.devices.remove(&id) {
            Some(mut device) => device.close(),
            None => Ok(()),
        }
    }

    /// Closes every device, returning the first error.
    pub fn close_all(&mut self) -> Result<()> {
        let mut result = Ok(());
        for (id, mut device) in std::mem::take(&mut self.devices) {
            if let Err(err) = device.close() {
                log::error!("Failed to close device {:?}: {}", id, err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
