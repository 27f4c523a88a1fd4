use std::{collections::BTreeMap, error::Error, io::Write, str::FromStr};

use leep_client::{Device, access::Value, regmap::Token};
use leep_protocol::{rom::RomInfo, schema::Schema};

/// A `name` or `name=value` command line argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegArg {
    pub name: String,
    pub value: Option<i64>,
}

impl FromStr for RegArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = match s.split_once('=') {
            Some((name, value)) => (name, Some(clap_num::maybe_hex::<i64>(value)?)),
            None => (s, None),
        };
        if name.is_empty() {
            return Err(format!("Missing register name in '{}'", s));
        }
        Ok(RegArg {
            name: name.to_string(),
            value,
        })
    }
}

fn hex(value: &Value) -> String {
    value
        .elements()
        .iter()
        .map(|element| format!("{:08x}", *element as u32))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Applies every argument in order, printing the values read.
pub fn readwrite(
    dev: &mut dyn Device,
    regs: &[RegArg],
    instance: &[Token],
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    for reg in regs {
        match reg.value {
            Some(value) => dev.reg_write(&[(reg.name.as_str(), Value::from(value))], instance)?,
            None => {
                for value in dev.reg_read(&[reg.name.as_str()], instance)? {
                    writeln!(out, "{} \t{}", reg.name, hex(&value))?;
                }
            }
        }
    }
    Ok(())
}

pub fn list(schema: &Schema, out: &mut impl Write) -> Result<(), Box<dyn Error>> {
    for name in schema.names() {
        writeln!(out, "{}", name)?;
    }
    Ok(())
}

/// Reads every readable register and prints one line per address.
pub fn dump(
    dev: &mut dyn Device,
    ignore_zeros: bool,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let schema = dev.register_map().schema().clone();
    let readable: Vec<_> = schema.iter().filter(|info| info.access.read).collect();
    let names: Vec<&str> = readable.iter().map(|info| info.name.as_str()).collect();
    let values = dev.reg_read(&names, &[])?;

    let mut words: Vec<(u32, u32)> = readable
        .iter()
        .zip(&values)
        .flat_map(|(info, value)| {
            info.addresses()
                .zip(value.elements().iter().map(|element| *element as u32))
        })
        .collect();
    words.sort_unstable_by_key(|(addr, _)| *addr);
    for (addr, value) in words {
        if value == 0 && ignore_zeros {
            continue;
        }
        writeln!(out, "{:08x} {:08x}", addr, value)?;
    }
    Ok(())
}

/// The register map JSON. Devices with a ROM return its text unchanged, keeping keys the
/// schema parser does not know.
pub fn json(dev: &dyn Device) -> String {
    match dev.rom_info() {
        Some(rom) => rom.schema.clone(),
        None => dev.register_map().schema().to_json(),
    }
}

/// Renders an MSI substitutions file with one entry per register.
///
/// Registers are grouped into one template file per combination of access and shape.
pub fn template(schema: &Schema, rom: Option<&RomInfo>) -> String {
    let mut files: BTreeMap<String, Vec<(String, &str, usize)>> = BTreeMap::new();
    for info in schema.iter() {
        let shape = if info.is_scalar() { "scalar" } else { "array" };
        files
            .entry(format!("feed_reg_{}_{}.template", info.access, shape))
            .or_default()
            .push((format!("reg:{}", info.name), &info.name, info.len()));
    }

    let mut out = format!(
        "# Generated from\n# FW: {}\n# JSON: {}\n# Code: {}\n\n",
        rom.and_then(|rom| rom.description.as_deref()).unwrap_or("unknown"),
        rom.and_then(|rom| rom.schema_hash.as_deref()).unwrap_or("unknown"),
        rom.and_then(|rom| rom.firmware_hash.as_deref()).unwrap_or("unknown"),
    );
    out.push_str("file \"feed_base.template\"\n{\n{PREF=\"$(P)ctrl:\"}\n}\n\n");
    for (file, mut entries) in files {
        entries.sort();
        out.push_str(&format!("file \"{}\"\n{{\n", file));
        for (pv, name, size) in entries {
            out.push_str(&format!(
                "{{PREF=\"$(P){}\",\tREG=\"{}\",\tSIZE=\"{}\"}}\n",
                pv, name, size
            ));
        }
        out.push_str("}\n\n");
    }
    out
}
