//! Register schema published in the device ROM.
//!
//! The schema is a JSON object mapping register names to their description:
//!
//! ```json
//! {
//!   "shell_0_dsp_tag": {
//!     "access": "rw",
//!     "addr_width": 0,
//!     "base_addr": 327693,
//!     "data_width": 8,
//!     "description": "Tag stamped into the slow buffer",
//!     "sign": "unsigned"
//!   }
//! }
//! ```
//!
//! Entries are validated once when the schema is loaded, so later lookups never fail on a
//! malformed definition.
use std::collections::BTreeMap;
use std::fmt::Display;
use std::ops::{Range, RangeInclusive};
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::DecodeError;
use crate::protocol::ADDR_MASK;

/// Interpretation of the register contents.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    #[default]
    Unsigned,
    Signed,
}

/// Whether a register may be read, written or both.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub const READ_WRITE: Access = Access {
        read: true,
        write: true,
    };
}

impl Default for Access {
    fn default() -> Self {
        Access::READ_WRITE
    }
}

impl FromStr for Access {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Access {
            read: s.contains('r'),
            write: s.contains('w'),
        })
    }
}

impl Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.read {
            write!(f, "r")?;
        }
        if self.write {
            write!(f, "w")?;
        }
        Ok(())
    }
}

impl Serialize for Access {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Description of a single register.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RegisterInfo {
    #[serde(skip)]
    pub name: String,
    pub access: Access,
    /// log2 of the number of elements; zero for a scalar register
    pub addr_width: u8,
    /// 24 bit address of the first element
    pub base_addr: u32,
    /// Number of significant bits per element
    pub data_width: u8,
    pub description: String,
    pub sign: Sign,
}

impl RegisterInfo {
    /// Number of elements
    pub fn len(&self) -> usize {
        1 << self.addr_width
    }

    /// Whether the register holds a single value
    pub fn is_scalar(&self) -> bool {
        self.addr_width == 0
    }

    /// The addresses occupied by this register.
    pub fn addresses(&self) -> Range<u32> {
        self.base_addr..self.base_addr + self.len() as u32
    }

    /// The values an element can hold.
    pub fn value_range(&self) -> RangeInclusive<i64> {
        let width = self.data_width.clamp(1, 32);
        match self.sign {
            Sign::Unsigned => 0..=(1i64 << width) - 1,
            Sign::Signed => -(1i64 << (width - 1))..=(1i64 << (width - 1)) - 1,
        }
    }

    /// The raw word for `value`, `None` if it is outside [`RegisterInfo::value_range`].
    ///
    /// Negative values are stored as two's complement.
    pub fn encode_value(&self, value: i64) -> Option<u32> {
        self.value_range()
            .contains(&value)
            .then_some(value as u32)
    }

    /// Interprets a raw register value according to the sign and data width.
    ///
    /// Signed values are sign extended from bit `data_width - 1`.
    pub fn decode_value(&self, raw: u32) -> i64 {
        match self.sign {
            Sign::Unsigned => i64::from(raw),
            Sign::Signed => sign_extend(raw, self.data_width),
        }
    }
}

/// Sign extends the lower `width` bits of `raw`.
pub fn sign_extend(raw: u32, width: u8) -> i64 {
    if width == 0 || width >= 32 {
        return i64::from(raw as i32);
    }
    let sign_bit = 1u32 << (width - 1);
    if raw & sign_bit != 0 {
        // set all bits at and above the sign bit
        i64::from((raw | !(sign_bit - 1)) as i32)
    } else {
        i64::from(raw & (sign_bit - 1))
    }
}

#[derive(Deserialize)]
struct RawRegister {
    base_addr: Option<u64>,
    addr_width: Option<u64>,
    data_width: Option<u64>,
    sign: Option<String>,
    access: Option<String>,
    description: Option<String>,
}

impl RawRegister {
    fn validate(self, name: &str) -> Result<RegisterInfo, DecodeError> {
        let invalid = |reason: String| DecodeError::InvalidRegister {
            name: name.to_string(),
            reason,
        };

        let base_addr = self
            .base_addr
            .ok_or_else(|| invalid("missing base_addr".to_string()))?;
        let data_width = self
            .data_width
            .ok_or_else(|| invalid("missing data_width".to_string()))?;
        let addr_width = self.addr_width.unwrap_or(0);

        if !(1..=32).contains(&data_width) {
            return Err(invalid(format!("data_width {} out of range", data_width)));
        }
        if addr_width > 24 {
            return Err(invalid(format!("addr_width {} out of range", addr_width)));
        }
        let last = base_addr.checked_add((1u64 << addr_width) - 1);
        if base_addr > u64::from(ADDR_MASK)
            || last.is_none_or(|last| last > u64::from(ADDR_MASK))
        {
            return Err(invalid(format!(
                "base_addr {:#x} with addr_width {} exceeds the 24 bit address space",
                base_addr, addr_width
            )));
        }
        let sign = match self.sign.as_deref() {
            None | Some("unsigned") => Sign::Unsigned,
            Some("signed") => Sign::Signed,
            Some(other) => return Err(invalid(format!("unknown sign '{}'", other))),
        };
        let access = match self.access.as_deref() {
            Some(access) => access.parse().unwrap_or_default(),
            None => Access::default(),
        };

        Ok(RegisterInfo {
            name: name.to_string(),
            access,
            addr_width: addr_width as u8,
            base_addr: base_addr as u32,
            data_width: data_width as u8,
            description: self.description.unwrap_or_default(),
            sign,
        })
    }
}

/// All registers of a device, keyed by name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Schema {
    registers: BTreeMap<String, RegisterInfo>,
}

impl Schema {
    /// Parses and validates the JSON schema.
    ///
    /// Top level entries that are not objects carry no register and are skipped.
    pub fn from_json(json: &str) -> Result<Schema, DecodeError> {
        let entries: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;
        let mut registers = BTreeMap::new();
        for (name, value) in entries {
            if name.is_empty() {
                return Err(DecodeError::InvalidRegister {
                    name,
                    reason: "zero length register name".to_string(),
                });
            }
            if !value.is_object() {
                log::warn!("Ignoring non-register schema entry '{}'", name);
                continue;
            }
            let raw: RawRegister = serde_json::from_value(value)?;
            let info = raw.validate(&name)?;
            registers.insert(name, info);
        }
        Ok(Schema { registers })
    }

    /// Renders the schema as pretty printed JSON.
    pub fn to_json(&self) -> String {
        // Serializing a map of plain structs cannot fail
        serde_json::to_string_pretty(&self.registers).unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&RegisterInfo> {
        self.registers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registers.contains_key(name)
    }

    /// Register names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registers.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterInfo> {
        self.registers.values()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const JSON: &str = r#"{
        "shell_0_reg_a": {"base_addr": 16, "data_width": 8, "sign": "signed", "access": "r"},
        "shell_1_reg_a": {"base_addr": 17, "data_width": 18, "description": "the other one"},
        "circle_data": {"base_addr": 4096, "addr_width": 4, "data_width": 16, "access": "rw"},
        "__note": "not a register"
    }"#;

    #[test]
    fn parse_schema() {
        let schema = Schema::from_json(JSON).unwrap();
        assert_eq!(schema.len(), 3);
        let reg = schema.get("shell_0_reg_a").unwrap();
        assert_eq!(reg.name, "shell_0_reg_a");
        assert_eq!(reg.base_addr, 16);
        assert!(reg.is_scalar());
        assert_eq!(reg.sign, Sign::Signed);
        assert_eq!(reg.access, Access { read: true, write: false });

        let reg = schema.get("shell_1_reg_a").unwrap();
        assert_eq!(reg.sign, Sign::Unsigned);
        assert_eq!(reg.access, Access::READ_WRITE);
        assert_eq!(reg.description, "the other one");

        let reg = schema.get("circle_data").unwrap();
        assert_eq!(reg.len(), 16);
        assert_eq!(reg.addresses(), 4096..4112);
        assert_eq!(
            schema.names().collect::<Vec<_>>(),
            vec!["circle_data", "shell_0_reg_a", "shell_1_reg_a"]
        );
    }

    #[test]
    fn reparse_is_identical() {
        assert_eq!(
            Schema::from_json(JSON).unwrap(),
            Schema::from_json(JSON).unwrap()
        );
        let schema = Schema::from_json(JSON).unwrap();
        assert_eq!(Schema::from_json(&schema.to_json()).unwrap(), schema);
    }

    #[test]
    fn missing_fields() {
        match Schema::from_json(r#"{"x": {"data_width": 8}}"#) {
            Err(DecodeError::InvalidRegister { name, reason }) => {
                assert_eq!(name, "x");
                assert_eq!(reason, "missing base_addr");
            }
            other => panic!("expected InvalidRegister, got {:?}", other),
        }
        assert!(matches!(
            Schema::from_json(r#"{"x": {"base_addr": 1}}"#),
            Err(DecodeError::InvalidRegister { .. })
        ));
    }

    #[test]
    fn invalid_fields() {
        for json in [
            r#"{"x": {"base_addr": 1, "data_width": 33}}"#,
            r#"{"x": {"base_addr": 1, "data_width": 0}}"#,
            r#"{"x": {"base_addr": 16777215, "addr_width": 1, "data_width": 8}}"#,
            r#"{"x": {"base_addr": 1, "data_width": 8, "sign": "maybe"}}"#,
            r#"{"x": {"base_addr": "one", "data_width": 8}}"#,
        ] {
            assert!(Schema::from_json(json).is_err(), "{}", json);
        }
        // last address of the address space is fine
        assert!(Schema::from_json(r#"{"x": {"base_addr": 16777215, "data_width": 8}}"#).is_ok());
    }

    #[test]
    fn huge_base_addr_is_rejected() {
        for json in [
            r#"{"x": {"base_addr": 18446744073709551615, "data_width": 8}}"#,
            r#"{"x": {"base_addr": 18446744073709551615, "addr_width": 24, "data_width": 8}}"#,
            r#"{"x": {"base_addr": 16777216, "data_width": 8}}"#,
            r#"{"x": {"base_addr": 4294967296, "data_width": 8}}"#,
        ] {
            assert!(
                matches!(
                    Schema::from_json(json),
                    Err(DecodeError::InvalidRegister { .. })
                ),
                "{}",
                json
            );
        }
    }

    #[test]
    fn value_ranges() {
        let schema = Schema::from_json(JSON).unwrap();
        let reg = schema.get("shell_0_reg_a").unwrap();
        assert_eq!(reg.value_range(), -128..=127);
        assert_eq!(reg.encode_value(-1), Some(0xffff_ffff));
        assert_eq!(reg.encode_value(127), Some(0x7f));
        assert_eq!(reg.encode_value(128), None);
        assert_eq!(reg.encode_value(-129), None);

        let reg = schema.get("shell_1_reg_a").unwrap();
        assert_eq!(reg.value_range(), 0..=0x3_ffff);
        assert_eq!(reg.encode_value(0x3_ffff), Some(0x3_ffff));
        assert_eq!(reg.encode_value(0x4_0000), None);
        assert_eq!(reg.encode_value(-1), None);

        let wide = Schema::from_json(
            r#"{"u": {"base_addr": 1, "data_width": 32}, "s": {"base_addr": 2, "data_width": 32, "sign": "signed"}}"#,
        )
        .unwrap();
        let reg = wide.get("u").unwrap();
        assert_eq!(reg.encode_value(0xffff_ffff), Some(0xffff_ffff));
        assert_eq!(reg.encode_value(1 << 32), None);
        let reg = wide.get("s").unwrap();
        assert_eq!(reg.encode_value(i64::from(i32::MIN)), Some(0x8000_0000));
        assert_eq!(reg.encode_value(0xffff_ffff), None);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0xff, 8), -1);
        assert_eq!(sign_extend(0x80, 8), -128);
        assert_eq!(sign_extend(0x7f, 8), 127);
        assert_eq!(sign_extend(0x3_ffff, 18), -1);
        assert_eq!(sign_extend(0x2_0000, 18), -131072);
        assert_eq!(sign_extend(0xffff_fffe, 32), -2);
        assert_eq!(sign_extend(0x1234, 32), 0x1234);
    }
}
