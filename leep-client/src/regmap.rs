//! Register name resolution.
//!
//! Firmware often instantiates the same logical block several times, producing register
//! names like `shell_0_dsp_tag` and `shell_1_dsp_tag`. Callers name registers by their
//! short name plus instance tokens which select one of the copies.
use std::fmt::Display;

use leep_protocol::schema::{RegisterInfo, Schema};
use regex::Regex;

use crate::error::{Error, Result};

/// One instance qualifier.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Token {
    Int(i64),
    Str(String),
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Int(value) => write!(f, "{}", value),
            Token::Str(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::Str(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token::Str(value)
    }
}

impl From<i64> for Token {
    fn from(value: i64) -> Self {
        Token::Int(value)
    }
}

impl From<i32> for Token {
    fn from(value: i32) -> Self {
        Token::Int(value.into())
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token::Int(value.into())
    }
}

impl From<usize> for Token {
    fn from(value: usize) -> Self {
        Token::Int(value as i64)
    }
}

/// Parses a command line instance token, preferring integers.
impl std::str::FromStr for Token {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(s.parse::<i64>()
            .map(Token::Int)
            .unwrap_or_else(|_| Token::Str(s.to_string())))
    }
}

/// The registers of one device, immutable once loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterMap {
    schema: Schema,
}

impl RegisterMap {
    pub fn new(schema: Schema) -> RegisterMap {
        RegisterMap { schema }
    }

    pub fn from_json(json: &str) -> Result<RegisterMap> {
        Ok(RegisterMap::new(Schema::from_json(json)?))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Resolves a short register name to the full name.
    ///
    /// A name present in the schema is returned as is. Otherwise the instance tokens must
    /// appear, in order and each followed by `_`, somewhere before the short name, and
    /// the full name must end with the short name. Exactly one register may match.
    ///
    /// ```
    /// use leep_client::regmap::RegisterMap;
    ///
    /// let map = RegisterMap::from_json(r#"{
    ///     "shell_0_reg_a": {"base_addr": 0, "data_width": 32},
    ///     "shell_1_reg_a": {"base_addr": 1, "data_width": 32}
    /// }"#).unwrap();
    /// assert_eq!(map.expand_regname("reg_a", &[1.into()]).unwrap(), "shell_1_reg_a");
    /// assert!(map.expand_regname("reg_a", &[]).is_err());
    /// ```
    pub fn expand_regname(&self, name: &str, instance: &[Token]) -> Result<&str> {
        if let Some(info) = self.schema.get(name) {
            return Ok(&info.name);
        }

        let parts: Vec<String> = instance
            .iter()
            .map(|token| regex::escape(&token.to_string()))
            .chain(std::iter::once(regex::escape(name)))
            .collect();
        let pattern = format!("^.*{}$", parts.join("_(?:.*_)?"));
        let regex = Regex::new(&pattern).map_err(|err| Error::InvalidArgument(err.to_string()))?;

        let matches: Vec<&str> = self
            .schema
            .names()
            .filter(|candidate| regex.is_match(candidate))
            .collect();
        match matches.as_slice() {
            [single] => Ok(*single),
            [] => Err(Error::UnknownRegister { pattern }),
            _ => Err(Error::AmbiguousRegister {
                pattern,
                matches: matches.iter().map(|m| m.to_string()).collect(),
            }),
        }
    }

    /// Resolves `name` and returns its description.
    pub fn get_reg_info(&self, name: &str, instance: &[Token]) -> Result<&RegisterInfo> {
        let full = self.expand_regname(name, instance)?;
        self.schema
            .get(full)
            .ok_or_else(|| Error::UnknownRegister {
                pattern: full.to_string(),
            })
    }
}
