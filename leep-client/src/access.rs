//! Translation between named register operations and address/value pairs.
use leep_protocol::{Pair, schema::RegisterInfo};

use crate::{
    error::{Error, Result},
    regmap::{RegisterMap, Token},
};

/// The contents of a register.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Scalar(i64),
    Array(Vec<i64>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<i64> {
        match self {
            Value::Scalar(value) => Some(*value),
            Value::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[i64]> {
        match self {
            Value::Scalar(_) => None,
            Value::Array(values) => Some(values),
        }
    }

    /// All elements, one for a scalar
    pub fn elements(&self) -> &[i64] {
        match self {
            Value::Scalar(value) => std::slice::from_ref(value),
            Value::Array(values) => values,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Scalar(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Scalar(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Scalar(value.into())
    }
}

impl From<Vec<i64>> for Value {
    fn from(values: Vec<i64>) -> Self {
        Value::Array(values)
    }
}

impl From<Vec<u32>> for Value {
    fn from(values: Vec<u32>) -> Self {
        Value::Array(values.into_iter().map(i64::from).collect())
    }
}

/// The 32 bit word written for `value`; negative values are stored as two's complement.
pub fn to_word(info: &RegisterInfo, value: i64) -> Result<u32> {
    info.encode_value(value)
        .ok_or_else(|| Error::ValueOutOfRange {
            name: info.name.clone(),
            value,
            range: info.value_range(),
        })
}

/// Builds the pairs writing every `(name, value)` of `ops`.
///
/// Array registers must be written as a whole, one value per element.
pub fn write_pairs(map: &RegisterMap, ops: &[(&str, Value)], instance: &[Token]) -> Result<Vec<Pair>> {
    let mut pairs = Vec::new();
    for (name, value) in ops {
        let info = map.get_reg_info(name, instance)?;
        match value {
            Value::Array(values) if !info.is_scalar() && values.len() == info.len() => {
                for (addr, value) in info.addresses().zip(values) {
                    pairs.push(Pair::write(addr, to_word(info, *value)?));
                }
            }
            Value::Scalar(value) if info.is_scalar() => {
                pairs.push(Pair::write(info.base_addr, to_word(info, *value)?));
            }
            _ => {
                return Err(Error::RegisterSizeMismatch {
                    name: info.name.clone(),
                    expected: info.len(),
                    got: value.elements().len(),
                });
            }
        }
    }
    Ok(pairs)
}

/// The addresses to read for a list of registers and how to split the result.
#[derive(Clone, Debug)]
pub struct ReadPlan {
    registers: Vec<RegisterInfo>,
}

impl ReadPlan {
    /// Resolves every name of `names`.
    pub fn new(map: &RegisterMap, names: &[&str], instance: &[Token]) -> Result<ReadPlan> {
        let registers = names
            .iter()
            .map(|name| map.get_reg_info(name, instance).cloned())
            .collect::<Result<_>>()?;
        Ok(ReadPlan { registers })
    }

    pub fn registers(&self) -> &[RegisterInfo] {
        &self.registers
    }

    /// Read pairs covering every element of every register, in order.
    pub fn pairs(&self) -> Vec<Pair> {
        self.registers
            .iter()
            .flat_map(RegisterInfo::addresses)
            .map(Pair::read)
            .collect()
    }

    /// Splits the values read for [`ReadPlan::pairs`] back into one value per register.
    pub fn split(&self, raw: &[u32]) -> Result<Vec<Value>> {
        let total: usize = self.registers.iter().map(RegisterInfo::len).sum();
        if raw.len() != total {
            return Err(Error::InvalidArgument(format!(
                "Expected {} values, got {}",
                total,
                raw.len()
            )));
        }
        let mut rest = raw;
        let mut values = Vec::with_capacity(self.registers.len());
        for info in &self.registers {
            let (data, tail) = rest.split_at(info.len());
            rest = tail;
            values.push(if info.is_scalar() {
                Value::Scalar(info.decode_value(data[0]))
            } else {
                Value::Array(data.iter().map(|raw| info.decode_value(*raw)).collect())
            });
        }
        Ok(values)
    }
}
