//! Programs for the on-device write sequencer.
//!
//! The sequencer replays a list of register writes. Each instruction occupies four words
//! of the program register:
//!
//! | word | content                              |
//! |------|--------------------------------------|
//! | 0    | delay in ticks, applied after writing |
//! | 1    | address to write                     |
//! | 2    | upper 16 bits of the value           |
//! | 3    | lower 16 bits of the value           |
//!
//! A slot with address 0 ends the program.
use std::{fmt::Display, str::FromStr};

use crate::{
    access::to_word,
    error::{Error, Result},
    regmap::{RegisterMap, Token},
};

pub const SLOT_WORDS: usize = 4;
pub const MAX_DELAY: u32 = 0xffff;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Instruction {
    /// Write `value` to `register`, or to element `index` of an array register
    Set {
        register: String,
        index: Option<usize>,
        value: i64,
    },
    /// Delay the preceding write by this many ticks
    Sleep(u32),
}

impl Instruction {
    /// A write to `target`, which is either a register name or `name[index]`.
    ///
    /// ```
    /// use leep_client::sequencer::Instruction;
    ///
    /// assert_eq!(
    ///     Instruction::set("proc_lim[1]", 5000).unwrap(),
    ///     Instruction::Set { register: "proc_lim".into(), index: Some(1), value: 5000 },
    /// );
    /// ```
    pub fn set(target: &str, value: i64) -> Result<Instruction> {
        let (register, index) = parse_target(target)?;
        Ok(Instruction::Set {
            register: register.to_string(),
            index,
            value,
        })
    }

    pub fn sleep(ticks: u32) -> Instruction {
        Instruction::Sleep(ticks)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Set {
                register,
                index: Some(index),
                value,
            } => write!(f, "set {}[{}]={}", register, index, value),
            Instruction::Set {
                register,
                index: None,
                value,
            } => write!(f, "set {}={}", register, value),
            Instruction::Sleep(ticks) => write!(f, "sleep {}", ticks),
        }
    }
}

/// Parses `set <name>=<value>` or `sleep <ticks>`.
impl FromStr for Instruction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::InvalidArgument(format!("Malformed instruction '{}'", s));
        let (op, arg) = s.trim().split_once(char::is_whitespace).ok_or_else(malformed)?;
        match op {
            "set" => {
                let (target, value) = arg.split_once('=').ok_or_else(malformed)?;
                let value = parse_int(value.trim()).ok_or_else(malformed)?;
                Instruction::set(target.trim(), value)
            }
            "sleep" => {
                let ticks = parse_int(arg.trim())
                    .and_then(|ticks| u32::try_from(ticks).ok())
                    .ok_or_else(malformed)?;
                Ok(Instruction::Sleep(ticks))
            }
            _ => Err(malformed()),
        }
    }
}

fn parse_int(s: &str) -> Option<i64> {
    match s.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Splits `name` or `name[index]`.
fn parse_target(target: &str) -> Result<(&str, Option<usize>)> {
    let malformed = || Error::InvalidArgument(format!("Malformed register '{}'", target));
    match target.split_once('[') {
        None if !target.is_empty() && !target.contains(']') => Ok((target, None)),
        Some((name, rest)) if !name.is_empty() && !name.contains(']') => {
            let index = rest
                .strip_suffix(']')
                .and_then(|index| index.parse().ok())
                .ok_or_else(malformed)?;
            Ok((name, Some(index)))
        }
        _ => Err(malformed()),
    }
}

/// Builds the program for `target` from `program`.
///
/// The result has one word per element of the target register: the instruction
/// slots, one terminating zero slot, then zero padding.
pub fn assemble(
    map: &RegisterMap,
    target: &str,
    program: &[Instruction],
    instance: &[Token],
) -> Result<Vec<u32>> {
    let capacity = map.get_reg_info(target, instance)?.len();
    let overflow = |index: usize| Error::SequencerAssembly {
        index,
        reason: format!("Program does not fit into {} ({} words)", target, capacity),
    };
    if capacity < SLOT_WORDS {
        return Err(overflow(0));
    }

    let mut words: Vec<u32> = Vec::with_capacity(capacity);
    for (index, instruction) in program.iter().enumerate() {
        let fail = |reason: String| Error::SequencerAssembly { index, reason };
        match instruction {
            Instruction::Set {
                register,
                index: offset,
                value,
            } => {
                let info = map
                    .get_reg_info(register, instance)
                    .map_err(|err| fail(err.to_string()))?;
                let offset = offset.unwrap_or(0);
                if offset >= info.len() {
                    return Err(fail(format!(
                        "Index {} out of bounds for {} ({} elements)",
                        offset,
                        info.name,
                        info.len()
                    )));
                }
                let value = to_word(info, *value).map_err(|err| fail(err.to_string()))?;
                words.extend([0, info.base_addr + offset as u32, value >> 16, value & 0xffff]);
            }
            Instruction::Sleep(ticks) => {
                let Some(delay) = words.len().checked_sub(SLOT_WORDS) else {
                    return Err(fail("sleep must follow a set".into()));
                };
                if words[delay] != 0 {
                    return Err(fail("sleep must not follow sleep".into()));
                }
                if *ticks > MAX_DELAY {
                    return Err(fail(format!(
                        "Delay {} exceeds {}",
                        ticks, MAX_DELAY
                    )));
                }
                words[delay] = *ticks;
            }
        }
        if words.len() + SLOT_WORDS > capacity {
            return Err(overflow(index));
        }
    }

    words.resize(capacity, 0);
    Ok(words)
}

#[cfg(test)]
mod test {
    use super::*;

    fn map() -> RegisterMap {
        RegisterMap::from_json(
            r#"{
            "shell_0_dsp_fdbk_core_mp_proc_lim": {"base_addr": 256, "addr_width": 2, "data_width": 18, "sign": "signed"},
            "shell_0_dsp_fdbk_core_mp_proc_setmp": {"base_addr": 260, "addr_width": 1, "data_width": 18, "sign": "signed"},
            "shell_0_XXX": {"base_addr": 4096, "addr_width": 4, "data_width": 16},
            "tiny_XXX": {"base_addr": 8192, "addr_width": 3, "data_width": 16},
            "scalar_XXX": {"base_addr": 8300, "data_width": 16}
        }"#,
        )
        .unwrap()
    }

    fn set(target: &str, value: i64) -> Instruction {
        Instruction::set(target, value).unwrap()
    }

    #[test]
    fn set_sleep_set() {
        let program = [set("proc_lim", 1), Instruction::sleep(10), set("proc_setmp", 2)];
        let words = assemble(&map(), "XXX", &program, &[0.into()]).unwrap();
        assert_eq!(words.len(), 16);
        assert_eq!(&words[0..4], &[10, 256, 0, 1]);
        assert_eq!(&words[4..8], &[0, 260, 0, 2]);
        assert_eq!(&words[8..], &[0; 8]);
    }

    #[test]
    fn index_and_value_split() {
        let program = [set("proc_lim[3]", 0x1_5678), set("proc_setmp[1]", -1)];
        let words = assemble(&map(), "XXX", &program, &[0.into()]).unwrap();
        assert_eq!(&words[0..4], &[0, 259, 0x1, 0x5678]);
        assert_eq!(&words[4..8], &[0, 261, 0xffff, 0xffff]);
    }

    #[test]
    fn index_out_of_bounds() {
        let program = [set("proc_lim", 1), set("proc_setmp[2]", 1)];
        match assemble(&map(), "XXX", &program, &[0.into()]) {
            Err(Error::SequencerAssembly { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected SequencerAssembly, got {:?}", other),
        }
    }

    #[test]
    fn misplaced_sleep() {
        let map = map();
        match assemble(&map, "XXX", &[Instruction::sleep(5)], &[0.into()]) {
            Err(Error::SequencerAssembly { index, reason }) => {
                assert_eq!(index, 0);
                assert!(reason.contains("follow a set"));
            }
            other => panic!("expected SequencerAssembly, got {:?}", other),
        }

        let program = [set("proc_lim", 1), Instruction::sleep(5), Instruction::sleep(6)];
        match assemble(&map, "XXX", &program, &[0.into()]) {
            Err(Error::SequencerAssembly { index, reason }) => {
                assert_eq!(index, 2);
                assert!(reason.contains("follow sleep"));
            }
            other => panic!("expected SequencerAssembly, got {:?}", other),
        }
    }

    #[test]
    fn zero_sleep_is_a_no_op() {
        let program = [
            set("proc_lim", 1),
            Instruction::sleep(0),
            Instruction::sleep(7),
        ];
        let words = assemble(&map(), "XXX", &program, &[0.into()]).unwrap();
        assert_eq!(&words[0..4], &[7, 256, 0, 1]);
    }

    #[test]
    fn delay_range() {
        let map = map();
        let program = [set("proc_lim", 1), Instruction::sleep(MAX_DELAY)];
        let words = assemble(&map, "XXX", &program, &[0.into()]).unwrap();
        assert_eq!(words[0], 0xffff);

        let program = [set("proc_lim", 1), Instruction::sleep(MAX_DELAY + 1)];
        assert!(matches!(
            assemble(&map, "XXX", &program, &[0.into()]),
            Err(Error::SequencerAssembly { index: 1, .. })
        ));
    }

    #[test]
    fn unknown_register_reports_index() {
        let program = [set("proc_lim", 1), set("nope", 1)];
        assert!(matches!(
            assemble(&map(), "XXX", &program, &[0.into()]),
            Err(Error::SequencerAssembly { index: 1, .. })
        ));
    }

    #[test]
    fn program_must_leave_room_for_terminator() {
        // tiny_XXX holds two slots: one instruction and the terminator
        let program = [set("proc_lim[0]", 1)];
        let words = assemble(&map(), "tiny_XXX", &program, &[0.into()]).unwrap();
        assert_eq!(words, vec![0, 256, 0, 1, 0, 0, 0, 0]);

        let program = [set("proc_lim[0]", 1), set("proc_lim[1]", 2)];
        assert!(matches!(
            assemble(&map(), "tiny_XXX", &program, &[0.into()]),
            Err(Error::SequencerAssembly { index: 1, .. })
        ));
    }

    #[test]
    fn empty_program_needs_a_terminator_slot() {
        let words = assemble(&map(), "tiny_XXX", &[], &[0.into()]).unwrap();
        assert_eq!(words, vec![0; 8]);

        for target in ["proc_setmp", "scalar_XXX"] {
            match assemble(&map(), target, &[], &[0.into()]) {
                Err(Error::SequencerAssembly { index, reason }) => {
                    assert_eq!(index, 0);
                    assert!(reason.contains("does not fit"), "{}", reason);
                }
                other => panic!("expected SequencerAssembly, got {:?}", other),
            }
        }
    }

    #[test]
    fn set_value_must_fit_register() {
        let program = [set("proc_lim[0]", 131071), set("proc_lim[1]", 131072)];
        match assemble(&map(), "XXX", &program, &[0.into()]) {
            Err(Error::SequencerAssembly { index, reason }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("131072"), "{}", reason);
            }
            other => panic!("expected SequencerAssembly, got {:?}", other),
        }
        assert!(matches!(
            assemble(&map(), "XXX", &[set("XXX[0]", -1)], &[0.into()]),
            Err(Error::SequencerAssembly { index: 0, .. })
        ));
    }

    #[test]
    fn parse_instructions() {
        assert_eq!(
            "set proc_lim[2]=0x10".parse::<Instruction>().unwrap(),
            Instruction::Set {
                register: "proc_lim".into(),
                index: Some(2),
                value: 16
            }
        );
        assert_eq!(
            "sleep 1000".parse::<Instruction>().unwrap(),
            Instruction::Sleep(1000)
        );
        assert!("set proc_lim[x]=1".parse::<Instruction>().is_err());
        assert!("set proc_lim]=1".parse::<Instruction>().is_err());
        assert!("jump 4".parse::<Instruction>().is_err());
        assert!("sleep -1".parse::<Instruction>().is_err());
    }
}
