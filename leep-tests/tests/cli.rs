use std::error::Error as StdError;

use leep_cli::commands::{self, RegArg};
use leep_client::{Error, RegisterAccess, access::Value, regmap::Token};
use leep_sim::{backends::regfile::RegisterFile, server};
use leep_tests::{DESCRIPTION, SCHEMA, Sim, regfile_sim};

fn args(line: &str) -> Vec<RegArg> {
    line.split_whitespace()
        .map(|arg| arg.parse().unwrap())
        .collect()
}

fn text(out: Vec<u8>) -> String {
    String::from_utf8(out).unwrap()
}

#[test]
fn reg_writes_then_reads_back() {
    let sim = regfile_sim().unwrap();
    let mut dev = sim.connect().unwrap();
    let inst: [Token; 1] = [0.into()];

    let mut out = Vec::new();
    commands::readwrite(
        &mut dev,
        &args("dsp_chan_keep=0xc00 dsp_tag=42 dsp_tag dsp_chan_keep proc_lim"),
        &inst,
        &mut out,
    )
    .unwrap();
    assert_eq!(
        text(out),
        "dsp_tag \t0000002a\n\
         dsp_chan_keep \t00000c00\n\
         proc_lim \t00000000 00000000 00000000 00000000\n"
    );

    // signed elements print as two's complement words
    dev.reg_write(&[("proc_setmp", Value::Array(vec![-5, 3]))], &inst)
        .unwrap();
    let mut out = Vec::new();
    commands::readwrite(&mut dev, &args("proc_setmp"), &inst, &mut out).unwrap();
    assert_eq!(text(out), "proc_setmp \tfffffffb 00000003\n");

    let mut plain = sim.connect().unwrap();
    assert_eq!(
        plain.reg_read(&["shell_0_dsp_tag"], &[]).unwrap(),
        vec![Value::Scalar(42)]
    );
}

#[test]
fn reg_stops_at_first_failure() {
    let sim = regfile_sim().unwrap();
    let mut dev = sim.connect().unwrap();
    let inst: [Token; 1] = [1.into()];

    let mut out = Vec::new();
    let err = commands::readwrite(
        &mut dev,
        &args("dsp_tag=7 dsp_tag=0x100 dsp_tag"),
        &inst,
        &mut out,
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::ValueOutOfRange { value: 256, .. })
    ));
    assert!(out.is_empty());
    assert_eq!(
        dev.reg_read(&["dsp_tag"], &inst).unwrap(),
        vec![Value::Scalar(7)]
    );

    let err: Box<dyn StdError> = commands::readwrite(&mut dev, &args("dsp_tag"), &[], &mut out)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::AmbiguousRegister { .. })
    ));
}

#[test]
fn dump_lists_readable_words_by_address() {
    let sim = regfile_sim().unwrap();
    let mut dev = sim.connect().unwrap();
    dev.reg_write(&[("dac_offset", Value::from(0x55))], &[])
        .unwrap();
    dev.reg_write(&[("shell_1_dsp_tag", Value::from(3))], &[])
        .unwrap();
    dev.reg_write(&[("shell_0_dsp_tag", Value::from(0x2a))], &[])
        .unwrap();
    let mut table = vec![0; 256];
    table[5] = -2;
    dev.reg_write(&[("lut_table", Value::Array(table))], &[])
        .unwrap();

    let mut out = Vec::new();
    commands::dump(&mut dev, false, &mut out).unwrap();
    let out = text(out);
    let addrs: Vec<u32> = out
        .lines()
        .map(|line| {
            let (addr, value) = line.split_once(' ').unwrap();
            assert_eq!(value.len(), 8, "{}", line);
            u32::from_str_radix(addr, 16).unwrap()
        })
        .collect();
    // every element of every readable register, the write only one left out
    assert_eq!(addrs.len(), 1454);
    assert!(addrs.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(&addrs[..3], &[1, 2, 16]);
    assert!(!addrs.contains(&3));
    assert!(out.contains("00000021 00000003\n"));

    let mut out = Vec::new();
    commands::dump(&mut dev, true, &mut out).unwrap();
    assert_eq!(
        text(out),
        "00000011 0000002a\n\
         00000021 00000003\n\
         00000405 fffffffe\n"
    );
}

#[test]
fn json_prints_rom_text() {
    let sim = regfile_sim().unwrap();
    let dev = sim.connect().unwrap();
    assert_eq!(commands::json(&dev), SCHEMA);

    // keys the client does not know about are kept
    let json = r#"{
        "reg_a": {"base_addr": 1, "data_width": 8, "unit": "V"},
        "__metadata__": "generated by newad"
    }"#;
    let regs = RegisterFile::from_json(json, DESCRIPTION).unwrap();
    let sim = Sim::spawn(regs, server::Config::default()).unwrap();
    let dev = sim.connect().unwrap();
    let printed = commands::json(&dev);
    assert_eq!(printed, json);
    assert!(printed.contains("\"unit\": \"V\""));
    assert!(!dev.register_map().schema().to_json().contains("unit"));
}

#[test]
fn list_names_every_register() {
    let sim = regfile_sim().unwrap();
    let dev = sim.connect().unwrap();
    let mut out = Vec::new();
    commands::list(dev.register_map().schema(), &mut out).unwrap();
    let out = text(out);
    let names: Vec<&str> = out.lines().collect();
    assert_eq!(names.len(), 17);
    assert!(names.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(names.contains(&"dac_offset"));
}
