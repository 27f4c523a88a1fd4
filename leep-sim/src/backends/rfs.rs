//! # Acquisition Engine Backend
//!
//! A [`RegisterFile`] with a model of the waveform acquisition engine of an RF station.
//!
//! The schema must define `circle_buf_flip` and `llrf_circle_ready`, plus for every channel
//! group `N` the registers `shell_N_dsp_chan_keep`, `shell_N_dsp_tag`,
//! `shell_N_circle_data` and `shell_N_slow_data`. Groups are numbered from 0 without gaps.
//!
//! Writing a non-zero value to `circle_buf_flip` captures every group whose bit is set:
//! the ready bit is cleared, a damped sine per enabled channel is written interleaved into
//! the circle buffer, the slow buffer is refilled and the ready bit set again. With a
//! server tick configured, every group is also captured on each tick.
use std::{f64::consts::PI, sync::Mutex};

use leep_protocol::schema::RegisterInfo;

use super::regfile::RegisterFile;
use crate::{RegisterBackend, error::SimError};

const CHANNELS: u32 = 12;
const AMPLITUDE: f64 = 10000.0;
/// Periods shown in the circle buffer
const PERIODS: f64 = 5.0;
const PHASE_STEP_DEG: f64 = 5.0;
const PAIR_PHASE_DEG: f64 = 10.0;
const SLOW_LEN: usize = 43;

#[derive(Debug)]
struct Group {
    chan_keep: RegisterInfo,
    tag: RegisterInfo,
    circle: RegisterInfo,
    slow: RegisterInfo,
}

#[derive(Debug, Default)]
struct State {
    /// Degrees
    phase: f64,
    count: u32,
}

#[derive(Debug)]
pub struct RfsBackend {
    regs: RegisterFile,
    flip: RegisterInfo,
    ready: RegisterInfo,
    groups: Vec<Group>,
    state: Mutex<State>,
}

impl RfsBackend {
    pub fn new(regs: RegisterFile) -> Result<RfsBackend, SimError> {
        let flip = regs.info("circle_buf_flip")?.clone();
        let ready = regs.info("llrf_circle_ready")?.clone();

        let mut groups = Vec::new();
        while regs
            .schema()
            .contains(&format!("shell_{}_dsp_chan_keep", groups.len()))
        {
            let reg = |name: &str| -> Result<RegisterInfo, SimError> {
                Ok(regs
                    .info(&format!("shell_{}_{}", groups.len(), name))?
                    .clone())
            };
            let group = Group {
                chan_keep: reg("dsp_chan_keep")?,
                tag: reg("dsp_tag")?,
                circle: reg("circle_data")?,
                slow: reg("slow_data")?,
            };
            if group.slow.len() < SLOW_LEN {
                return Err(SimError::MissingRegister(format!(
                    "{} has {} elements, at least {} required",
                    group.slow.name,
                    group.slow.len(),
                    SLOW_LEN
                )));
            }
            groups.push(group);
        }
        if groups.len() > flip.data_width as usize {
            log::warn!(
                "{} channel groups but {} is {} bits wide",
                groups.len(),
                flip.name,
                flip.data_width
            );
        }

        // a decimation of zero is not meaningful
        for info in regs.schema().iter() {
            if info.name.ends_with("wave_samp_per") {
                regs.store(info, [1]);
            }
        }

        log::info!("Acquisition model with {} channel groups", groups.len());
        Ok(RfsBackend {
            regs,
            flip,
            ready,
            groups,
            state: Mutex::new(State::default()),
        })
    }

    pub fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    fn scalar(&self, info: &RegisterInfo) -> u32 {
        self.regs.load(info).first().copied().unwrap_or(0)
    }

    /// Captures all groups in `bits`.
    fn capture(&self, bits: u32) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let ready = self.scalar(&self.ready);
        self.regs.store(&self.ready, [ready & !bits]);

        for (index, group) in self.groups.iter().enumerate().take(32) {
            if bits & (1 << index) != 0 {
                self.acquire(group, &state);
                state.count = (state.count + 1) & 0xffff;
            }
        }

        self.regs.store(&self.ready, [self.scalar(&self.ready) | bits]);
        state.phase = (state.phase + PHASE_STEP_DEG) % 360.0;
    }

    fn acquire(&self, group: &Group, state: &State) {
        let mask = self.scalar(&group.chan_keep) & 0xfff;
        if mask == 0 {
            return;
        }
        let tag = self.scalar(&group.tag) & 0xffff;

        let len = group.circle.len();
        let samples = len as f64 / f64::from(mask.count_ones());
        let step = 2.0 * PI * PERIODS / samples;
        let mut circle = Vec::with_capacity(len);
        let (mut min, mut max) = (i32::MAX, i32::MIN);
        let mut t = 0.0;
        while circle.len() < len {
            let envelope = AMPLITUDE * (1.0 - t * 0.5 / (2.0 * PI * PERIODS));
            let reference = (envelope * t.sin()) as i32;
            min = min.min(reference);
            max = max.max(reference);

            // each I/Q pair is phase shifted
            for pair in 0..CHANNELS / 2 {
                let phase = (state.phase + f64::from(pair) * PAIR_PHASE_DEG).to_radians();
                if mask & (0x800 >> (2 * pair)) != 0 && circle.len() < len {
                    circle.push((envelope * (t + phase).sin()) as i32 as u32);
                }
                if mask & (0x800 >> (2 * pair + 1)) != 0 && circle.len() < len {
                    circle.push((envelope * (t + phase).cos()) as i32 as u32);
                }
            }
            t += step;
        }
        self.regs.store(&group.circle, circle);

        let mut slow = vec![0u32; group.slow.len()];
        slow[17] = (state.count >> 8) & 0xff;
        slow[18] = state.count & 0xff;
        // ADC min/max, four times
        for i in (21..=31).step_by(4) {
            slow[i] = ((min >> 8) & 0xff) as u32;
            slow[i + 1] = (min & 0xff) as u32;
            slow[i + 2] = ((max >> 8) & 0xff) as u32;
            slow[i + 3] = (max & 0xff) as u32;
        }
        slow[33] = tag;
        slow[34] = tag;
        self.regs.store(&group.slow, slow);
        log::debug!(
            "Captured {} with mask {:03x} and tag {}",
            group.circle.name,
            mask,
            tag
        );
    }

    fn all_groups(&self) -> u32 {
        (1u32 << self.groups.len().min(31)) - 1
    }
}

impl RegisterBackend for RfsBackend {
    fn read(&self, addr: u32) -> u32 {
        self.regs.read(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        self.regs.write(addr, value);
        if addr == self.flip.base_addr && value != 0 {
            self.capture(value & self.all_groups());
        }
    }

    fn tick(&self) {
        self.capture(self.all_groups());
    }
}
