//! Waveform acquisition and its synchronization with register writes.
//!
//! Each channel group of a device repeatedly captures a waveform buffer ("circle") and a
//! metadata buffer ("slow"). The slow buffer carries the value of the group's tag register
//! sampled when the capture began and when it ended, which lets a client tell whether a
//! capture already reflects a register write: increment the tag after writing and wait
//! until the slow buffer reports the new tag.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    access::Value,
    device::RegisterAccess,
    error::{Error, Result},
    regmap::Token,
};

/// Offsets into the slow buffer
pub const SLOW_COUNT_HI: usize = 17;
pub const SLOW_COUNT_LO: usize = 18;
pub const SLOW_BEGIN_TAG: usize = 33;
pub const SLOW_END_TAG: usize = 34;
/// Minimum number of elements of the slow buffer
pub const SLOW_MIN_LEN: usize = 43;

/// Number of ADC samples per CIC output at decimation ratio 1
pub const CIC_PERIOD: u32 = 33;
/// Correction for the LO amplitude applied in the CIC filter.
///
/// The EPICS waveform record support (`asub.c`) uses `lo_cheat = 74762 * 1.646760258 /
/// 2^17` instead, about 0.9393. That value also enters its shift computation, so scaled
/// amplitudes from the two do not agree.
pub const LO_CORRECTION: f64 = 0.70469;

pub const MAX_CHANNELS: usize = 12;
pub const MAX_DECIMATION: u32 = 255;

/// Register names and constants of the acquisition engine.
#[derive(Debug, Clone)]
pub struct AcqConfig {
    /// Bit per channel group, set by the device when a capture completed
    pub flip: String,
    /// Bit per channel group, set while the group's buffers may be read
    pub ready: String,
    pub chan_keep: String,
    pub tag: String,
    pub circle_data: String,
    pub slow_data: String,
    pub decimation: String,
    pub adc_clock_hz: f64,
    /// Delay between two reads of the slow buffer while waiting
    pub poll_interval: Duration,
    pub channels: usize,
}

impl Default for AcqConfig {
    fn default() -> Self {
        Self {
            flip: "circle_buf_flip".into(),
            ready: "llrf_circle_ready".into(),
            chan_keep: "dsp_chan_keep".into(),
            tag: "dsp_tag".into(),
            circle_data: "circle_data".into(),
            slow_data: "slow_data".into(),
            decimation: "wave_samp_per".into(),
            adc_clock_hz: 1320e6 / 14.0,
            poll_interval: Duration::from_millis(50),
            channels: MAX_CHANNELS,
        }
    }
}

/// What to do when a capture ended with a tag beyond the one waited for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagPolicy {
    Ignore,
    #[default]
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Increment the tag and wait for a capture carrying it
    pub tag: bool,
    /// Also require the end tag to have reached the new tag
    pub end_gated: bool,
    pub policy: TagPolicy,
    pub timeout: Duration,
    /// Checked before every poll
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            tag: false,
            end_gated: false,
            policy: TagPolicy::default(),
            timeout: Duration::from_secs(5),
            interrupt: None,
        }
    }
}

impl WaitOptions {
    /// Wait for a capture reflecting all preceding writes.
    pub fn tagged(mut self, end_gated: bool) -> Self {
        self.tag = true;
        self.end_gated = end_gated;
        self
    }

    pub fn policy(mut self, policy: TagPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// The synchronization fields of a slow buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub begin_tag: u32,
    pub end_tag: u32,
    /// Capture counter, wraps at 16 bits
    pub count: u32,
}

impl Snapshot {
    pub fn from_slow(slow: &[i64]) -> Result<Snapshot> {
        if slow.len() < SLOW_MIN_LEN {
            return Err(Error::InvalidArgument(format!(
                "Slow buffer has {} elements, at least {} required",
                slow.len(),
                SLOW_MIN_LEN
            )));
        }
        let byte = |index: usize| (slow[index] as u32) & 0xff;
        Ok(Snapshot {
            begin_tag: slow[SLOW_BEGIN_TAG] as u32,
            end_tag: slow[SLOW_END_TAG] as u32,
            count: (byte(SLOW_COUNT_HI) << 8) | byte(SLOW_COUNT_LO),
        })
    }
}

fn width_mask(width: u8) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// Whether `tag` is at or after `target`, modulo `2^width`.
///
/// Tags less than half the tag range ahead of the target count as after it.
pub fn tag_reached(tag: u32, target: u32, width: u8) -> bool {
    let mask = width_mask(width);
    let ahead = tag.wrapping_sub(target) & mask;
    ahead <= mask >> 1
}

/// Applies `policy` when the capture for `expected` ended with a later tag.
pub fn check_tag(snapshot: &Snapshot, expected: u32, width: u8, policy: TagPolicy) -> Result<()> {
    let end = snapshot.end_tag & width_mask(width);
    if end == expected || !tag_reached(end, expected, width) {
        return Ok(());
    }
    match policy {
        TagPolicy::Ignore => Ok(()),
        TagPolicy::Warn => {
            log::warn!(
                "Tag advanced during acquisition: expected {}, got {} (began with {})",
                expected,
                end,
                snapshot.begin_tag
            );
            Ok(())
        }
        TagPolicy::Error => Err(Error::AcquisitionCollision {
            expected,
            begin: snapshot.begin_tag,
            end,
        }),
    }
}

fn read_scalar<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    name: &str,
    instance: &[Token],
) -> Result<i64> {
    match dev.reg_read(&[name], instance)?.pop() {
        Some(Value::Scalar(value)) => Ok(value),
        _ => Err(Error::InvalidArgument(format!(
            "Register {} is not a scalar",
            name
        ))),
    }
}

fn read_array<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    name: &str,
    instance: &[Token],
) -> Result<Vec<i64>> {
    match dev.reg_read(&[name], instance)?.pop() {
        Some(Value::Array(values)) => Ok(values),
        _ => Err(Error::InvalidArgument(format!(
            "Register {} is not an array",
            name
        ))),
    }
}

/// Advances the tag register by one and returns the new tag.
pub fn increment_tag<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    acq: &AcqConfig,
    instance: &[Token],
) -> Result<u32> {
    let info = dev.get_reg_info(&acq.tag, instance)?;
    let current = read_scalar(dev, &acq.tag, instance)? as u32;
    let next = current.wrapping_add(1) & width_mask(info.data_width);
    dev.reg_write(
        &[(acq.tag.as_str(), Value::from(info.decode_value(next)))],
        instance,
    )?;
    log::debug!("Tag {} -> {}", current, next);
    Ok(next)
}

pub fn read_snapshot<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    acq: &AcqConfig,
    instance: &[Token],
) -> Result<Snapshot> {
    Snapshot::from_slow(&read_array(dev, &acq.slow_data, instance)?)
}

/// Waits for the next acquisition.
///
/// With [`WaitOptions::tag`] the tag register is incremented first and the wait ends with
/// the first capture that began (and with [`WaitOptions::end_gated`], also ended) at or
/// after the new tag. Otherwise the wait ends when the capture counter changes.
pub fn wait_for_acq<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    acq: &AcqConfig,
    options: &WaitOptions,
    instance: &[Token],
) -> Result<Snapshot> {
    // unbounded if the timeout does not fit an Instant
    let deadline = Instant::now().checked_add(options.timeout);
    let (target, width) = if options.tag {
        let width = dev.get_reg_info(&acq.tag, instance)?.data_width;
        (Some(increment_tag(dev, acq, instance)?), width)
    } else {
        (None, 32)
    };
    let initial = read_snapshot(dev, acq, instance)?;

    let mut snapshot = initial;
    loop {
        match target {
            Some(tag) => {
                let begun = tag_reached(snapshot.begin_tag, tag, width);
                let ended = !options.end_gated || tag_reached(snapshot.end_tag, tag, width);
                if begun && ended {
                    check_tag(&snapshot, tag, width, options.policy)?;
                    return Ok(snapshot);
                }
            }
            None if snapshot.count != initial.count => return Ok(snapshot),
            None => (),
        }

        if options.interrupted() {
            return Err(Error::Interrupted);
        }
        let mut sleep = acq.poll_interval;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(options.timeout));
            }
            sleep = sleep.min(remaining);
        }
        thread::sleep(sleep);
        snapshot = read_snapshot(dev, acq, instance)?;
        log::trace!("Snapshot {:?}", snapshot);
    }
}

/// The keep mask bit of `channel`; channel 0 is the most significant of 12 bits.
pub fn channel_bit(channel: usize) -> u32 {
    0x800 >> channel
}

/// The keep mask enabling exactly `chans`.
pub fn channel_mask(chans: &[usize], channels: usize) -> Result<u32> {
    chans.iter().try_fold(0, |mask, &channel| {
        if channel < channels.min(MAX_CHANNELS) {
            Ok(mask | channel_bit(channel))
        } else {
            Err(Error::InvalidArgument(format!(
                "Channel {} out of range 0..{}",
                channel, channels
            )))
        }
    })
}

/// Enabled channels in the order their samples are interleaved.
pub fn enabled_channels(mask: u32) -> Vec<usize> {
    (0..MAX_CHANNELS)
        .filter(|channel| mask & channel_bit(*channel) != 0)
        .collect()
}

fn positions(mask: u32, chans: &[usize]) -> Result<(usize, Vec<usize>)> {
    let enabled = enabled_channels(mask);
    let positions = chans
        .iter()
        .map(|channel| {
            enabled
                .iter()
                .position(|enabled| enabled == channel)
                .ok_or(Error::ChannelDisabled {
                    channel: *channel,
                    mask,
                })
        })
        .collect::<Result<_>>()?;
    Ok((enabled.len(), positions))
}

/// Splits interleaved samples into one buffer per requested channel.
///
/// Sample `i` belongs to the `i % n`-th enabled channel, `n` being the number of enabled
/// channels.
pub fn deinterleave(samples: &[i64], mask: u32, chans: &[usize]) -> Result<Vec<Vec<i64>>> {
    let (enabled, positions) = positions(mask, chans)?;
    Ok(positions
        .into_iter()
        .map(|position| {
            samples
                .iter()
                .skip(position)
                .step_by(enabled)
                .copied()
                .collect()
        })
        .collect())
}

/// ADC samples per CIC output at decimation `ratio`
fn cic_samples(ratio: u32) -> f64 {
    f64::from(ratio) * f64::from(CIC_PERIOD)
}

/// The right shift the firmware applies to CIC output at decimation `ratio`.
pub fn wave_shift(ratio: u32) -> u32 {
    let cic_n = cic_samples(ratio);
    let bits = (cic_n * cic_n * LO_CORRECTION).log2();
    ((bits - 12.0) / 2.0).ceil().max(0.0) as u32
}

/// Full scale gain of the waveform path at decimation `ratio`.
pub fn waveform_gain(ratio: u32) -> f64 {
    let cic_n = cic_samples(ratio);
    let shift = wave_shift(ratio) as i32;
    16.0 * LO_CORRECTION * cic_n * cic_n * 4f64.powi(8 - shift) / 512.0 / 16.0
}

fn check_ratio(ratio: u32) -> Result<()> {
    if (1..=MAX_DECIMATION).contains(&ratio) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "Decimation {} out of range 1..={}",
            ratio, MAX_DECIMATION
        )))
    }
}

pub fn set_channel_mask<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    acq: &AcqConfig,
    chans: &[usize],
    instance: &[Token],
) -> Result<()> {
    let mask = channel_mask(chans, acq.channels)?;
    log::debug!("Channel mask {:#05x}", mask);
    dev.reg_write(&[(acq.chan_keep.as_str(), Value::from(mask))], instance)
}

pub fn set_decimate<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    acq: &AcqConfig,
    ratio: u32,
    instance: &[Token],
) -> Result<()> {
    check_ratio(ratio)?;
    dev.reg_write(&[(acq.decimation.as_str(), Value::from(ratio))], instance)
}

fn read_mask_and_ratio<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    acq: &AcqConfig,
    instance: &[Token],
) -> Result<(u32, u32)> {
    let values = dev.reg_read(&[acq.chan_keep.as_str(), acq.decimation.as_str()], instance)?;
    match values.as_slice() {
        [Value::Scalar(mask), Value::Scalar(ratio)] => {
            let ratio = *ratio as u32;
            check_ratio(ratio)?;
            Ok((*mask as u32 & 0xfff, ratio))
        }
        _ => Err(Error::InvalidArgument(format!(
            "{} and {} must be scalars",
            acq.chan_keep, acq.decimation
        ))),
    }
}

/// Reads the waveforms of `chans` scaled to full scale units.
pub fn get_channels<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    acq: &AcqConfig,
    chans: &[usize],
    instance: &[Token],
) -> Result<Vec<Vec<f64>>> {
    let (mask, ratio) = read_mask_and_ratio(dev, acq, instance)?;
    // fail before reading the whole circle buffer
    positions(mask, chans)?;
    let samples = read_array(dev, &acq.circle_data, instance)?;
    let gain = waveform_gain(ratio);
    Ok(deinterleave(&samples, mask, chans)?
        .into_iter()
        .map(|channel| channel.into_iter().map(|raw| raw as f64 / gain).collect())
        .collect())
}

/// Sample times of `chans` for a circle buffer of `len` samples.
pub fn timebase(
    len: usize,
    mask: u32,
    chans: &[usize],
    ratio: u32,
    adc_clock_hz: f64,
) -> Result<Vec<Vec<f64>>> {
    let (enabled, positions) = positions(mask, chans)?;
    let period = cic_samples(ratio) / adc_clock_hz;
    Ok(positions
        .into_iter()
        .map(|position| {
            let samples = len.saturating_sub(position).div_ceil(enabled);
            (0..samples).map(|k| k as f64 * period).collect()
        })
        .collect())
}

pub fn get_timebase<D: RegisterAccess + ?Sized>(
    dev: &mut D,
    acq: &AcqConfig,
    chans: &[usize],
    instance: &[Token],
) -> Result<Vec<Vec<f64>>> {
    let (mask, ratio) = read_mask_and_ratio(dev, acq, instance)?;
    let len = dev.get_reg_info(&acq.circle_data, instance)?.len();
    timebase(len, mask, chans, ratio, acq.adc_clock_hz)
}

/// Runs the acquisition cycle protocol for a set of channel groups.
///
/// Bit `i` of the flip and ready registers belongs to the `i`-th group. A device has no
/// atomic way to clear these bits, so concurrent servicers of the same device race
/// between reading and writing them.
#[derive(Debug, Clone)]
pub struct CycleServicer {
    acq: AcqConfig,
    groups: Vec<Vec<Token>>,
}

impl CycleServicer {
    /// `groups` holds the instance of every channel group.
    pub fn new(acq: AcqConfig, groups: impl IntoIterator<Item = Vec<Token>>) -> CycleServicer {
        CycleServicer {
            acq,
            groups: groups.into_iter().take(32).collect(),
        }
    }

    /// Services every group whose flip bit is set and returns the flip bits.
    ///
    /// `capture` is called once per flipped group between stamping the begin and end
    /// tags into the group's slow buffer.
    pub fn service<D, F>(&self, dev: &mut D, mut capture: F) -> Result<u32>
    where
        D: RegisterAccess + ?Sized,
        F: FnMut(&mut D, usize, &[Token]) -> Result<()>,
    {
        let acq = &self.acq;
        let (flip, ready) = match dev.reg_read(&[acq.flip.as_str(), acq.ready.as_str()], &[])?.as_slice() {
            [Value::Scalar(flip), Value::Scalar(ready)] => (*flip as u32, *ready as u32),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "{} and {} must be scalars",
                    acq.flip, acq.ready
                )));
            }
        };
        log::debug!("Cycle flip={:x} ready={:x}", flip, ready);

        let ready = ready & !flip;
        dev.reg_write(&[(acq.ready.as_str(), Value::from(ready))], &[])?;

        let flipped: Vec<(usize, &Vec<Token>)> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(index, _)| flip & (1 << index) != 0)
            .collect();

        let mut begin_tags = Vec::with_capacity(flipped.len());
        for (_, instance) in &flipped {
            begin_tags.push(read_scalar(dev, &acq.tag, instance)?);
        }
        for (index, instance) in &flipped {
            capture(dev, *index, instance)?;
        }
        for ((index, instance), begin) in flipped.iter().zip(begin_tags) {
            let end = read_scalar(dev, &acq.tag, instance)?;
            let mut slow = read_array(dev, &acq.slow_data, instance)?;
            if slow.len() < SLOW_MIN_LEN {
                return Err(Error::InvalidArgument(format!(
                    "Slow buffer of group {} has {} elements, at least {} required",
                    index,
                    slow.len(),
                    SLOW_MIN_LEN
                )));
            }
            slow[SLOW_BEGIN_TAG] = begin;
            slow[SLOW_END_TAG] = end;
            dev.reg_write(&[(acq.slow_data.as_str(), Value::Array(slow))], instance)?;
            log::debug!("Group {} captured with tags {}..{}", index, begin, end);
        }

        dev.reg_write(
            &[
                (acq.flip.as_str(), Value::from(0u32)),
                (acq.ready.as_str(), Value::from(ready | flip)),
            ],
            &[],
        )?;
        Ok(flip)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::test::MemDevice;
    use leep_protocol::Pair;
    use std::{cell::Cell, rc::Rc};

    const SCHEMA: &str = r#"{
        "circle_buf_flip": {"base_addr": 1, "data_width": 2},
        "llrf_circle_ready": {"base_addr": 2, "data_width": 2},
        "shell_0_dsp_tag": {"base_addr": 16, "data_width": 8},
        "shell_0_dsp_chan_keep": {"base_addr": 17, "data_width": 12},
        "shell_0_dsp_wave_samp_per": {"base_addr": 18, "data_width": 8},
        "shell_0_slow_data": {"base_addr": 256, "addr_width": 6, "data_width": 8},
        "shell_0_circle_data": {"base_addr": 512, "addr_width": 3, "data_width": 18, "sign": "signed"},
        "shell_1_dsp_tag": {"base_addr": 32, "data_width": 8},
        "shell_1_slow_data": {"base_addr": 320, "addr_width": 6, "data_width": 8}
    }"#;

    fn device() -> MemDevice {
        let mut dev = MemDevice::new(SCHEMA);
        dev.acq.poll_interval = Duration::from_millis(1);
        dev
    }

    /// Replaces the slow buffer tags with the next script entry on every slow buffer read.
    fn script_slow(dev: &mut MemDevice, script: Vec<(u32, u32, u32)>) -> Rc<Cell<usize>> {
        let reads = Rc::new(Cell::new(0));
        let counter = reads.clone();
        dev.on_read = Some(Box::new(move |mem, registers| {
            let Some(slow) = registers.iter().find(|info| info.name.ends_with("slow_data")) else {
                return;
            };
            let step = counter.get().min(script.len() - 1);
            counter.set(counter.get() + 1);
            let (begin, end, count) = script[step];
            let base = slow.base_addr;
            mem.insert(base + SLOW_BEGIN_TAG as u32, begin);
            mem.insert(base + SLOW_END_TAG as u32, end);
            mem.insert(base + SLOW_COUNT_HI as u32, count >> 8);
            mem.insert(base + SLOW_COUNT_LO as u32, count & 0xff);
        }));
        reads
    }

    #[test]
    fn tag_comparison_wraps() {
        assert!(tag_reached(5, 5, 8));
        assert!(tag_reached(6, 5, 8));
        assert!(!tag_reached(4, 5, 8));
        assert!(tag_reached(0, 255, 8));
        assert!(tag_reached(2, 254, 8));
        assert!(!tag_reached(254, 255, 8));
        assert!(!tag_reached(200, 10, 8));
        assert!(tag_reached(0, u32::MAX, 32));
    }

    #[test]
    fn tag_increment_wraps() {
        let mut dev = device();
        dev.poke("shell_0_dsp_tag", &[254]);
        let acq = dev.acq.clone();
        assert_eq!(increment_tag(&mut dev, &acq, &[0.into()]).unwrap(), 255);
        assert_eq!(increment_tag(&mut dev, &acq, &[0.into()]).unwrap(), 0);
        assert_eq!(dev.peek("shell_0_dsp_tag"), vec![0]);
    }

    #[test]
    fn tagged_wait_skips_stale_capture() {
        let mut dev = device();
        dev.poke("shell_0_dsp_tag", &[6]);
        let reads = script_slow(&mut dev, vec![(6, 6, 1), (6, 6, 1), (7, 7, 2)]);
        let acq = dev.acq.clone();
        let options = WaitOptions::default().tagged(true).policy(TagPolicy::Error);
        let snapshot = wait_for_acq(&mut dev, &acq, &options, &[0.into()]).unwrap();
        assert_eq!(snapshot.begin_tag, 7);
        assert_eq!(snapshot.end_tag, 7);
        assert_eq!(reads.get(), 3);
        assert_eq!(dev.peek("shell_0_dsp_tag"), vec![7]);
    }

    #[test]
    fn end_gating_waits_for_end_tag() {
        let mut dev = device();
        dev.poke("shell_0_dsp_tag", &[6]);
        let script = vec![(7, 6, 1), (7, 7, 2)];
        let acq = dev.acq.clone();

        let reads = script_slow(&mut dev, script.clone());
        let options = WaitOptions::default().tagged(false);
        let snapshot = wait_for_acq(&mut dev, &acq, &options, &[0.into()]).unwrap();
        assert_eq!(snapshot.end_tag, 6);
        assert_eq!(reads.get(), 1);

        dev.poke("shell_0_dsp_tag", &[6]);
        let reads = script_slow(&mut dev, script);
        let options = WaitOptions::default().tagged(true);
        let snapshot = wait_for_acq(&mut dev, &acq, &options, &[0.into()]).unwrap();
        assert_eq!(snapshot.end_tag, 7);
        assert_eq!(reads.get(), 2);
    }

    #[test]
    fn collision_policy() {
        for (policy, fails) in [
            (TagPolicy::Ignore, false),
            (TagPolicy::Warn, false),
            (TagPolicy::Error, true),
        ] {
            let mut dev = device();
            dev.poke("shell_0_dsp_tag", &[9]);
            script_slow(&mut dev, vec![(10, 11, 1)]);
            let acq = dev.acq.clone();
            let options = WaitOptions::default().tagged(true).policy(policy);
            match wait_for_acq(&mut dev, &acq, &options, &[0.into()]) {
                Err(Error::AcquisitionCollision {
                    expected,
                    begin,
                    end,
                }) => {
                    assert!(fails);
                    assert_eq!((expected, begin, end), (10, 10, 11));
                }
                Ok(snapshot) => {
                    assert!(!fails);
                    assert_eq!(snapshot.end_tag, 11);
                }
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
    }

    #[test]
    fn wait_times_out() {
        let mut dev = device();
        dev.poke("shell_0_dsp_tag", &[3]);
        script_slow(&mut dev, vec![(3, 3, 1)]);
        let acq = dev.acq.clone();
        let options = WaitOptions::default()
            .tagged(true)
            .timeout(Duration::from_millis(20));
        let start = Instant::now();
        assert!(matches!(
            wait_for_acq(&mut dev, &acq, &options, &[0.into()]),
            Err(Error::Timeout(_))
        ));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn unbounded_wait() {
        let mut dev = device();
        let reads = script_slow(&mut dev, vec![(0, 0, 1), (0, 0, 1), (0, 0, 2)]);
        let acq = dev.acq.clone();
        let options = WaitOptions::default().timeout(Duration::MAX);
        let snapshot = wait_for_acq(&mut dev, &acq, &options, &[0.into()]).unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(reads.get(), 3);

        let mut dev = device();
        dev.poke("shell_0_dsp_tag", &[3]);
        script_slow(&mut dev, vec![(4, 4, 1)]);
        let options = WaitOptions::default().tagged(true).timeout(Duration::MAX);
        let snapshot = wait_for_acq(&mut dev, &acq, &options, &[0.into()]).unwrap();
        assert_eq!(snapshot.begin_tag, 4);
    }

    #[test]
    fn wait_observes_interrupt() {
        let mut dev = device();
        script_slow(&mut dev, vec![(0, 0, 1)]);
        let acq = dev.acq.clone();
        let flag = Arc::new(AtomicBool::new(true));
        let options = WaitOptions::default().tagged(true).interrupt(flag);
        assert!(matches!(
            wait_for_acq(&mut dev, &acq, &options, &[0.into()]),
            Err(Error::Interrupted)
        ));
    }

    #[test]
    fn untagged_wait_follows_counter() {
        let mut dev = device();
        let reads = script_slow(&mut dev, vec![(0, 0, 0x1ff), (0, 0, 0x1ff), (0, 0, 0x200)]);
        let acq = dev.acq.clone();
        let snapshot = wait_for_acq(&mut dev, &acq, &WaitOptions::default(), &[0.into()]).unwrap();
        assert_eq!(snapshot.count, 0x200);
        assert_eq!(reads.get(), 3);
        // the tag is left alone
        assert!(dev.writes.is_empty());
    }

    #[test]
    fn short_slow_buffer() {
        assert!(Snapshot::from_slow(&[0; 34]).is_err());
        let mut slow = vec![0; SLOW_MIN_LEN];
        slow[SLOW_COUNT_HI] = 0x12;
        slow[SLOW_COUNT_LO] = 0x34;
        slow[SLOW_BEGIN_TAG] = 5;
        slow[SLOW_END_TAG] = 6;
        assert_eq!(
            Snapshot::from_slow(&slow).unwrap(),
            Snapshot {
                begin_tag: 5,
                end_tag: 6,
                count: 0x1234
            }
        );
    }

    #[test]
    fn channel_masks() {
        assert_eq!(channel_mask(&[0, 11], MAX_CHANNELS).unwrap(), 0x801);
        assert_eq!(channel_mask(&[], MAX_CHANNELS).unwrap(), 0);
        assert!(channel_mask(&[12], MAX_CHANNELS).is_err());
        assert!(channel_mask(&[4], 4).is_err());
        assert_eq!(enabled_channels(0x801), vec![0, 11]);
        assert_eq!(enabled_channels(0xf000), Vec::<usize>::new());
    }

    #[test]
    fn deinterleave_by_enabled_count() {
        let mask = channel_mask(&[0, 2, 5], MAX_CHANNELS).unwrap();
        let samples = [10, 20, 50, 11, 21, 51, 12];
        let split = deinterleave(&samples, mask, &[5, 0]).unwrap();
        assert_eq!(split, vec![vec![50, 51], vec![10, 11, 12]]);

        match deinterleave(&samples, mask, &[1]) {
            Err(Error::ChannelDisabled { channel, mask: m }) => {
                assert_eq!(channel, 1);
                assert_eq!(m, mask);
            }
            other => panic!("expected ChannelDisabled, got {:?}", other),
        }
    }

    #[test]
    fn decimation_gain() {
        assert_eq!(wave_shift(1), 0);
        assert_eq!(wave_shift(255), 7);
        let expected = LO_CORRECTION * 1089.0 * 128.0;
        assert!((waveform_gain(1) - expected).abs() < 1e-6);
        let cic_n = 255.0 * 33.0;
        let expected = LO_CORRECTION * cic_n * cic_n * 4.0 / 512.0;
        assert!((waveform_gain(255) / expected - 1.0).abs() < 1e-12);
    }

    #[test]
    fn gain_of_any_ratio_is_finite() {
        for ratio in [0, 256, 0x0800_0000, u32::MAX] {
            assert!(wave_shift(ratio) < 64, "ratio={}", ratio);
            assert!(waveform_gain(ratio).is_finite(), "ratio={}", ratio);
        }
        let times = timebase(2, 0x800, &[0], u32::MAX, 1e8).unwrap();
        assert!(times[0][1] > 0.0 && times[0][1].is_finite());
        // 0.70469 * 33^2 * 4^8 / 512
        assert!((waveform_gain(1) - 98_228.0).abs() < 1.0);
    }

    #[test]
    fn decimation_range() {
        let mut dev = device();
        let acq = dev.acq.clone();
        assert!(set_decimate(&mut dev, &acq, 0, &[0.into()]).is_err());
        assert!(set_decimate(&mut dev, &acq, 256, &[0.into()]).is_err());
        set_decimate(&mut dev, &acq, 255, &[0.into()]).unwrap();
        assert_eq!(dev.peek("shell_0_dsp_wave_samp_per"), vec![255]);
    }

    #[test]
    fn scaled_channels_and_timebase() {
        let mut dev = device();
        let acq = dev.acq.clone();
        set_channel_mask(&mut dev, &acq, &[0, 1, 3], &[0.into()]).unwrap();
        assert_eq!(dev.peek("shell_0_dsp_chan_keep"), vec![0xd00]);
        set_decimate(&mut dev, &acq, 2, &[0.into()]).unwrap();
        let raw: Vec<i64> = vec![100, -100, 7, 200, -200, 8, 300, -300];
        dev.reg_write(&[("circle_data", raw.into())], &[0.into()])
            .unwrap();

        let gain = waveform_gain(2);
        let channels = get_channels(&mut dev, &acq, &[1, 0], &[0.into()]).unwrap();
        assert_eq!(channels.len(), 2);
        let expect = |raw: &[i64]| raw.iter().map(|v| *v as f64 / gain).collect::<Vec<_>>();
        assert_eq!(channels[0], expect(&[-100, -200, -300]));
        assert_eq!(channels[1], expect(&[100, 200, 300]));

        let times = get_timebase(&mut dev, &acq, &[3, 0], &[0.into()]).unwrap();
        let period = 66.0 / acq.adc_clock_hz;
        assert_eq!(times[0], vec![0.0, period]);
        assert_eq!(times[1], vec![0.0, period, 2.0 * period]);

        assert!(matches!(
            get_channels(&mut dev, &acq, &[2], &[0.into()]),
            Err(Error::ChannelDisabled { channel: 2, .. })
        ));
    }

    #[test]
    fn cycle_service() {
        let mut dev = device();
        dev.poke("circle_buf_flip", &[0b01]);
        dev.poke("llrf_circle_ready", &[0b11]);
        dev.poke("shell_0_dsp_tag", &[5]);
        dev.poke("shell_1_dsp_tag", &[40]);

        let servicer = CycleServicer::new(dev.acq.clone(), [vec![0.into()], vec![1.into()]]);
        let mut captured = Vec::new();
        let flip = servicer
            .service(&mut dev, |dev, group, instance| {
                captured.push(group);
                // a write landing during the capture
                dev.reg_write(&[("dsp_tag", 6.into())], instance)
            })
            .unwrap();

        assert_eq!(flip, 0b01);
        assert_eq!(captured, vec![0]);
        assert_eq!(dev.writes[0], vec![Pair::write(2, 0b10)]);
        assert_eq!(dev.peek("circle_buf_flip"), vec![0]);
        assert_eq!(dev.peek("llrf_circle_ready"), vec![0b11]);

        let slow = dev.peek("shell_0_slow_data");
        assert_eq!((slow[SLOW_BEGIN_TAG], slow[SLOW_END_TAG]), (5, 6));
        assert!(dev.peek("shell_1_slow_data").iter().all(|v| *v == 0));
    }

    #[test]
    fn idle_cycle_only_touches_flags() {
        let mut dev = device();
        dev.poke("llrf_circle_ready", &[0b11]);
        let servicer = CycleServicer::new(dev.acq.clone(), [vec![0.into()]]);
        let flip = servicer
            .service(&mut dev, |_, _, _| panic!("no group flipped"))
            .unwrap();
        assert_eq!(flip, 0);
        assert_eq!(dev.writes.len(), 2);
        assert_eq!(dev.peek("llrf_circle_ready"), vec![0b11]);
    }
}
