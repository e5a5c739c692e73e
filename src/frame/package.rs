//! Streaming spectrum package frame.

use tracing::trace;

use super::codec::{read_i16_le, read_u16_le, read_u32_le};
use crate::{AcquisitionError, Result};

/// Number of channels the detector hardware resolves.
pub const HARDWARE_CHANNELS: usize = 2048;

const CHANNEL_BYTES: usize = HARDWARE_CHANNELS * 2;
const CHANNELS_OFFSET: usize = 4;
const FIELDS_OFFSET: usize = CHANNELS_OFFSET + CHANNEL_BYTES; // 4100

/// One acquisition package as streamed by the detector.
///
/// Byte layout of the 4166-byte frame:
///
/// | offset | size | field                             |
/// |--------|------|-----------------------------------|
/// | 0      | 4    | header `"UUD0"`                   |
/// | 4      | 4096 | 2048 × u16 channel counts         |
/// | 4100   | 4    | neutron count                     |
/// | 4104   | 4    | pile-up count                     |
/// | 4108   | 2    | temperature (tenths of °C)        |
/// | 4110   | 2    | raw temperature (ADC units)       |
/// | 4112   | 4    | timestamp (s since stream start)  |
/// | 4116   | 2    | detector code                     |
/// | 4118   | 2    | gain                              |
/// | 4120   | 26   | reserved                          |
/// | 4146   | 20   | tail; last two bytes are `"66"`   |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFrame {
    pub channels: Box<[u16; HARDWARE_CHANNELS]>,
    pub neutron_count: u32,
    pub pileup_count: u32,
    /// Temperature in tenths of a degree Celsius.
    pub temperature: i16,
    /// Raw temperature sensor reading, uncalibrated.
    pub raw_temperature: i16,
    /// Seconds elapsed since the detector started streaming.
    pub timestamp: u32,
    pub detector_code: u16,
    pub gain: u16,
}

impl PackageFrame {
    /// Frame header bytes.
    pub const HEADER: &'static [u8] = b"UUD0";

    /// Tail sentinel occupying the last two bytes of the tail region.
    pub const TAIL_SENTINEL: &'static [u8] = b"66";

    /// Total frame size in bytes.
    pub const SIZE: usize = 4166;

    /// Check size, header and tail sentinel without decoding any fields.
    ///
    /// Every package is validated before it is trusted; a frame that fails
    /// here is dropped by the link and never reaches consumers.
    pub fn validate(data: &[u8]) -> Result<()> {
        if data.len() != Self::SIZE {
            return Err(AcquisitionError::framing(
                "package frame",
                format!("expected {} bytes, got {}", Self::SIZE, data.len()),
            ));
        }
        if &data[..Self::HEADER.len()] != Self::HEADER {
            return Err(AcquisitionError::framing(
                "package frame",
                format!("bad header {:02X?}", &data[..Self::HEADER.len()]),
            ));
        }
        let sentinel = &data[Self::SIZE - Self::TAIL_SENTINEL.len()..];
        if sentinel != Self::TAIL_SENTINEL {
            return Err(AcquisitionError::framing(
                "package frame",
                format!("bad tail sentinel {sentinel:02X?}"),
            ));
        }
        Ok(())
    }

    /// Decode a validated frame.
    ///
    /// Call [`Self::validate`] first; `parse` repeats the check so a stray
    /// byte slice can never decode silently.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::validate(data)?;

        let mut channels = Box::new([0u16; HARDWARE_CHANNELS]);
        for (i, slot) in channels.iter_mut().enumerate() {
            *slot = read_u16_le(data, CHANNELS_OFFSET + i * 2)?;
        }

        let frame = Self {
            channels,
            neutron_count: read_u32_le(data, FIELDS_OFFSET)?,
            pileup_count: read_u32_le(data, FIELDS_OFFSET + 4)?,
            temperature: read_i16_le(data, FIELDS_OFFSET + 8)?,
            raw_temperature: read_i16_le(data, FIELDS_OFFSET + 10)?,
            timestamp: read_u32_le(data, FIELDS_OFFSET + 12)?,
            detector_code: read_u16_le(data, FIELDS_OFFSET + 16)?,
            gain: read_u16_le(data, FIELDS_OFFSET + 18)?,
        };
        trace!(
            timestamp = frame.timestamp,
            total = frame.total_count(),
            "parsed package frame"
        );
        Ok(frame)
    }

    /// Sum of all channel counts.
    pub fn total_count(&self) -> u64 {
        self.channels.iter().map(|&c| u64::from(c)).sum()
    }

    /// Encode the frame back to its 4166-byte wire form.
    ///
    /// Used by instrument simulators and tests; reserved bytes are written
    /// as zero and the tail carries only the sentinel.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        out[..4].copy_from_slice(Self::HEADER);
        for (i, &c) in self.channels.iter().enumerate() {
            let at = CHANNELS_OFFSET + i * 2;
            out[at..at + 2].copy_from_slice(&c.to_le_bytes());
        }
        out[FIELDS_OFFSET..FIELDS_OFFSET + 4].copy_from_slice(&self.neutron_count.to_le_bytes());
        out[FIELDS_OFFSET + 4..FIELDS_OFFSET + 8]
            .copy_from_slice(&self.pileup_count.to_le_bytes());
        out[FIELDS_OFFSET + 8..FIELDS_OFFSET + 10]
            .copy_from_slice(&self.temperature.to_le_bytes());
        out[FIELDS_OFFSET + 10..FIELDS_OFFSET + 12]
            .copy_from_slice(&self.raw_temperature.to_le_bytes());
        out[FIELDS_OFFSET + 12..FIELDS_OFFSET + 16]
            .copy_from_slice(&self.timestamp.to_le_bytes());
        out[FIELDS_OFFSET + 16..FIELDS_OFFSET + 18]
            .copy_from_slice(&self.detector_code.to_le_bytes());
        out[FIELDS_OFFSET + 18..FIELDS_OFFSET + 20].copy_from_slice(&self.gain.to_le_bytes());
        out[Self::SIZE - Self::TAIL_SENTINEL.len()..].copy_from_slice(Self::TAIL_SENTINEL);
        out
    }
}
