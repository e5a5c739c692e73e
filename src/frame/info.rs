//! Detector identity frame sent in response to the get-info command.

use tracing::trace;

use super::codec::{read_i16_le, read_u16_le};
use crate::{AcquisitionError, Result};

/// Byte layout of the 28-byte info frame:
///
/// | offset | size | field                        |
/// |--------|------|------------------------------|
/// | 0      | 2    | header `"GD"`                |
/// | 2      | 2    | gain                         |
/// | 4      | 2    | K-40 channel                 |
/// | 6      | 2    | detector code                |
/// | 8      | 2    | Cs-137 calibration peak      |
/// | 10     | 2    | K-40 calibration peak        |
/// | 12     | 2    | padding                      |
/// | 14     | 1    | temperature valid flag       |
/// | 15     | 2    | temperature (tenths of °C)   |
/// | 17     | 6    | serial number                |
/// | 23     | 3    | padding                      |
/// | 26     | 2    | tail                         |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoFrame {
    pub gain: u16,
    pub k40_channel: u16,
    pub detector_code: u16,
    pub cs_peak_channel: u16,
    pub k40_peak_channel: u16,
    /// Temperature in tenths of a degree Celsius; `None` when the detector
    /// flags the reading as invalid.
    pub temperature: Option<i16>,
    pub serial: [u8; 6],
}

impl InfoFrame {
    /// Frame header bytes.
    pub const HEADER: &'static [u8] = b"GD";

    /// Total frame size in bytes.
    pub const SIZE: usize = 28;

    /// Parse an info frame from exactly [`Self::SIZE`] bytes.
    ///
    /// The header bytes are validated; the rest of the frame is taken as-is.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(AcquisitionError::framing(
                "info frame",
                format!("expected {} bytes, got {}", Self::SIZE, data.len()),
            ));
        }
        if &data[..Self::HEADER.len()] != Self::HEADER {
            return Err(AcquisitionError::framing(
                "info frame",
                format!("bad header {:02X?}", &data[..Self::HEADER.len()]),
            ));
        }

        let temperature_valid = data[14] != 0;
        let temperature = if temperature_valid { Some(read_i16_le(data, 15)?) } else { None };

        let mut serial = [0u8; 6];
        serial.copy_from_slice(&data[17..23]);

        let frame = Self {
            gain: read_u16_le(data, 2)?,
            k40_channel: read_u16_le(data, 4)?,
            detector_code: read_u16_le(data, 6)?,
            cs_peak_channel: read_u16_le(data, 8)?,
            k40_peak_channel: read_u16_le(data, 10)?,
            temperature,
            serial,
        };
        trace!(
            detector_code = frame.detector_code,
            gain = frame.gain,
            "parsed info frame"
        );
        Ok(frame)
    }

    /// Serial number rendered as ASCII, with non-printable bytes hex-escaped.
    pub fn serial_string(&self) -> String {
        self.serial
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() {
                    (b as char).to_string()
                } else {
                    format!("\\x{b:02X}")
                }
            })
            .collect()
    }

    /// Encode the frame back to its 28-byte wire form.
    ///
    /// Used by instrument simulators and tests; padding and tail bytes are
    /// written as zero.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..2].copy_from_slice(Self::HEADER);
        out[2..4].copy_from_slice(&self.gain.to_le_bytes());
        out[4..6].copy_from_slice(&self.k40_channel.to_le_bytes());
        out[6..8].copy_from_slice(&self.detector_code.to_le_bytes());
        out[8..10].copy_from_slice(&self.cs_peak_channel.to_le_bytes());
        out[10..12].copy_from_slice(&self.k40_peak_channel.to_le_bytes());
        if let Some(t) = self.temperature {
            out[14] = 1;
            out[15..17].copy_from_slice(&t.to_le_bytes());
        }
        out[17..23].copy_from_slice(&self.serial);
        out
    }
}
