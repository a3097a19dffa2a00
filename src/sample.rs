//! Raw-sample decoding
//!
//! The hub delivers captured radio signals as a hex-encoded byte stream.
//! Decoding expands every byte into eight signal samples, least-significant
//! bit first, so the timeline can be plotted or replayed. There is no
//! bit-to-hex encode path; captures always originate on the device.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One entry per sample, 0 or 1, in capture order.
pub type Timeline = Vec<u8>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("hex data has odd length ({0} digits)")]
    OddLength(usize),
    #[error("invalid hex digit {found:?} at offset {offset}")]
    InvalidDigit { found: char, offset: usize },
}

/// Expand a hex-encoded byte stream into a per-sample timeline.
///
/// Each byte (two hex digits) yields eight samples, least-significant bit
/// first; consecutive bytes are concatenated in order. The result length is
/// always `8 * digits / 2`.
pub fn decode(hex: &str) -> Result<Timeline, CodecError> {
    let digits = hex.chars().count();
    if digits % 2 != 0 {
        return Err(CodecError::OddLength(digits));
    }

    let mut timeline = Vec::with_capacity(digits / 2 * 8);
    let mut byte = 0u8;

    for (offset, found) in hex.chars().enumerate() {
        let digit = found
            .to_digit(16)
            .ok_or(CodecError::InvalidDigit { found, offset })? as u8;

        if offset % 2 == 0 {
            byte = digit << 4;
        } else {
            byte |= digit;
            for k in 0..8 {
                timeline.push((byte >> k) & 1);
            }
        }
    }

    Ok(timeline)
}

/// Canonical persisted form of a capture: signal length in seconds, sampling
/// interval in microseconds and the raw bytes as uppercase hex. This is the
/// export format; it round-trips through serde and [`decode`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SampleRecord {
    pub time: f64,
    pub interval: u32,
    pub data: String,
}

impl SampleRecord {
    /// Build a record from device-reported values, validating and
    /// case-normalizing the hex payload.
    pub fn new(time: f64, interval: u32, data: &str) -> Result<Self, CodecError> {
        decode(data)?;

        Ok(Self {
            time,
            interval,
            data: data.to_ascii_uppercase(),
        })
    }

    /// Timeline expansion of the stored payload. Fallible because records
    /// may also enter through deserialization.
    pub fn timeline(&self) -> Result<Timeline, CodecError> {
        decode(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod decode {
        use super::*;

        #[test]
        fn expands_bytes_lsb_first() {
            let timeline = decode("FF00").unwrap();
            assert_eq!(timeline, vec![1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
        }

        #[test]
        fn bit_order_within_a_byte() {
            // 0x01 = 0b00000001, least-significant bit comes out first
            assert_eq!(decode("01").unwrap(), vec![1, 0, 0, 0, 0, 0, 0, 0]);
            // 0x80 = 0b10000000
            assert_eq!(decode("80").unwrap(), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        }

        #[test]
        fn length_is_eight_per_byte() {
            for hex in ["", "00", "A5B4", "0123456789ABCDEF"] {
                let timeline = decode(hex).unwrap();
                assert_eq!(timeline.len(), hex.len() / 2 * 8);
                assert_eq!(timeline.len() % 8, 0);
            }
        }

        #[test]
        fn lowercase_digits_accepted() {
            assert_eq!(decode("ff").unwrap(), decode("FF").unwrap());
        }

        #[test]
        fn rejects_odd_length() {
            assert_eq!(decode("ABC"), Err(CodecError::OddLength(3)));
        }

        #[test]
        fn rejects_invalid_digit() {
            assert_eq!(
                decode("0G"),
                Err(CodecError::InvalidDigit {
                    found: 'G',
                    offset: 1
                })
            );
        }
    }

    mod record {
        use super::*;

        #[test]
        fn normalizes_hex_to_uppercase() {
            let record = SampleRecord::new(2.0, 100, "ff00").unwrap();
            assert_eq!(record.data, "FF00");
        }

        #[test]
        fn rejects_malformed_payload() {
            assert!(SampleRecord::new(2.0, 100, "F").is_err());
            assert!(SampleRecord::new(2.0, 100, "ZZ").is_err());
        }

        #[test]
        fn export_format_round_trips() {
            let record = SampleRecord::new(2.0, 100, "FF00").unwrap();

            let json = serde_json::to_string(&record).unwrap();
            assert_eq!(json, r#"{"time":2.0,"interval":100,"data":"FF00"}"#);

            let restored: SampleRecord = serde_json::from_str(&json).unwrap();
            assert_eq!(restored, record);
            assert_eq!(restored.timeline().unwrap(), record.timeline().unwrap());
        }

        #[test]
        fn parses_device_style_integer_time() {
            let restored: SampleRecord =
                serde_json::from_str(r#"{"time":2,"interval":100,"data":"FF00"}"#).unwrap();
            assert_eq!(restored.time, 2.0);
        }
    }
}
