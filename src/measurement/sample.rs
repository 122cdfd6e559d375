//! Samples and instrument payload decoding.
//!
//! A Keithley 236 reports every reading as `source,measure` in its
//! `+1.2345E-03` notation, and a completed sweep as the concatenation of
//! all its `source,measure` pairs.

use crate::error::{AppResult, DaqError};
use crate::format::column;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One recorded line of an output file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Gate source level [V], NaN without a gate generator
    pub gate_voltage: f64,
    /// Gate leakage [A], NaN without a gate generator
    pub gate_current: f64,
    /// Drain-source source level [V]
    pub drain_voltage: f64,
    /// Drain current [A]
    pub drain_current: f64,
}

impl Sample {
    /// Data line: four right-aligned 12 character columns.
    pub fn to_line(&self) -> String {
        let columns = [
            column(self.gate_voltage),
            column(self.gate_current),
            column(self.drain_voltage),
            column(self.drain_current),
        ];
        format!("{}\n", columns.join(" "))
    }

    /// Parse a data line back. Header lines (`#`) and short lines yield
    /// `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let values: Vec<f64> = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .ok()?;
        match values[..] {
            [gate_voltage, gate_current, drain_voltage, drain_current] => Some(Self {
                gate_voltage,
                gate_current,
                drain_voltage,
                drain_current,
            }),
            _ => None,
        }
    }

    /// Drain-source resistance, if the current is large enough to divide by.
    pub fn resistance(&self) -> Option<f64> {
        if self.drain_current.abs() > MIN_RESISTANCE_CURRENT {
            Some(self.drain_voltage / self.drain_current)
        } else {
            None
        }
    }
}

/// Below this drain current [A] no resistance is computed.
pub const MIN_RESISTANCE_CURRENT: f64 = 1.0e-14;

/// A single `source,measure` reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Programmed source level
    pub source: f64,
    /// Measured complementary quantity
    pub measure: f64,
}

impl Reading {
    /// Decode a DC reading.
    ///
    /// # Errors
    /// `MalformedPayload` with fewer than two fields or a non-numeric field.
    pub fn decode(payload: &str) -> AppResult<Self> {
        let fields = fields(payload)?;
        Ok(Self {
            source: fields[0],
            measure: fields[1],
        })
    }
}

/// Decode a sweep buffer into `(source, measure)` pairs in buffer order.
///
/// A trailing unpaired field is dropped with a warning.
///
/// # Errors
/// `MalformedPayload` with fewer than two fields or a non-numeric field.
pub fn decode_sweep(payload: &str) -> AppResult<Vec<Reading>> {
    let fields = fields(payload)?;
    if fields.len() % 2 != 0 {
        warn!(fields = fields.len(), "sweep buffer has an unpaired trailing field");
    }
    Ok(fields
        .chunks_exact(2)
        .map(|pair| Reading {
            source: pair[0],
            measure: pair[1],
        })
        .collect())
}

fn fields(payload: &str) -> AppResult<Vec<f64>> {
    let fields = payload
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| {
            field.parse::<f64>().map_err(|_| {
                DaqError::MalformedPayload(format!("field '{}' is not a number", field))
            })
        })
        .collect::<AppResult<Vec<f64>>>()?;
    if fields.len() < 2 {
        return Err(DaqError::MalformedPayload(format!(
            "expected at least 2 fields, got {} in '{}'",
            fields.len(),
            payload.trim()
        )));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        ((a - b) / b).abs() < 5e-6
    }

    #[test]
    fn test_line_layout() {
        let sample = Sample {
            gate_voltage: 0.5,
            gate_current: 1.0e-12,
            drain_voltage: 0.1,
            drain_current: -2.5e-5,
        };
        assert_eq!(
            sample.to_line(),
            "         0.5        1e-12          0.1     -2.5e-05\n"
        );
    }

    #[test]
    fn test_line_parses_back_within_precision() {
        let sample = Sample {
            gate_voltage: -1.23456789,
            gate_current: 3.14159265e-11,
            drain_voltage: 0.333333333,
            drain_current: 1.0e-15,
        };
        let parsed = Sample::parse_line(&sample.to_line()).unwrap();
        assert!(close(parsed.gate_voltage, sample.gate_voltage));
        assert!(close(parsed.gate_current, sample.gate_current));
        assert!(close(parsed.drain_voltage, sample.drain_voltage));
        assert!(close(parsed.drain_current, sample.drain_current));
    }

    #[test]
    fn test_nan_gate_columns_parse() {
        let sample = Sample {
            gate_voltage: f64::NAN,
            gate_current: f64::NAN,
            drain_voltage: 1.0,
            drain_current: 1.0e-3,
        };
        let parsed = Sample::parse_line(&sample.to_line()).unwrap();
        assert!(parsed.gate_voltage.is_nan());
        assert_eq!(parsed.drain_current, 1.0e-3);
    }

    #[test]
    fn test_header_lines_are_skipped() {
        assert!(Sample::parse_line("# V_G[V]").is_none());
        assert!(Sample::parse_line("   ").is_none());
        assert!(Sample::parse_line("1 2 3").is_none());
    }

    #[test]
    fn test_resistance_guard() {
        let mut sample = Sample {
            gate_voltage: 0.0,
            gate_current: 0.0,
            drain_voltage: 0.1,
            drain_current: 1.0e-15,
        };
        assert_eq!(sample.resistance(), None);
        sample.drain_current = 1.0e-5;
        assert!(close(sample.resistance().unwrap(), 1.0e4));
    }

    #[test]
    fn test_reading_decode() {
        let reading = Reading::decode("+1.0000E+00,-2.5000E-06\r\n").unwrap();
        assert_eq!(reading.source, 1.0);
        assert_eq!(reading.measure, -2.5e-6);
    }

    #[test]
    fn test_short_payload_is_malformed() {
        assert!(matches!(
            Reading::decode("+1.0000E+00"),
            Err(DaqError::MalformedPayload(_))
        ));
        assert!(matches!(decode_sweep(""), Err(DaqError::MalformedPayload(_))));
        assert!(matches!(
            decode_sweep("1,abc"),
            Err(DaqError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_sweep_pairs_in_order() {
        let pairs = decode_sweep("0,1E-3,0.5,2E-3,1,3E-3,").unwrap();
        let sources: Vec<f64> = pairs.iter().map(|r| r.source).collect();
        assert_eq!(sources, vec![0.0, 0.5, 1.0]);
        assert_eq!(pairs[2].measure, 3e-3);

        assert_eq!(decode_sweep("0,1,2").unwrap().len(), 1);
    }
}
