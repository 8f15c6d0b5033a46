//! Synthetic waveforms for demos and the simulated instrument.

use std::f64::consts::PI;

/// Rows in the demo waveform table.
pub const TABLE_ROWS:usize = 100;

const TABLE_AMPLITUDE_V:f64 = 5.0;
const TABLE_OFFSET_V:f64 = 5.0;
const TABLE_RATE:f64 = 0.1;

/// `n` samples of `amplitude * sin(2π * cycles_per_sample * i + phase)`.
pub fn sine(n:usize, amplitude:f64, cycles_per_sample:f64, phase:f64) -> Vec<f64> {
    (0..n).map(|i| amplitude * (2.0 * PI * cycles_per_sample * i as f64 + phase).sin()).collect()
}

/// Time/voltage rows of a slow sine riding on a DC offset, `5·sin(0.1·t) + 5` for integer `t`.
pub fn waveform_table(rows:usize) -> Vec<(f64, f64)> {
    (0..rows)
        .map(|t| {
            let t = t as f64;
            (t, TABLE_AMPLITUDE_V * (TABLE_RATE * t).sin() + TABLE_OFFSET_V)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_hits_its_peaks() {
        let s = sine(4, 2.0, 0.25, 0.0);
        assert!(s[0].abs() < 1e-12);
        assert!((s[1] - 2.0).abs() < 1e-12);
        assert!((s[3] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn table_stays_between_zero_and_ten_volts() {
        let table = waveform_table(TABLE_ROWS);
        assert_eq!(table.len(), 100);
        assert_eq!(table[0], (0.0, 5.0));
        assert!(table.iter().all(|(_, v)| *v >= 0.0 && *v <= 10.0));
        assert!((table[10].1 - (5.0 * 1.0f64.sin() + 5.0)).abs() < 1e-12);
    }
}
