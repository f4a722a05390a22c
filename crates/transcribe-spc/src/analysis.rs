//! Fundamental-pitch detection for decoded samples
//!
//! A 1,024-point FFT over a window of the decoded PCM gives a magnitude
//! spectrum; the fundamental is the lowest of the largest local peaks,
//! refined by interpolating against its stronger neighbour.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use tracing::debug;

use crate::brr::MAX_SAMPLES;

/// FFT window length in samples.
pub const WINDOW: usize = 1024;

/// DSP output rate the bin frequencies are scaled against.
pub const SAMPLE_RATE_HZ: f64 = 32_000.0;

/// How many of the largest local peaks are considered.
const PEAK_COUNT: usize = 8;

/// Peaks below this bin are discarded as DC/rumble before picking the
/// fundamental.
const MIN_PEAK_BIN: usize = 4;

/// Result of analyzing one sample's PCM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleAnalysis {
    /// Detected fundamental in Hz, or 0.0 when no usable peak was found
    pub base_pitch_hz: f64,
    /// Peak amplitude relative to full scale
    pub gain_norm: f64,
}

/// Analyze a decoded sample: peak gain plus FFT fundamental detection.
///
/// Looping samples (`loop_start + WINDOW <= 16384`) are treated as
/// sustained and analyzed over the last window of the buffer; everything
/// else is treated as percussive and analyzed from the front.
pub fn analyze(pcm: &[i16], loop_start: usize) -> SampleAnalysis {
    let peak = pcm.iter().map(|&s| i32::from(s).abs()).max().unwrap_or(0);
    let gain_norm = f64::from(peak) / 32768.0;

    let mut window = [0.0f64; WINDOW];
    let sustained = loop_start + WINDOW <= MAX_SAMPLES && pcm.len() >= WINDOW;
    if sustained {
        for (w, &s) in window.iter_mut().zip(&pcm[pcm.len() - WINDOW..]) {
            *w = f64::from(s) / 32768.0;
        }
    } else {
        for (w, &s) in window.iter_mut().zip(pcm) {
            *w = f64::from(s) / 32768.0;
        }
    }

    let mut spectrum: Vec<Complex<f64>> =
        window.iter().map(|&re| Complex::new(re, 0.0)).collect();
    FftPlanner::new().plan_fft_forward(WINDOW).process(&mut spectrum);
    let magnitude: Vec<f64> = spectrum[..WINDOW / 2].iter().map(|c| c.norm()).collect();

    let Some(k) = fundamental_bin(&magnitude) else {
        debug!(sustained, gain_norm, "no spectral peak found");
        return SampleAnalysis {
            base_pitch_hz: 0.0,
            gain_norm,
        };
    };

    let kp = interpolate_bin(&magnitude, k);
    SampleAnalysis {
        base_pitch_hz: kp * SAMPLE_RATE_HZ / WINDOW as f64,
        gain_norm,
    }
}

/// The smallest-index bin among the eight largest strictly-local peaks,
/// ignoring bins below [`MIN_PEAK_BIN`].
fn fundamental_bin(magnitude: &[f64]) -> Option<usize> {
    let mut peaks: Vec<usize> = (1..magnitude.len() - 1)
        .filter(|&i| magnitude[i] > magnitude[i - 1] && magnitude[i] > magnitude[i + 1])
        .collect();
    peaks.sort_by(|&a, &b| magnitude[b].total_cmp(&magnitude[a]));
    peaks.truncate(PEAK_COUNT);
    peaks.into_iter().filter(|&k| k >= MIN_PEAK_BIN).min()
}

/// Refine a peak bin against its stronger neighbour, yielding a
/// fractional bin position.
fn interpolate_bin(magnitude: &[f64], k: usize) -> f64 {
    let y1 = magnitude[k - 1];
    let y2 = magnitude[k];
    let y3 = magnitude[k + 1];
    if y1 > y3 {
        if y1 > 0.0 {
            let a = y2 / y1;
            let d = a / (1.0 + a);
            k as f64 - 1.0 + d
        } else {
            k as f64
        }
    } else if y2 > 0.0 {
        let a = y3 / y2;
        let d = a / (1.0 + a);
        k as f64 + d
    } else {
        k as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn sine_pcm(freq: f64, len: usize, amplitude: f64) -> Vec<i16> {
        (0..len)
            .map(|i| {
                (amplitude * (TAU * freq * i as f64 / SAMPLE_RATE_HZ).sin() * 32767.0) as i16
            })
            .collect()
    }

    #[test]
    fn detects_440hz_sine() {
        let pcm = sine_pcm(440.0, MAX_SAMPLES, 0.9);
        let analysis = analyze(&pcm, 0);
        assert!(
            (438.0..=442.0).contains(&analysis.base_pitch_hz),
            "got {}",
            analysis.base_pitch_hz
        );
        assert!((analysis.gain_norm - 0.9).abs() < 0.02);
    }

    #[test]
    fn detects_pitch_of_short_percussive_sample() {
        // Non-looping, shorter than the full buffer: analyzed from the front.
        let pcm = sine_pcm(880.0, 2000, 0.5);
        let analysis = analyze(&pcm, MAX_SAMPLES);
        assert!(
            (875.0..=885.0).contains(&analysis.base_pitch_hz),
            "got {}",
            analysis.base_pitch_hz
        );
    }

    #[test]
    fn fundamental_wins_over_louder_harmonic() {
        // 220 Hz fundamental with a dominant 660 Hz partial: the lowest
        // qualifying peak is still chosen.
        let pcm: Vec<i16> = (0..MAX_SAMPLES)
            .map(|i| {
                let t = i as f64 / SAMPLE_RATE_HZ;
                let s = 0.3 * (TAU * 220.0 * t).sin() + 0.6 * (TAU * 660.0 * t).sin();
                (s * 30000.0) as i16
            })
            .collect();
        let analysis = analyze(&pcm, 0);
        assert!(
            (215.0..=225.0).contains(&analysis.base_pitch_hz),
            "got {}",
            analysis.base_pitch_hz
        );
    }

    #[test]
    fn silence_yields_no_pitch() {
        let analysis = analyze(&vec![0i16; MAX_SAMPLES], 0);
        assert_eq!(analysis.base_pitch_hz, 0.0);
        assert_eq!(analysis.gain_norm, 0.0);
    }

    #[test]
    fn very_low_peaks_are_ignored() {
        // 62 Hz sits in bin 2, below the fundamental threshold.
        let pcm = sine_pcm(62.0, MAX_SAMPLES, 0.8);
        let analysis = analyze(&pcm, 0);
        assert!(analysis.base_pitch_hz == 0.0 || analysis.base_pitch_hz > 100.0);
    }
}
