//! Signal utilities shared by the render modes.
//!
//! Everything here is stateless between calls. The routines operate on raw
//! sample values (full 16-bit range, not normalised floats) because the mode
//! layouts scale bar heights against that range.

use std::f32::consts::PI;

use realfft::{num_complex::Complex32, RealFftPlanner};

use crate::{Result, VisualiserError};

const MEL_BANDS: usize = 128;
const MAX_FFT_WINDOW: usize = 2048;
const LOG_FLOOR: f32 = 1e-10;

/// Reduces `samples` to `target_count` values by averaging disjoint segments.
///
/// The segment length is `samples.len() / target_count` using integer
/// division; trailing samples that do not fill a whole segment are dropped.
/// Returns an empty vector when no positive segment length exists.
pub fn downsample_mean(samples: &[f32], target_count: usize) -> Vec<f32> {
    if target_count == 0 {
        return Vec::new();
    }

    let segment_len = samples.len() / target_count;
    if segment_len == 0 {
        return Vec::new();
    }

    (0..target_count)
        .map(|segment| {
            let start = segment * segment_len;
            let sum: f32 = samples[start..start + segment_len].iter().sum();
            sum / segment_len as f32
        })
        .collect()
}

/// Decimates `samples` by `factor`, then smooths the survivors.
///
/// The decimation stage runs a zero-phase low-pass guard at 0.8/factor of
/// Nyquist before keeping every factor-th sample. The kept samples then pass
/// through a causal 4th-order Butterworth low-pass at 0.5/factor. Applying
/// that final filter after decimation (rather than before, as a textbook
/// decimator would) reproduces the bar motion the layouts were tuned
/// against, so the ordering is deliberate.
pub fn downsample_filtered(samples: &[f32], factor: usize) -> Result<Vec<f32>> {
    if factor == 0 {
        return Err(VisualiserError::InvalidInput(
            "decimation factor must be at least 1",
        ));
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let smoothed = filter_zero_phase(0.8 / factor as f32, samples);
    let decimated: Vec<f32> = smoothed.into_iter().step_by(factor).collect();

    let mut post = butterworth_lowpass(0.5 / factor as f32);
    Ok(filter_forward(&mut post, &decimated))
}

/// Computes the discrete Fourier transform of `samples`.
///
/// The input length must be a power of two; anything else is rejected up
/// front rather than silently padded or truncated. The output has the same
/// length as the input, so callers binning the spectrum see the mirrored
/// upper half as well.
pub fn fft(samples: &[f32]) -> Result<Vec<Complex32>> {
    if !samples.len().is_power_of_two() {
        return Err(VisualiserError::InvalidInput(
            "fft input length must be a power of two",
        ));
    }

    let values: Vec<Complex32> = samples
        .iter()
        .map(|&value| Complex32::new(value, 0.0))
        .collect();
    Ok(fft_recursive(values))
}

// Radix-2 decimation in time. Each level splits into even and odd index
// halves, so the power-of-two precondition holds through the recursion.
fn fft_recursive(values: Vec<Complex32>) -> Vec<Complex32> {
    let len = values.len();
    if len <= 1 {
        return values;
    }

    let even = fft_recursive(values.iter().step_by(2).copied().collect());
    let odd = fft_recursive(values.iter().skip(1).step_by(2).copied().collect());

    let mut spectrum = vec![Complex32::new(0.0, 0.0); len];
    for k in 0..len / 2 {
        let angle = -2.0 * PI * k as f32 / len as f32;
        let twiddled = Complex32::from_polar(1.0, angle) * odd[k];
        spectrum[k] = even[k] + twiddled;
        spectrum[k + len / 2] = even[k] - twiddled;
    }
    spectrum
}

/// Computes mel-frequency cepstral coefficient trajectories for one frame.
///
/// The frame is analysed as a short STFT (window of up to 2048 samples, hop
/// of a quarter window, Hann weighted, zero padded so the first window is
/// centred on the first sample). Each window's power spectrum is pooled into
/// 128 triangular mel bands (HTK scale), converted to decibels and projected
/// through an orthonormal DCT-II.
///
/// The result holds one row per requested coefficient and one column per
/// analysis window. Callers wanting a single value per coefficient sum the
/// rows across time.
pub fn mfcc(
    samples: &[f32],
    sample_rate: u32,
    coefficient_count: usize,
) -> Result<Vec<Vec<f32>>> {
    if coefficient_count == 0 {
        return Err(VisualiserError::InvalidInput(
            "mfcc requires at least one coefficient",
        ));
    }
    if coefficient_count > MEL_BANDS {
        return Err(VisualiserError::InvalidInput(
            "mfcc coefficient count exceeds the mel band count",
        ));
    }
    if samples.is_empty() {
        return Err(VisualiserError::InvalidInput(
            "mfcc requires a non-empty frame",
        ));
    }
    if sample_rate == 0 {
        return Err(VisualiserError::InvalidInput(
            "mfcc requires a positive sample rate",
        ));
    }

    let window = samples.len().min(MAX_FFT_WINDOW);
    let hop = (window / 4).max(1);

    let mut padded = vec![0.0f32; samples.len() + window];
    padded[window / 2..window / 2 + samples.len()].copy_from_slice(samples);

    let mut planner = RealFftPlanner::<f32>::new();
    let plan = planner.plan_fft_forward(window);
    let mut input = plan.make_input_vec();
    let mut spectrum = plan.make_output_vec();
    let mut scratch = plan.make_scratch_vec();

    let filters = mel_filterbank(window, sample_rate);
    let frame_count = (padded.len() - window) / hop + 1;

    let mut power = vec![0.0f32; window / 2 + 1];
    let mut mel_frames: Vec<Vec<f32>> = Vec::with_capacity(frame_count);
    for frame_index in 0..frame_count {
        let start = frame_index * hop;
        for (i, value) in padded[start..start + window].iter().enumerate() {
            input[i] = value * hann_value(i, window);
        }
        plan.process_with_scratch(&mut input, &mut spectrum, &mut scratch)?;

        for (slot, bin) in power.iter_mut().zip(spectrum.iter()) {
            *slot = bin.norm_sqr();
        }

        let energies: Vec<f32> = filters
            .iter()
            .map(|filter| {
                let energy: f32 = filter
                    .weights
                    .iter()
                    .zip(power.iter().skip(filter.first_bin))
                    .map(|(weight, bin_power)| weight * bin_power)
                    .sum();
                10.0 * energy.max(LOG_FLOOR).log10()
            })
            .collect();
        mel_frames.push(energies);
    }

    let mut trajectories = vec![vec![0.0f32; frame_count]; coefficient_count];
    for (frame_index, energies) in mel_frames.iter().enumerate() {
        for (k, row) in trajectories.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (n, &energy) in energies.iter().enumerate() {
                let phase = PI * k as f32 * (2.0 * n as f32 + 1.0) / (2.0 * MEL_BANDS as f32);
                acc += energy * phase.cos();
            }
            let scale = if k == 0 {
                (1.0 / MEL_BANDS as f32).sqrt()
            } else {
                (2.0 / MEL_BANDS as f32).sqrt()
            };
            row[frame_index] = acc * scale;
        }
    }

    Ok(trajectories)
}

/// One second-order low-pass section with cached coefficients.
///
/// Direct form II transposed, so only two state words carry between samples.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    s1: f32,
    s2: f32,
}

impl Biquad {
    /// Low-pass section. `cutoff` is a fraction of Nyquist in (0, 1).
    fn lowpass(cutoff: f32, q: f32) -> Self {
        let w0 = PI * cutoff;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a0 = 1.0 + alpha;

        Self {
            b0: ((1.0 - cos_w0) / 2.0) / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: ((1.0 - cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
            s1: 0.0,
            s2: 0.0,
        }
    }

    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.s1;
        self.s1 = self.b1 * x - self.a1 * y + self.s2;
        self.s2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }
}

// 4th-order Butterworth as two cascaded sections. The Q values come from the
// Butterworth pole angles at pi/8 and 3pi/8.
fn butterworth_lowpass(cutoff: f32) -> [Biquad; 2] {
    [PI / 8.0, 3.0 * PI / 8.0].map(|angle| Biquad::lowpass(cutoff, 1.0 / (2.0 * angle.cos())))
}

fn filter_forward(sections: &mut [Biquad; 2], samples: &[f32]) -> Vec<f32> {
    samples
        .iter()
        .map(|&x| {
            sections
                .iter_mut()
                .fold(x, |value, section| section.process_sample(value))
        })
        .collect()
}

// Forward pass, then a reversed pass with fresh filter state. Phase shifts
// from the two passes cancel, which keeps decimated peaks aligned with the
// samples they came from. Both ends are extended by odd reflection so the
// filter state has settled by the time it reaches real samples.
fn filter_zero_phase(cutoff: f32, samples: &[f32]) -> Vec<f32> {
    const EDGE_PAD: usize = 15;

    let pad = EDGE_PAD.min(samples.len().saturating_sub(1));
    let last = samples.len() - 1;
    let mut extended = Vec::with_capacity(samples.len() + 2 * pad);
    for i in (1..=pad).rev() {
        extended.push(2.0 * samples[0] - samples[i]);
    }
    extended.extend_from_slice(samples);
    for i in 1..=pad {
        extended.push(2.0 * samples[last] - samples[last - i]);
    }

    let mut sections = butterworth_lowpass(cutoff);
    let mut forward = filter_forward(&mut sections, &extended);
    forward.reverse();

    for section in &mut sections {
        section.reset();
    }
    let mut backward = filter_forward(&mut sections, &forward);
    backward.reverse();
    backward[pad..backward.len() - pad].to_vec()
}

struct MelFilter {
    first_bin: usize,
    weights: Vec<f32>,
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

// Triangular filters with unit peaks, band edges evenly spaced on the mel
// scale between 0 Hz and Nyquist.
fn mel_filterbank(window: usize, sample_rate: u32) -> Vec<MelFilter> {
    let bin_count = window / 2 + 1;
    let hz_per_bin = sample_rate as f32 / window as f32;
    let max_mel = hz_to_mel(sample_rate as f32 / 2.0);

    let edges: Vec<f32> = (0..MEL_BANDS + 2)
        .map(|i| mel_to_hz(max_mel * i as f32 / (MEL_BANDS + 1) as f32) / hz_per_bin)
        .collect();

    (0..MEL_BANDS)
        .map(|band| {
            let lower = edges[band];
            let peak = edges[band + 1];
            let upper = edges[band + 2];

            let first_bin = lower.ceil().max(0.0) as usize;

            let mut weights = Vec::new();
            for bin in first_bin..bin_count {
                let position = bin as f32;
                if position > upper {
                    break;
                }
                let weight = if position <= peak {
                    if peak > lower {
                        (position - lower) / (peak - lower)
                    } else {
                        0.0
                    }
                } else if upper > peak {
                    (upper - position) / (upper - peak)
                } else {
                    0.0
                };
                weights.push(weight.max(0.0));
            }

            MelFilter { first_bin, weights }
        })
        .collect()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn sine(len: usize, cycles: f32, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (TAU * cycles * i as f32 / len as f32).sin())
            .collect()
    }

    #[test]
    fn downsample_mean_averages_disjoint_segments() {
        let samples: Vec<f32> = (0..8).map(|i| i as f32).collect();
        assert_eq!(downsample_mean(&samples, 4), vec![0.5, 2.5, 4.5, 6.5]);
    }

    #[test]
    fn downsample_mean_drops_the_remainder() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        // Segments of three; the tenth sample never contributes.
        assert_eq!(downsample_mean(&samples, 3), vec![1.0, 4.0, 7.0]);
    }

    #[test]
    fn downsample_mean_of_constant_input_is_constant() {
        let samples = vec![7.0f32; 100];
        let result = downsample_mean(&samples, 7);
        assert_eq!(result.len(), 7);
        for value in result {
            assert!((value - 7.0).abs() < 1e-6);
        }
    }

    #[test]
    fn downsample_mean_handles_degenerate_targets() {
        let samples = vec![1.0f32; 16];
        assert!(downsample_mean(&samples, 0).is_empty());
        assert!(downsample_mean(&samples, 17).is_empty());
        assert!(downsample_mean(&[], 4).is_empty());
    }

    #[test]
    fn fft_preserves_length_and_maps_zero_to_zero() {
        let spectrum = fft(&vec![0.0f32; 16]).unwrap();
        assert_eq!(spectrum.len(), 16);
        for bin in spectrum {
            assert!(bin.norm() < 1e-6);
        }
    }

    #[test]
    fn fft_of_an_impulse_is_flat() {
        let mut samples = vec![0.0f32; 8];
        samples[0] = 1.0;
        let spectrum = fft(&samples).unwrap();
        for bin in spectrum {
            assert!((bin.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn fft_locates_a_pure_tone() {
        let spectrum = fft(&sine(64, 4.0, 1.0)).unwrap();
        let peak = spectrum
            .iter()
            .take(32)
            .enumerate()
            .max_by(|a, b| a.1.norm().partial_cmp(&b.1.norm()).unwrap())
            .map(|(bin, _)| bin)
            .unwrap();
        assert_eq!(peak, 4);
        assert!((spectrum[4].norm() - 32.0).abs() < 1e-3);
        // Real input mirrors into the upper half.
        assert!((spectrum[60].norm() - 32.0).abs() < 1e-3);
    }

    #[test]
    fn fft_rejects_non_power_of_two_input() {
        let result = fft(&vec![0.0f32; 48]);
        assert!(matches!(result, Err(VisualiserError::InvalidInput(_))));
    }

    #[test]
    fn butterworth_passes_dc_and_rejects_nyquist() {
        let mut sections = butterworth_lowpass(0.25);
        let steady = filter_forward(&mut sections, &vec![1.0f32; 512]);
        for value in &steady[500..] {
            assert!((value - 1.0).abs() < 0.01);
        }

        let mut sections = butterworth_lowpass(0.25);
        let nyquist: Vec<f32> = (0..512).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let attenuated = filter_forward(&mut sections, &nyquist);
        for value in &attenuated[500..] {
            assert!(value.abs() < 0.01);
        }
    }

    #[test]
    fn downsample_filtered_keeps_every_factor_th_slot() {
        let samples = vec![0.5f32; 100];
        assert_eq!(downsample_filtered(&samples, 4).unwrap().len(), 25);
        let samples = vec![0.5f32; 10];
        assert_eq!(downsample_filtered(&samples, 3).unwrap().len(), 4);
        assert!(downsample_filtered(&[], 3).unwrap().is_empty());
    }

    #[test]
    fn downsample_filtered_rejects_a_zero_factor() {
        let result = downsample_filtered(&[1.0, 2.0], 0);
        assert!(matches!(result, Err(VisualiserError::InvalidInput(_))));
    }

    #[test]
    fn downsample_filtered_settles_on_a_steady_signal() {
        let samples = vec![1000.0f32; 512];
        let result = downsample_filtered(&samples, 4).unwrap();
        let tail = &result[result.len() - 8..];
        for value in tail {
            assert!((value - 1000.0).abs() / 1000.0 < 0.05);
        }
    }

    #[test]
    fn mfcc_shape_follows_the_requested_coefficients() {
        let samples = sine(2048, 128.0, 8000.0);
        let trajectories = mfcc(&samples, 44_100, 13).unwrap();
        assert_eq!(trajectories.len(), 13);
        for row in &trajectories {
            // Quarter-window hop over a centred frame: len / hop + 1 windows.
            assert_eq!(row.len(), 5);
            for value in row {
                assert!(value.is_finite());
            }
        }
    }

    #[test]
    fn mfcc_handles_short_frames() {
        let samples = sine(500, 20.0, 4000.0);
        let trajectories = mfcc(&samples, 44_100, 8).unwrap();
        assert_eq!(trajectories.len(), 8);
        assert!(!trajectories[0].is_empty());
    }

    #[test]
    fn mfcc_rejects_out_of_range_requests() {
        let samples = sine(1024, 16.0, 1000.0);
        assert!(mfcc(&samples, 44_100, 0).is_err());
        assert!(mfcc(&samples, 44_100, MEL_BANDS + 1).is_err());
        assert!(mfcc(&[], 44_100, 4).is_err());
        assert!(mfcc(&samples, 0, 4).is_err());
    }
}
