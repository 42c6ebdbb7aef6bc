//! Sample-rate conversion and channel mixing.
//!
//! Two directions, two algorithms:
//!
//! 1. **Capture** — [`Decimator`] reduces the microphone's native rate to the
//!    16 kHz wire rate by averaging blocks of input samples.  It never
//!    upsamples and carries its fractional position across callbacks, so the
//!    output stream is continuous regardless of device buffer size.
//! 2. **Playback** — [`resample_linear`] converts a decoded TTS chunk to the
//!    output device rate with linear interpolation.
//!
//! [`stereo_to_mono`] downmixes interleaved frames before either step.

// ---------------------------------------------------------------------------
// stereo_to_mono
// ---------------------------------------------------------------------------

/// Average each interleaved frame into one mono sample.  Mono input comes
/// back as a copy; zero channels yields nothing.
///
/// ```rust
/// use callme_client::audio::stereo_to_mono;
///
/// let frames = stereo_to_mono(&[0.5_f32, -0.5, 0.2, 0.4], 2);
/// assert_eq!(frames.len(), 2);
/// assert!((frames[1] - 0.3).abs() < 1e-6);
/// ```
pub fn stereo_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Decimator
// ---------------------------------------------------------------------------

/// Streaming block-averaging decimator.
///
/// Each output sample is the mean of the input samples that fall inside its
/// `source_rate / target_rate` wide window.  Input that does not yet fill a
/// whole window is held back until the next call.
///
/// When `source_rate <= target_rate` the decimator passes samples through
/// unchanged (it never upsamples).
#[derive(Debug, Clone)]
pub struct Decimator {
    ratio: f64,
    /// Sum and count of the input samples in the window being filled.
    acc_sum: f32,
    acc_count: u32,
    /// Input consumed since the current window opened (fractional).
    position: f64,
}

impl Decimator {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        let ratio = if target_rate == 0 || source_rate <= target_rate {
            1.0
        } else {
            source_rate as f64 / target_rate as f64
        };
        Self {
            ratio,
            acc_sum: 0.0,
            acc_count: 0,
            position: 0.0,
        }
    }

    /// Decimation factor (`1.0` means passthrough).
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Feed mono input, appending every completed output sample to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.ratio == 1.0 {
            out.extend_from_slice(input);
            return;
        }

        for &sample in input {
            self.acc_sum += sample;
            self.acc_count += 1;
            self.position += 1.0;

            if self.position >= self.ratio {
                out.push(self.acc_sum / self.acc_count as f32);
                self.acc_sum = 0.0;
                self.acc_count = 0;
                // Keep the fractional remainder so windows stay aligned.
                self.position -= self.ratio;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// resample_linear
// ---------------------------------------------------------------------------

/// Resample `samples` from `source_rate` to `target_rate` using linear
/// interpolation.
///
/// * Equal rates return a copy of the input.
/// * Empty input or a zero rate returns an empty vector.
///
/// The output length is `ceil(samples.len() * target_rate / source_rate)`.
///
/// # Example
///
/// ```rust
/// use callme_client::audio::resample_linear;
///
/// // 10 ms @ 24 kHz → 10 ms @ 48 kHz
/// let lo = vec![0.5_f32; 240];
/// let hi = resample_linear(&lo, 24_000, 48_000);
/// assert_eq!(hi.len(), 480);
/// ```
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- stereo_to_mono ----------------------------------------------------

    #[test]
    fn stereo_to_mono_two_channel() {
        let out = stereo_to_mono(&[1.0_f32, -1.0, 0.5, 0.5], 2);
        assert_eq!(out.len(), 2);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stereo_to_mono_zero_channels() {
        assert!(stereo_to_mono(&[1.0_f32, 2.0], 0).is_empty());
    }

    // ---- Decimator ---------------------------------------------------------

    #[test]
    fn decimator_48k_averages_blocks_of_three() {
        let mut dec = Decimator::new(48_000, 16_000);
        let mut out = Vec::new();
        dec.process(&[0.0, 0.3, 0.6, 0.9, 0.9, 0.9], &mut out);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn decimator_carries_partial_windows_across_calls() {
        let mut whole = Decimator::new(48_000, 16_000);
        let mut split = Decimator::new(48_000, 16_000);
        let input: Vec<f32> = (0..960).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut a = Vec::new();
        whole.process(&input, &mut a);

        let mut b = Vec::new();
        for piece in input.chunks(7) {
            split.process(piece, &mut b);
        }

        assert_eq!(a.len(), 320);
        assert_eq!(a, b);
    }

    #[test]
    fn decimator_44100_yields_expected_rate() {
        let mut dec = Decimator::new(44_100, 16_000);
        let mut out = Vec::new();
        for _ in 0..100 {
            dec.process(&vec![0.25_f32; 441], &mut out);
        }
        // 1 s of input → 16 000 output samples (±1 for the open window).
        assert!(out.len().abs_diff(16_000) <= 1, "got {}", out.len());
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-5));
    }

    #[test]
    fn decimator_never_upsamples() {
        let mut dec = Decimator::new(8_000, 16_000);
        assert_eq!(dec.ratio(), 1.0);
        let mut out = Vec::new();
        dec.process(&[0.1, 0.2, 0.3], &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }

    // ---- resample_linear ---------------------------------------------------

    #[test]
    fn resample_same_rate_is_noop() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn resample_empty_input() {
        assert!(resample_linear(&[], 24_000, 48_000).is_empty());
    }

    #[test]
    fn resample_24k_to_44100_output_length() {
        let input = vec![0.0_f32; 24_000];
        let out = resample_linear(&input, 24_000, 44_100);
        assert!(out.len().abs_diff(44_100) <= 1, "got {}", out.len());
    }

    #[test]
    fn resample_constant_signal_preserves_amplitude() {
        let out = resample_linear(&vec![0.5_f32; 480], 48_000, 16_000);
        assert_eq!(out.len(), 160);
        for &s in &out {
            assert!((s - 0.5).abs() < 1e-5, "amplitude drift: {s}");
        }
    }
}
