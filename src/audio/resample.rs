use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use super::AudioError;

const CHUNK_FRAMES: usize = 4096;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Band-limited resampling of a mono signal.
///
/// Output holds `ceil(len * output_rate / input_rate)` samples, aligned with
/// the input (the filter delay is removed). Equal rates return an exact copy.
pub fn resample(
    samples: &[f32],
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<f32>, AudioError> {
    let input_rate = input_rate.max(1);
    let output_rate = output_rate.max(1);
    if samples.is_empty() || input_rate == output_rate {
        return Ok(samples.to_vec());
    }
    let failed = |message: String| AudioError::Resample {
        from: input_rate,
        to: output_rate,
        message,
    };

    let ratio = output_rate as f64 / input_rate as f64;
    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, sinc_parameters(), CHUNK_FRAMES, 1)
        .map_err(|err| failed(err.to_string()))?;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + CHUNK_FRAMES);

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let next = resampler.input_frames_next();
        let frames = resampler
            .process(&[&samples[pos..pos + next]][..], None)
            .map_err(|err| failed(err.to_string()))?;
        out.extend_from_slice(&frames[0]);
        pos += next;
    }
    if pos < samples.len() {
        let frames = resampler
            .process_partial(Some(&[&samples[pos..]][..]), None)
            .map_err(|err| failed(err.to_string()))?;
        out.extend_from_slice(&frames[0]);
    }
    // Flush the filter tail with silence.
    while out.len() < expected + delay {
        let frames = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|err| failed(err.to_string()))?;
        if frames[0].is_empty() {
            break;
        }
        out.extend_from_slice(&frames[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    debug!(
        "Resampled {} samples at {input_rate} Hz to {} at {output_rate} Hz",
        samples.len(),
        out.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: u32, seconds: f32) -> Vec<f32> {
        let len = (rate as f32 * seconds) as usize;
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn middle_rms(samples: &[f32]) -> f32 {
        let quarter = samples.len() / 4;
        let middle = &samples[quarter..samples.len() - quarter];
        (middle.iter().map(|v| v * v).sum::<f32>() / middle.len() as f32).sqrt()
    }

    #[test]
    fn equal_rates_are_bit_identical() {
        let input = vec![0.25_f32, -0.5, f32::MIN_POSITIVE, 1.0e-30, 0.999];
        let out = resample(&input, 44_100, 44_100).unwrap();
        let in_bits: Vec<u32> = input.iter().map(|v| v.to_bits()).collect();
        let out_bits: Vec<u32> = out.iter().map(|v| v.to_bits()).collect();
        assert_eq!(in_bits, out_bits);
    }

    #[test]
    fn output_length_follows_rate_ratio() {
        let len = |input: usize, from: u32| {
            resample(&vec![0.0; input], from, 16_000).unwrap().len()
        };
        assert_eq!(len(48_000, 48_000), 16_000);
        assert_eq!(len(44_100, 44_100), 16_000);
        assert_eq!(len(8_000, 8_000), 16_000);
        assert_eq!(resample(&[0.5; 3], 48_000, 16_000).unwrap().len(), 1);
    }

    #[test]
    fn tone_below_new_nyquist_passes() {
        let out = resample(&tone(1_000.0, 48_000, 1.0), 48_000, 16_000).unwrap();
        let rms = middle_rms(&out);
        assert!((rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05, "rms {rms}");
    }

    #[test]
    fn tone_above_new_nyquist_is_attenuated() {
        // 12 kHz would alias to 4 kHz at 16 kHz without a low-pass.
        let out = resample(&tone(12_000.0, 48_000, 1.0), 48_000, 16_000).unwrap();
        let rms = middle_rms(&out);
        assert!(rms < 0.01, "rms {rms}");
    }
}
