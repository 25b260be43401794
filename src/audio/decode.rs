use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error,
    formats::FormatOptions,
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::debug;

use super::AudioError;

/// Raw decoded audio in interleaved `f32` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decode a wav, mp3, flac or ogg file into interleaved `f32` samples.
pub fn decode_audio(path: &Path) -> Result<DecodedAudio, AudioError> {
    let file = File::open(path).map_err(|source| AudioError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    decode_source(Box::new(file), path)
}

/// Decode from any media source; `path` supplies the format hint and error context.
pub(crate) fn decode_source(
    source: Box<dyn MediaSource>,
    path: &Path,
) -> Result<DecodedAudio, AudioError> {
    let mss = MediaSourceStream::new(source, Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }
    let decode_err = |err: Error| AudioError::Decode {
        path: path.to_path_buf(),
        message: err.to_string(),
    };

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_err)?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| AudioError::Decode {
            path: path.to_path_buf(),
            message: "no default track".to_string(),
        })?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params.sample_rate.ok_or_else(|| AudioError::Decode {
        path: path.to_path_buf(),
        message: "missing sample rate".to_string(),
    })?;
    let mut channels = codec_params
        .channels
        .map(|channels| channels.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(decode_err)?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(decode_err(err)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            Err(Error::DecodeError(_)) => continue,
            Err(err) => return Err(decode_err(err)),
        };
        let spec = *audio_buf.spec();
        if channels == 0 {
            channels = spec.channels.count() as u16;
        }
        let mut sample_buf = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(AudioError::Empty(path.to_path_buf()));
    }
    debug!(
        "Decoded {} at {sample_rate} Hz, {} channel(s), {} samples",
        path.display(),
        channels.max(1),
        samples.len()
    );

    Ok(DecodedAudio {
        samples,
        sample_rate: sample_rate.max(1),
        channels: channels.max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Seek, SeekFrom};

    /// Serves `bytes` until `fail_at`, then fails every read.
    struct BrokenSource {
        inner: Cursor<Vec<u8>>,
        fail_at: u64,
    }

    impl Read for BrokenSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let remaining = self.fail_at.saturating_sub(self.inner.position()) as usize;
            if remaining == 0 {
                return Err(std::io::Error::other("device went away"));
            }
            let len = buf.len().min(remaining);
            self.inner.read(&mut buf[..len])
        }
    }

    impl Seek for BrokenSource {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl MediaSource for BrokenSource {
        fn is_seekable(&self) -> bool {
            false
        }

        fn byte_len(&self) -> Option<u64> {
            Some(self.inner.get_ref().len() as u64)
        }
    }

    fn wav_bytes(frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                writer.write_sample((i % 100) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn end_of_stream_finishes_decoding() {
        let bytes = wav_bytes(16_000);
        let fail_at = bytes.len() as u64 + 1;
        let source = BrokenSource {
            inner: Cursor::new(bytes),
            fail_at,
        };
        let decoded = decode_source(Box::new(source), Path::new("clip.wav")).unwrap();
        assert_eq!(decoded.samples.len(), 16_000);
    }

    #[test]
    fn read_error_mid_stream_is_reported() {
        let source = BrokenSource {
            inner: Cursor::new(wav_bytes(64_000)),
            fail_at: 8_000,
        };
        let err = decode_source(Box::new(source), Path::new("clip.wav")).unwrap_err();
        assert!(matches!(err, AudioError::Decode { .. }), "{err}");
        assert!(err.to_string().contains("clip.wav"));
    }
}
