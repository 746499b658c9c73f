//! Conversion between the telephony wire format and provider audio.
//!
//! The media relay carries 8 kHz mono G.711 mu-law. The recognizer wants a
//! 16 kHz mono 16-bit WAV; the synthesizer returns a WAV at whatever rate it
//! was asked for. Every conversion here degrades instead of failing: if a
//! buffer cannot be converted the original bytes are handed back and the
//! problem is logged, so a single bad frame never ends a call.

use crate::mulaw;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;

/// Sample rate of the telephony media stream.
pub const WIRE_SAMPLE_RATE: u32 = 8_000;

/// Sample rate the recognizer is fed.
pub const RECOGNIZER_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Error)]
enum AudioError {
    #[error("empty audio buffer")]
    Empty,

    #[error("wav: {0}")]
    Wav(#[from] hound::Error),

    #[error("resampler setup: {0}")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),

    #[error("resampling: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Container or codec recognised by [`AudioTranscoder::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    Wav,
    Mp3,
    Mulaw,
    Unknown,
}

/// Shape of an audio buffer as far as it could be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioInfo {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per sample.
    pub sample_width: u16,
    pub frame_count: Option<u64>,
    pub duration_ms: Option<u64>,
}

impl AudioInfo {
    fn unknown() -> Self {
        Self {
            encoding: AudioEncoding::Unknown,
            sample_rate: 0,
            channels: 0,
            sample_width: 0,
            frame_count: None,
            duration_ms: None,
        }
    }
}

/// Converts audio between the telephony wire and the AI providers.
#[derive(Debug, Clone)]
pub struct AudioTranscoder {
    frame_ms: u32,
}

impl AudioTranscoder {
    /// Creates a transcoder that splits outbound audio into `frame_ms` frames.
    pub fn new(frame_ms: u32) -> Self {
        Self {
            frame_ms: frame_ms.max(1),
        }
    }

    /// Wire bytes per outbound frame.
    pub fn frame_bytes(&self) -> usize {
        (WIRE_SAMPLE_RATE as usize * self.frame_ms as usize / 1000).max(1)
    }

    /// Converts inbound mu-law to a 16 kHz WAV for the recognizer.
    ///
    /// Returns the input unchanged if conversion fails.
    pub fn to_recognizer(&self, wire: &[u8]) -> Vec<u8> {
        match wire_to_wav(wire) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(bytes = wire.len(), "inbound audio conversion failed: {}", e);
                wire.to_vec()
            }
        }
    }

    /// Converts synthesized WAV audio to 8 kHz mu-law for the wire.
    ///
    /// Returns the input unchanged if conversion fails.
    pub fn to_wire(&self, synthesized: &[u8]) -> Vec<u8> {
        match wav_to_wire(synthesized) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(
                    bytes = synthesized.len(),
                    "outbound audio conversion failed: {}",
                    e
                );
                synthesized.to_vec()
            }
        }
    }

    /// Splits wire audio into fixed-duration frames for streaming.
    ///
    /// The final frame may be shorter than the rest.
    pub fn frames<'a>(&self, wire: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        wire.chunks(self.frame_bytes())
    }

    /// Identifies the encoding of `bytes`, trying WAV, then MP3, then raw mu-law.
    pub fn probe(&self, bytes: &[u8]) -> AudioEncoding {
        self.audio_info(bytes).encoding
    }

    /// Returns whether `bytes` is in any supported encoding.
    pub fn validate_audio_format(&self, bytes: &[u8]) -> bool {
        self.probe(bytes) != AudioEncoding::Unknown
    }

    /// Describes `bytes` using the first encoding that matches.
    pub fn audio_info(&self, bytes: &[u8]) -> AudioInfo {
        if let Some(info) = wav_info(bytes) {
            return info;
        }
        if let Some(info) = mp3_info(bytes) {
            return info;
        }
        if !bytes.is_empty() {
            let frames = bytes.len() as u64;
            return AudioInfo {
                encoding: AudioEncoding::Mulaw,
                sample_rate: WIRE_SAMPLE_RATE,
                channels: 1,
                sample_width: 1,
                frame_count: Some(frames),
                duration_ms: Some(frames * 1000 / u64::from(WIRE_SAMPLE_RATE)),
            };
        }
        AudioInfo::unknown()
    }
}

impl Default for AudioTranscoder {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Wraps little-endian 16-bit mono PCM in a WAV container.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    write_wav(&samples, sample_rate)
}

fn wire_to_wav(wire: &[u8]) -> Result<Vec<u8>, AudioError> {
    if wire.is_empty() {
        return Err(AudioError::Empty);
    }
    let samples: Vec<f32> = wire
        .iter()
        .map(|&code| f32::from(mulaw::decode(code)) / 32_768.0)
        .collect();
    let upsampled = resample(&samples, WIRE_SAMPLE_RATE, RECOGNIZER_SAMPLE_RATE)?;
    let pcm: Vec<i16> = upsampled.iter().map(|&s| to_i16(s)).collect();
    Ok(write_wav(&pcm, RECOGNIZER_SAMPLE_RATE)?)
}

fn wav_to_wire(bytes: &[u8]) -> Result<Vec<u8>, AudioError> {
    let (samples, sample_rate) = read_wav_mono(bytes)?;
    if samples.is_empty() {
        return Err(AudioError::Empty);
    }
    let downsampled = resample(&samples, sample_rate, WIRE_SAMPLE_RATE)?;
    Ok(downsampled
        .iter()
        .map(|&s| mulaw::encode(to_i16(s)))
        .collect())
}

fn read_wav_mono(bytes: &[u8]) -> Result<(Vec<f32>, u32), AudioError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };
    Ok((mono, spec.sample_rate))
}

fn write_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, AudioError> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let ratio = f64::from(to) / f64::from(from);
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, samples.len(), 1)?;
    let input = vec![samples.to_vec()];
    let mut output = resampler.process(&input, None)?;
    Ok(output.pop().unwrap_or_default())
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32_768.0).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

fn wav_info(bytes: &[u8]) -> Option<AudioInfo> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    let frames = u64::from(reader.duration());
    let duration_ms = if spec.sample_rate > 0 {
        Some(frames * 1000 / u64::from(spec.sample_rate))
    } else {
        None
    };
    Some(AudioInfo {
        encoding: AudioEncoding::Wav,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        sample_width: spec.bits_per_sample.div_ceil(8),
        frame_count: Some(frames),
        duration_ms,
    })
}

/// Recognises an MP3 stream by its ID3 tag or first MPEG audio frame header.
///
/// Only the header is inspected; the stream is not decoded, so frame count and
/// duration are unknown.
fn mp3_info(bytes: &[u8]) -> Option<AudioInfo> {
    let header_start = if bytes.starts_with(b"ID3") {
        let size = id3_size(bytes)?;
        10 + size
    } else {
        0
    };
    let header = bytes.get(header_start..header_start + 4)?;
    if header[0] != 0xFF || header[1] & 0xE0 != 0xE0 {
        return None;
    }

    let version = (header[1] >> 3) & 0x03;
    let layer = (header[1] >> 1) & 0x03;
    let rate_index = usize::from((header[2] >> 2) & 0x03);
    if layer == 0 || version == 1 || rate_index == 3 {
        return None;
    }
    let base_rate = [44_100, 48_000, 32_000][rate_index];
    let sample_rate = match version {
        0b11 => base_rate,
        0b10 => base_rate / 2,
        _ => base_rate / 4,
    };
    let channels = if header[3] >> 6 == 0b11 { 1 } else { 2 };

    Some(AudioInfo {
        encoding: AudioEncoding::Mp3,
        sample_rate,
        channels,
        sample_width: 2,
        frame_count: None,
        duration_ms: None,
    })
}

/// Reads the syncsafe tag size from an ID3v2 header.
fn id3_size(bytes: &[u8]) -> Option<usize> {
    let size = bytes.get(6..10)?;
    if size.iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    Some(
        size.iter()
            .fold(0usize, |acc, &b| (acc << 7) | usize::from(b)),
    )
}
