//! Symphonia-backed implementation of [`SoundDecoder`].

use super::{DecodeInfo, SoundDecoder};
use crate::error::{FernSonicError, Result};
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use symphonia::{
    core::{
        audio::SampleBuffer,
        codecs::{Decoder, DecoderOptions},
        errors::Error,
        formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Decoder for one audio file or in-memory container, addressed by sample
/// frame.
pub struct SymphoniaDecoder {
    info: DecodeInfo,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    /// Frame index the next packet is expected to start at, or `None` right
    /// after construction / when the position is unknown.
    position: Option<u64>,
}

impl SymphoniaDecoder {
    /// Opens a file on disk.
    pub fn from_path(path: &Path, name_for_logging: &str) -> Result<Self> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        Self::open(mss, hint, name_for_logging)
    }

    /// Opens a complete container held in memory.
    pub fn from_bytes(data: Vec<u8>, name_for_logging: &str) -> Result<Self> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
        Self::open(mss, Hint::new(), name_for_logging)
    }

    fn open(mss: MediaSourceStream, hint: Hint, name_for_logging: &str) -> Result<Self> {
        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                FernSonicError::Decode(format!("{name_for_logging}: failed to probe format: {e}"))
            })?;

        let format = probed.format;
        let track = format.default_track().ok_or_else(|| {
            FernSonicError::Decode(format!("{name_for_logging}: no default audio track"))
        })?;
        let track_id = track.id;

        let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
            FernSonicError::Decode(format!("{name_for_logging}: sample rate not known"))
        })?;

        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| {
                FernSonicError::Decode(format!("{name_for_logging}: channel count not known"))
            })?;
        if channels == 0 || channels > 2 {
            return Err(FernSonicError::AudioFormat(format!(
                "{name_for_logging}: sound is neither mono nor stereo ({channels} channels)"
            )));
        }

        // Streaming needs random access by sample, which needs a known total
        // length up front.
        let length_samples = track.codec_params.n_frames.ok_or_else(|| {
            FernSonicError::Decode(format!("{name_for_logging}: total length not known"))
        })?;
        let length_samples = u32::try_from(length_samples).map_err(|_| {
            FernSonicError::Decode(format!("{name_for_logging}: sound is too long"))
        })?;

        let decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                FernSonicError::Decode(format!(
                    "{name_for_logging}: failed to create decoder: {e}"
                ))
            })?;

        Ok(Self {
            info: DecodeInfo {
                name_for_logging: name_for_logging.to_string(),
                channels,
                sample_rate,
                length_samples,
                length_seconds: length_samples as f32 / sample_rate as f32,
            },
            format,
            decoder,
            track_id,
            position: None,
        })
    }

    fn seek_to(&mut self, frame: u64) -> Result<()> {
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| {
                self.position = None;
                FernSonicError::Decode(format!(
                    "{}: could not seek: {e}",
                    self.info.name_for_logging
                ))
            })?;
        self.decoder.reset();
        // the demuxer lands at or before the requested frame
        self.position = Some(seeked.actual_ts);
        Ok(())
    }
}

impl SoundDecoder for SymphoniaDecoder {
    fn info(&self) -> &DecodeInfo {
        &self.info
    }

    fn read_range(&mut self, start: u32, end: u32) -> Result<Vec<f32>> {
        let channels = self.info.channels as usize;
        let start = start as u64;
        let end = end as u64;
        if end <= start {
            return Ok(Vec::new());
        }

        if self.position != Some(start) {
            self.seek_to(start)?;
        }

        let mut out = vec![0.0f32; (end - start) as usize * channels];

        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                // end of stream; whatever is missing stays silent
                Err(Error::IoError(_)) => break,
                Err(e) => {
                    self.position = None;
                    return Err(FernSonicError::Decode(format!(
                        "{}: error reading packet: {e}",
                        self.info.name_for_logging
                    )));
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let packet_start = packet.ts();

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(Error::IoError(_)) => break,
                // recoverable corruption; the gap stays silent
                Err(Error::DecodeError(_)) => continue,
                Err(e) => {
                    self.position = None;
                    return Err(FernSonicError::Decode(format!(
                        "{}: error decoding: {e}",
                        self.info.name_for_logging
                    )));
                }
            };

            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            buf.copy_interleaved_ref(decoded);
            let samples = buf.samples();
            let packet_frames = (samples.len() / channels) as u64;
            self.position = Some(packet_start + packet_frames);

            // copy the overlap of [packet_start, packet_start+frames) with [start, end)
            let copy_from = packet_start.max(start);
            let copy_to = (packet_start + packet_frames).min(end);
            for frame in copy_from..copy_to {
                let src = (frame - packet_start) as usize * channels;
                let dst = (frame - start) as usize * channels;
                out[dst..dst + channels].copy_from_slice(&samples[src..src + channels]);
            }

            if packet_start + packet_frames >= end {
                break;
            }
        }

        Ok(out)
    }
}
