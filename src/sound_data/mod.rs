//! The sound asset model.
//!
//! Assets are registered as [`UnopenSound`] descriptors (a path or raw
//! bytes) and opened lazily on first use. An [`OpenSound`] is either fully
//! decoded into one native buffer, or streamed: decoded on demand into a
//! cache of contiguous sample ranges (see [`stream`]).
//!
//! Decode failures never cross this boundary as errors during playback:
//! they resolve to the null buffer, which the native layer plays as
//! silence.

mod stream;

pub use stream::SoundStream;

use crate::SOUND_DURATION_MAX_SINGLE;
use crate::decode::{DecodeInfo, SoundDecoder, SymphoniaDecoder};
use crate::error::Result;
use crate::native::{AudioBackend, BufferId, NativeBuffer};
use log::warn;
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;

/// A registered sound that has not been decoded yet.
///
/// Opening consumes the descriptor; the engine keeps the resulting
/// [`OpenSound`] cached for its whole lifetime.
#[derive(Debug)]
pub enum UnopenSound {
    /// Sound file on disk.
    File(PathBuf),
    /// Complete container file held in memory.
    Data(Vec<u8>),
}

impl UnopenSound {
    pub fn open(self, sound_name: &str, backend: &Arc<dyn AudioBackend>) -> Result<OpenSound> {
        let decoder = match self {
            UnopenSound::File(path) => SymphoniaDecoder::from_path(&path, sound_name)?,
            UnopenSound::Data(data) => SymphoniaDecoder::from_bytes(data, sound_name)?,
        };
        Ok(OpenSound::from_decoder(Box::new(decoder), backend))
    }
}

enum Repr {
    /// The whole asset in one native buffer.
    Buffer(NativeBuffer),
    /// Decoded on demand in bounded windows.
    Stream(RefCell<SoundStream>),
}

/// An opened, decodable sound asset. Shared read-mostly between the engine's
/// cache and every playing sound backed by it.
pub struct OpenSound {
    info: DecodeInfo,
    repr: Repr,
}

impl OpenSound {
    /// Decides buffer vs. stream by duration: anything up to
    /// [`SOUND_DURATION_MAX_SINGLE`] (inclusive) is decoded in one piece.
    pub fn from_decoder(
        mut decoder: Box<dyn SoundDecoder>,
        backend: &Arc<dyn AudioBackend>,
    ) -> Self {
        let info = decoder.info().clone();
        let repr = if info.length_seconds <= SOUND_DURATION_MAX_SINGLE {
            let buffer = load_native_buffer(&mut *decoder, backend, &info, 0, info.length_samples);
            if buffer.is_null() {
                warn!(
                    "Audio: failed to load sound \"{}\" completely",
                    info.name_for_logging
                );
            }
            Repr::Buffer(buffer)
        } else {
            Repr::Stream(RefCell::new(SoundStream::new(decoder)))
        };
        Self { info, repr }
    }

    pub fn info(&self) -> &DecodeInfo {
        &self.info
    }

    /// Whether more than one buffer backs this asset.
    pub fn is_streaming(&self) -> bool {
        matches!(self.repr, Repr::Stream(_))
    }

    /// Returns the buffer containing `offset`, loading it first if needed.
    ///
    /// The returned triple is `(buffer, buffer_end, offset_in_buffer)`:
    /// the native buffer, the asset-wide frame where it ends (exclusive),
    /// and the position of `offset` relative to the buffer's start.
    /// `offset_in_buffer == 0` is guaranteed if some loaded buffer ends
    /// exactly at `offset`.
    ///
    /// An `offset` at or past the asset's end yields the sentinel
    /// `(NULL, length_samples, 0)`: no more audio.
    pub fn get_or_load_buffer_at(
        &self,
        backend: &Arc<dyn AudioBackend>,
        offset: u32,
    ) -> (BufferId, u32, u32) {
        if offset >= self.info.length_samples {
            return (BufferId::NULL, self.info.length_samples, 0);
        }
        match &self.repr {
            Repr::Buffer(buffer) => (buffer.id(), self.info.length_samples, offset),
            Repr::Stream(stream) => stream.borrow_mut().get_or_load(backend, &self.info, offset),
        }
    }
}

/// Decodes `[start, end)` into a fresh native buffer.
///
/// Any failure yields the null buffer: stored, never retried, played as
/// silence.
pub(crate) fn load_native_buffer(
    decoder: &mut dyn SoundDecoder,
    backend: &Arc<dyn AudioBackend>,
    info: &DecodeInfo,
    start: u32,
    end: u32,
) -> NativeBuffer {
    match decoder.read_range(start, end) {
        Ok(samples) => NativeBuffer::create(
            Arc::clone(backend),
            info.channels,
            info.sample_rate,
            &samples,
        ),
        Err(err) => {
            warn!("Audio: error decoding {}: {err}", info.name_for_logging);
            NativeBuffer::null(Arc::clone(backend))
        }
    }
}
