//! Decoder boundary.
//!
//! The engine consumes compressed audio through the [`SoundDecoder`] trait:
//! a decode-info query plus bounded-window PCM reads addressed by sample
//! frame. The built-in implementation is [`SymphoniaDecoder`]; tests use
//! synthetic decoders.

mod symphonia_decoder;

pub use symphonia_decoder::SymphoniaDecoder;

/// Metadata of an audio asset, queried once when the asset is opened.
#[derive(Debug, Clone)]
pub struct DecodeInfo {
    /// Asset name, used in log messages only.
    pub name_for_logging: String,
    /// 1 (mono) or 2 (stereo). Nothing else is supported.
    pub channels: u16,
    pub sample_rate: u32,
    /// Total length in sample frames.
    pub length_samples: u32,
    /// Total length in seconds.
    pub length_seconds: f32,
}

/// Positionable PCM decoder for one audio asset.
///
/// Implementations keep their own read position; `read_range` seeks as
/// needed, so out-of-order windows are allowed (the streaming cache requests
/// them when a looping sound wraps).
pub trait SoundDecoder {
    fn info(&self) -> &DecodeInfo;

    /// Decodes exactly the frame window `[start, end)` into interleaved f32
    /// PCM (`(end - start) * channels` samples).
    ///
    /// Frames the container fails to produce are zero-filled; hard seek or
    /// read failures are errors, which the asset layer converts into the
    /// silent null buffer.
    fn read_range(&mut self, start: u32, end: u32) -> crate::error::Result<Vec<f32>>;
}
