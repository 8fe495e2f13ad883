//! Boundary to the native 3D-audio layer.
//!
//! Everything the engine needs from the native runtime is expressed by the
//! [`AudioBackend`] trait: buffer and source lifecycle, queueing, 3D
//! positioning, listener state and gain. Exactly one real backend is modeled
//! ([`CpalBackend`]); tests drive the engine against a mock instead.
//!
//! All vectors passed across this boundary are in the native right-handed
//! coordinate space (see [`crate::math::swap_handedness`]).
//!
//! Buffer id 0 is the *null buffer*: binding or queueing it is a legal no-op
//! that plays as silence. Failed decodes resolve to it so playback never has
//! to surface an error.

mod context;
mod cpal_backend;
#[cfg(test)]
pub(crate) mod mock;

pub use context::NativeContext;
pub use cpal_backend::CpalBackend;

use crate::math::Vec3;
use log::warn;
use std::fmt;
use std::sync::Arc;

/// Identifier of a native source. Valid for the lifetime of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// Identifier of a native buffer. `BufferId::NULL` plays as silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

impl BufferId {
    pub const NULL: BufferId = BufferId(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Playback state of a native source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Distance attenuation model applied to positional sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceModel {
    /// No distance attenuation.
    None,
    /// Inverse distance, clamped at the reference distance.
    InverseClamped,
}

/// Error codes of the native layer, with human-readable translations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeError {
    InvalidName,
    InvalidValue,
    InvalidOperation,
    OutOfMemory,
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NativeError::InvalidName => "invalid name",
            NativeError::InvalidValue => "invalid value",
            NativeError::InvalidOperation => "invalid operation",
            NativeError::OutOfMemory => "out of memory",
        };
        f.write_str(s)
    }
}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Logs a warning for a failed native call and swallows the error.
///
/// Native-call failures are never propagated as `Err` past the engine: the
/// operation becomes a no-op and playback continues.
pub(crate) fn warn_on_native_error<T>(desc: &str, res: NativeResult<T>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(err) => {
            warn!("[native audio error] {desc}: {err}");
            None
        }
    }
}

/// The native audio layer, as consumed by the engine core.
///
/// Implementations keep their own interior state; the engine only ever calls
/// in from its single worker thread. Listener-independent context parameters
/// (distance model, speed of sound, doppler factor) are set once by
/// [`NativeContext::init_with`].
pub trait AudioBackend: Send + Sync {
    // context-global parameters
    fn set_distance_model(&self, model: DistanceModel) -> NativeResult<()>;
    fn set_speed_of_sound(&self, meters_per_second: f32) -> NativeResult<()>;
    fn set_doppler_factor(&self, factor: f32) -> NativeResult<()>;

    /// Device/version string for the init log line.
    fn describe(&self) -> String;

    // buffers
    /// Creates a buffer filled with interleaved f32 PCM.
    fn create_buffer(&self, channels: u16, sample_rate: u32, samples: &[f32])
    -> NativeResult<BufferId>;
    /// Deleting the null buffer is a legal no-op.
    fn delete_buffer(&self, buffer: BufferId) -> NativeResult<()>;

    // sources
    /// Fails with `OutOfMemory` when the native layer has no free source.
    fn create_source(&self) -> NativeResult<SourceId>;
    /// Stops and deletes the source.
    fn delete_source(&self, source: SourceId) -> NativeResult<()>;

    /// Binds one buffer for whole-clip playback. The null buffer detaches.
    fn set_buffer(&self, source: SourceId, buffer: BufferId) -> NativeResult<()>;
    /// Appends buffers to the source's queue. Null entries are legal no-ops.
    fn queue_buffers(&self, source: SourceId, buffers: &[BufferId]) -> NativeResult<()>;
    /// Number of queued buffers the source has finished consuming.
    fn processed_buffer_count(&self, source: SourceId) -> NativeResult<usize>;
    /// Removes up to `count` finished buffers from the queue, oldest first.
    fn unqueue_buffers(&self, source: SourceId, count: usize) -> NativeResult<Vec<BufferId>>;

    /// Playback position within the currently bound/queued buffer, in frames.
    fn set_sample_offset(&self, source: SourceId, frames: u32) -> NativeResult<()>;
    fn set_looping(&self, source: SourceId, looping: bool) -> NativeResult<()>;
    fn set_gain(&self, source: SourceId, gain: f32) -> NativeResult<()>;
    fn gain(&self, source: SourceId) -> NativeResult<f32>;
    fn set_pitch(&self, source: SourceId, pitch: f32) -> NativeResult<()>;

    /// Whether positions are relative to the listener.
    fn set_relative(&self, source: SourceId, relative: bool) -> NativeResult<()>;
    fn set_position(&self, source: SourceId, pos: Vec3) -> NativeResult<()>;
    fn set_velocity(&self, source: SourceId, vel: Vec3) -> NativeResult<()>;
    fn set_reference_distance(&self, source: SourceId, distance: f32) -> NativeResult<()>;

    fn play(&self, source: SourceId) -> NativeResult<()>;
    /// No-op unless the source is currently playing.
    fn pause(&self, source: SourceId) -> NativeResult<()>;
    fn stop(&self, source: SourceId) -> NativeResult<()>;
    fn state(&self, source: SourceId) -> NativeResult<SourceState>;

    // listener
    fn set_listener_position(&self, pos: Vec3) -> NativeResult<()>;
    fn set_listener_velocity(&self, vel: Vec3) -> NativeResult<()>;
    fn set_listener_orientation(&self, at: Vec3, up: Vec3) -> NativeResult<()>;
    fn set_listener_gain(&self, gain: f32) -> NativeResult<()>;
}

/// Owning wrapper for a native buffer; deletes it on drop.
///
/// May wrap the null buffer (e.g. after a failed decode), in which case drop
/// does nothing and playback treats it as silence.
pub struct NativeBuffer {
    id: BufferId,
    backend: Arc<dyn AudioBackend>,
}

impl NativeBuffer {
    pub fn null(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            id: BufferId::NULL,
            backend,
        }
    }

    /// Creates and fills a buffer; resolves to the null buffer on failure.
    pub fn create(
        backend: Arc<dyn AudioBackend>,
        channels: u16,
        sample_rate: u32,
        samples: &[f32],
    ) -> Self {
        let id = warn_on_native_error(
            "preparing sound buffer",
            backend.create_buffer(channels, sample_rate, samples),
        )
        .unwrap_or(BufferId::NULL);
        Self { id, backend }
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.id.is_null()
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        if !self.id.is_null() {
            warn_on_native_error("failed to free sound buffer", self.backend.delete_buffer(self.id));
        }
    }
}

impl fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeBuffer").field(&self.id).finish()
    }
}

/// Owning wrapper for a native source; stops and deletes it on drop.
pub struct NativeSource {
    id: SourceId,
    backend: Arc<dyn AudioBackend>,
}

impl NativeSource {
    /// Takes ownership of a freshly created source id.
    pub fn new(id: SourceId, backend: Arc<dyn AudioBackend>) -> Self {
        Self { id, backend }
    }

    #[inline]
    pub fn id(&self) -> SourceId {
        self.id
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }
}

impl Drop for NativeSource {
    fn drop(&mut self) {
        warn_on_native_error("failed to delete source", self.backend.delete_source(self.id));
    }
}

impl fmt::Debug for NativeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeSource").field(&self.id).finish()
    }
}
