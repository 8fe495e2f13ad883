//! FernSonic: a thread-isolated spatial sound engine for game clients.
//!
//! All native audio state lives on one engine thread. Game code talks to it
//! through the [`FernSonicManager`] facade, which turns every call into a
//! message; the engine answers on a reverse queue that the facade drains in
//! [`FernSonicManager::step`]. Sounds are registered under names, grouped,
//! and played by group name with optional 3D position, looping, fades and
//! start offsets. Short clips are decoded whole; long ones are streamed in
//! windows from a per-asset cache.
//!
//! ```no_run
//! use fernsonic::{FernSonicManager, SoundSpec, Vec3};
//!
//! let mut sounds = FernSonicManager::new(None)?;
//! sounds.load_sound_file("step1", "sounds/step1.ogg".into())?;
//! sounds.add_sound_to_group("step1", "footsteps")?;
//!
//! sounds.play_sound_at(
//!     None,
//!     SoundSpec::new("footsteps").with_gain(0.8),
//!     Vec3::new(10.0, 0.0, 4.0),
//!     Vec3::ZERO,
//! )?;
//!
//! // each frame:
//! sounds.step()?;
//! # Ok::<(), fernsonic::FernSonicError>(())
//! ```

pub mod decode;
mod engine;
pub mod error;
mod handle;
mod manager;
pub mod math;
mod messages;
pub mod native;
mod playing_sound;
pub mod sound_data;
mod spec;

pub use engine::FallbackPathProvider;
pub use error::{FernSonicError, Result};
pub use handle::SoundHandle;
pub use manager::FernSonicManager;
pub use math::Vec3;
pub use spec::SoundSpec;

/// Dead playing sounds are swept out at most this often, in seconds.
pub const REMOVE_DEAD_SOUNDS_INTERVAL: f32 = 2.0;

/// Sounds up to this duration (inclusive), in seconds, are decoded into one
/// buffer; anything longer is streamed.
pub const SOUND_DURATION_MAX_SINGLE: f32 = 3.0;

/// Duration of each streamed buffer window, in seconds.
pub const MIN_STREAM_BUFFER_LENGTH: f32 = 1.0;

/// Streams are stepped in buckets; each bucket is worked off over one
/// bigstep of this many seconds.
pub const STREAM_BIGSTEP_TIME: f32 = 0.3;

/// Target interval between engine steps, in seconds.
pub const ENGINE_STEP_DTIME: f32 = 0.016;

// A stream with 2 queued buffers must survive a whole bigstep without
// starving, and a streamed sound must always have at least 2 windows.
const _: () = assert!(MIN_STREAM_BUFFER_LENGTH > 2.0 * STREAM_BIGSTEP_TIME);
const _: () = assert!(SOUND_DURATION_MAX_SINGLE >= 2.0 * MIN_STREAM_BUFFER_LENGTH);
