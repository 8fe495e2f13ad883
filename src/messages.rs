//! Messages crossing the facade/engine thread boundary.
//!
//! The facade produces [`EngineMessage`]s; the engine consumes them and
//! answers with [`EngineEvent`]s on the reverse queue. These are the only
//! two ways state crosses the boundary.

use crate::handle::SoundHandle;
use crate::math::Vec3;
use crate::spec::SoundSpec;
use std::path::PathBuf;

/// Commands sent from the facade to the engine thread.
#[derive(Debug)]
pub enum EngineMessage {
    PauseAll,
    ResumeAll,
    UpdateListener {
        pos: Vec3,
        vel: Vec3,
        at: Vec3,
        up: Vec3,
    },
    SetListenerGain {
        gain: f32,
    },
    LoadSoundFile {
        name: String,
        path: PathBuf,
    },
    LoadSoundData {
        name: String,
        data: Vec<u8>,
    },
    AddSoundToGroup {
        sound_name: String,
        group_name: String,
    },
    PlaySound {
        handle: SoundHandle,
        spec: SoundSpec,
    },
    PlaySoundAt {
        handle: SoundHandle,
        spec: SoundSpec,
        pos: Vec3,
        vel: Vec3,
    },
    StopSound {
        handle: SoundHandle,
    },
    FadeSound {
        handle: SoundHandle,
        step: f32,
        target_gain: f32,
    },
    UpdateSoundPosVel {
        handle: SoundHandle,
        pos: Vec3,
        vel: Vec3,
    },
    /// Shut down: stop every sound, send [`EngineEvent::Stopped`], exit.
    PleaseStop,
}

/// Replies sent from the engine thread back to the facade.
#[derive(Debug)]
pub enum EngineEvent {
    /// The engine no longer holds `handle`; its id may be reused once the
    /// caller releases it too.
    RemovedSound { handle: SoundHandle },
    /// The engine thread is about to exit. Sent exactly once, as the last
    /// event.
    Stopped,
}
