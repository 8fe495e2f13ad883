//! The thread-safe facade in front of the engine thread.
//!
//! [`FernSonicManager`] spawns the engine thread, owns both message queues,
//! allocates sound handles, and translates every call into an
//! [`EngineMessage`]. It holds no native audio state itself, so it is cheap
//! to call from a game loop.

use crate::engine::{FallbackPathProvider, SoundEngine};
use crate::error::{FernSonicError, Result};
use crate::handle::{HandleAllocator, SoundHandle};
use crate::math::Vec3;
use crate::messages::{EngineEvent, EngineMessage};
use crate::native::NativeContext;
use crate::spec::SoundSpec;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::error;
use std::collections::HashSet;
use std::path::PathBuf;
use std::thread::JoinHandle;

pub struct FernSonicManager {
    to_engine: Sender<EngineMessage>,
    events: Receiver<EngineEvent>,
    engine_thread: Option<JoinHandle<()>>,
    /// Names already registered, so duplicate loads are refused without a
    /// round trip.
    known_sound_names: HashSet<String>,
    handles: HandleAllocator,
}

impl FernSonicManager {
    /// Opens the default audio device and starts the engine thread.
    pub fn new(fallback_path_provider: Option<Box<dyn FallbackPathProvider>>) -> Result<Self> {
        let context = NativeContext::init()?;
        Self::with_context(context, fallback_path_provider)
    }

    /// Starts the engine thread on an already-initialized context. The
    /// engine (and all native state) is constructed on that thread.
    pub fn with_context(
        context: NativeContext,
        fallback_path_provider: Option<Box<dyn FallbackPathProvider>>,
    ) -> Result<Self> {
        let (to_engine, from_facade) = unbounded();
        let (to_facade, events) = unbounded();

        let engine_thread = std::thread::Builder::new()
            .name("fernsonic-engine".into())
            .spawn(move || {
                SoundEngine::new(context, fallback_path_provider, from_facade, to_facade).run()
            })
            .map_err(FernSonicError::Io)?;

        Ok(Self {
            to_engine,
            events,
            engine_thread: Some(engine_thread),
            known_sound_names: HashSet::new(),
            handles: HandleAllocator::new(),
        })
    }

    fn send(&self, msg: EngineMessage) -> Result<()> {
        self.to_engine
            .send(msg)
            .map_err(|_| FernSonicError::EngineStopped)
    }

    /// Drains engine events, releasing the engine's share of finished sound
    /// handles. Call once per game-loop iteration; never blocks.
    pub fn step(&mut self) -> Result<()> {
        for event in self.events.try_iter() {
            match event {
                EngineEvent::RemovedSound { handle } => self.handles.free_id(handle, 1),
                EngineEvent::Stopped => {
                    error!("Audio: engine thread stopped unexpectedly");
                    return Err(FernSonicError::EngineStopped);
                }
            }
        }
        Ok(())
    }

    pub fn pause_all(&self) -> Result<()> {
        self.send(EngineMessage::PauseAll)
    }

    pub fn resume_all(&self) -> Result<()> {
        self.send(EngineMessage::ResumeAll)
    }

    /// Listener vectors are in world coordinates; `at` and `up` define the
    /// orientation.
    pub fn update_listener(&self, pos: Vec3, vel: Vec3, at: Vec3, up: Vec3) -> Result<()> {
        self.send(EngineMessage::UpdateListener { pos, vel, at, up })
    }

    pub fn set_listener_gain(&self, gain: f32) -> Result<()> {
        self.send(EngineMessage::SetListenerGain { gain })
    }

    /// Registers a sound file under `name`. Returns `false` if the name is
    /// already taken or the path does not point at a file.
    pub fn load_sound_file(&mut self, name: impl Into<String>, path: PathBuf) -> Result<bool> {
        let name = name.into();
        if self.known_sound_names.contains(&name) {
            return Ok(false);
        }
        // refuse up front, so the name is not burned on a path the engine
        // would reject anyway
        if !path.is_file() {
            return Ok(false);
        }
        self.send(EngineMessage::LoadSoundFile {
            name: name.clone(),
            path,
        })?;
        self.known_sound_names.insert(name);
        Ok(true)
    }

    /// Registers a complete in-memory sound file under `name`. Returns
    /// `false` if the name is already taken.
    pub fn load_sound_data(&mut self, name: impl Into<String>, data: Vec<u8>) -> Result<bool> {
        let name = name.into();
        if self.known_sound_names.contains(&name) {
            return Ok(false);
        }
        self.send(EngineMessage::LoadSoundData {
            name: name.clone(),
            data,
        })?;
        self.known_sound_names.insert(name);
        Ok(true)
    }

    pub fn add_sound_to_group(
        &self,
        sound_name: impl Into<String>,
        group_name: impl Into<String>,
    ) -> Result<()> {
        self.send(EngineMessage::AddSoundToGroup {
            sound_name: sound_name.into(),
            group_name: group_name.into(),
        })
    }

    /// Starts a non-positional sound and returns its handle. Pass a handle
    /// to reuse a pre-allocated id, `None` to allocate one.
    pub fn play_sound(
        &mut self,
        handle: Option<SoundHandle>,
        spec: SoundSpec,
    ) -> Result<SoundHandle> {
        let handle = handle.unwrap_or_else(|| self.handles.allocate_id(1));
        self.send(EngineMessage::PlaySound { handle, spec })?;
        Ok(handle)
    }

    /// Starts a positional sound at `pos` with velocity `vel`, both in world
    /// coordinates.
    pub fn play_sound_at(
        &mut self,
        handle: Option<SoundHandle>,
        spec: SoundSpec,
        pos: Vec3,
        vel: Vec3,
    ) -> Result<SoundHandle> {
        let handle = handle.unwrap_or_else(|| self.handles.allocate_id(1));
        self.send(EngineMessage::PlaySoundAt {
            handle,
            spec,
            pos,
            vel,
        })?;
        Ok(handle)
    }

    pub fn stop_sound(&self, handle: SoundHandle) -> Result<()> {
        self.send(EngineMessage::StopSound { handle })
    }

    /// Fades the sound towards `target_gain` at `step` gain units per
    /// second. A fade to 0 removes the sound when it gets there.
    pub fn fade_sound(&self, handle: SoundHandle, step: f32, target_gain: f32) -> Result<()> {
        self.send(EngineMessage::FadeSound {
            handle,
            step,
            target_gain,
        })
    }

    pub fn update_sound_pos_vel(&self, handle: SoundHandle, pos: Vec3, vel: Vec3) -> Result<()> {
        self.send(EngineMessage::UpdateSoundPosVel { handle, pos, vel })
    }
}

impl Drop for FernSonicManager {
    fn drop(&mut self) {
        // ask the engine to stop and drain its queue until it confirms, so
        // every native source is gone before the thread is joined
        if self.to_engine.send(EngineMessage::PleaseStop).is_ok() {
            for event in self.events.iter() {
                if matches!(event, EngineEvent::Stopped) {
                    break;
                }
            }
        }
        if let Some(thread) = self.engine_thread.take() {
            let _ = thread.join();
        }
    }
}
