//! The engine core: the single thread that owns all native audio state.
//!
//! [`SoundEngine`] consumes [`EngineMessage`]s from the facade, keeps the
//! asset cache and the playing sounds, and steps fades and stream refills on
//! a fixed cadence. Nothing in here is shared with other threads; the only
//! way in or out is the message pair of queues.

use crate::handle::SoundHandle;
use crate::math::{swap_handedness, Vec3};
use crate::messages::{EngineEvent, EngineMessage};
use crate::native::{warn_on_native_error, NativeContext, NativeSource};
use crate::playing_sound::PlayingSound;
use crate::sound_data::{OpenSound, UnopenSound};
use crate::spec::SoundSpec;
use crate::{ENGINE_STEP_DTIME, REMOVE_DEAD_SOUNDS_INTERVAL, STREAM_BIGSTEP_TIME};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use rand::Rng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Resolves sound names to local candidate files when a requested group has
/// no loaded member. Queried on the engine thread.
pub trait FallbackPathProvider: Send {
    fn fallback_paths(&self, group_name: &str) -> Vec<PathBuf>;
}

pub struct SoundEngine {
    context: NativeContext,
    fallback_path_provider: Option<Box<dyn FallbackPathProvider>>,
    receiver: Receiver<EngineMessage>,
    events: Sender<EngineEvent>,

    time_until_dead_removal: f32,

    /// Registered but not yet decoded assets, by sound name.
    sound_datas_unopen: HashMap<String, UnopenSound>,
    /// Opened assets, by sound name. Kept for the engine's lifetime.
    sound_datas_open: HashMap<String, Rc<OpenSound>>,
    /// Sound names by group name.
    sound_groups: HashMap<String, Vec<String>>,

    sounds_playing: HashMap<SoundHandle, Rc<RefCell<PlayingSound>>>,

    /// Streamed sounds are always in exactly one of these two buckets. Each
    /// bucket gets stepped over the course of one bigstep; sounds that still
    /// stream move to the other bucket for the next one.
    sounds_streaming_current_bigstep: Vec<Weak<RefCell<PlayingSound>>>,
    sounds_streaming_next_bigstep: Vec<Weak<RefCell<PlayingSound>>>,
    /// Time left in the current bigstep.
    stream_timer: f32,

    sounds_fading: Vec<Weak<RefCell<PlayingSound>>>,

    is_paused: bool,
}

impl SoundEngine {
    pub fn new(
        context: NativeContext,
        fallback_path_provider: Option<Box<dyn FallbackPathProvider>>,
        receiver: Receiver<EngineMessage>,
        events: Sender<EngineEvent>,
    ) -> Self {
        Self {
            context,
            fallback_path_provider,
            receiver,
            events,
            time_until_dead_removal: REMOVE_DEAD_SOUNDS_INTERVAL,
            sound_datas_unopen: HashMap::new(),
            sound_datas_open: HashMap::new(),
            sound_groups: HashMap::new(),
            sounds_playing: HashMap::new(),
            sounds_streaming_current_bigstep: Vec::new(),
            sounds_streaming_next_bigstep: Vec::new(),
            stream_timer: STREAM_BIGSTEP_TIME,
            sounds_fading: Vec::new(),
            is_paused: false,
        }
    }

    /// The engine thread's main loop. Returns when a shutdown was requested
    /// or the facade went away; [`EngineEvent::Stopped`] is the last event
    /// sent either way.
    pub fn run(mut self) {
        let mut last_step = Instant::now();
        loop {
            let elapsed = last_step.elapsed().as_secs_f32();
            let remaining = ENGINE_STEP_DTIME - elapsed;

            let stop_requested = if remaining <= 0.0 {
                last_step = Instant::now();
                self.step(elapsed);
                false
            } else {
                match self.receiver.recv_timeout(Duration::from_secs_f32(remaining)) {
                    Ok(msg) => self.handle_message(msg),
                    Err(RecvTimeoutError::Timeout) => false,
                    Err(RecvTimeoutError::Disconnected) => true,
                }
            };

            if stop_requested {
                break;
            }
        }

        // release every source before reporting back
        self.sounds_playing.clear();
        let _ = self.events.send(EngineEvent::Stopped);
    }

    /// Returns `true` when the engine should shut down.
    fn handle_message(&mut self, msg: EngineMessage) -> bool {
        use EngineMessage::*;
        match msg {
            PauseAll => self.pause_all(),
            ResumeAll => self.resume_all(),
            UpdateListener { pos, vel, at, up } => self.update_listener(pos, vel, at, up),
            SetListenerGain { gain } => self.set_listener_gain(gain),
            LoadSoundFile { name, path } => {
                self.load_sound_file(name, path);
            }
            LoadSoundData { name, data } => {
                self.load_sound_data(name, data);
            }
            AddSoundToGroup {
                sound_name,
                group_name,
            } => self.add_sound_to_group(sound_name, group_name),
            PlaySound { handle, spec } => self.play_sound_generic(handle, spec, None),
            PlaySoundAt {
                handle,
                spec,
                pos,
                vel,
            } => {
                let pos_vel = (swap_handedness(pos), swap_handedness(vel));
                self.play_sound_generic(handle, spec, Some(pos_vel));
            }
            StopSound { handle } => self.stop_sound(handle),
            FadeSound {
                handle,
                step,
                target_gain,
            } => self.fade_sound(handle, step, target_gain),
            UpdateSoundPosVel { handle, pos, vel } => {
                self.update_sound_pos_vel(handle, pos, vel)
            }
            PleaseStop => return true,
        }
        false
    }

    fn step(&mut self, dtime: f32) {
        self.time_until_dead_removal -= dtime;
        if self.time_until_dead_removal <= 0.0 {
            if !self.sounds_playing.is_empty() {
                debug!("Audio: {} playing sounds", self.sounds_playing.len());
                let dead: Vec<SoundHandle> = self
                    .sounds_playing
                    .iter()
                    .filter(|(_, sound)| sound.borrow().is_dead())
                    .map(|(handle, _)| *handle)
                    .collect();
                for handle in dead {
                    self.sounds_playing.remove(&handle);
                    self.report_removed_sound(handle);
                }
            }
            self.time_until_dead_removal = REMOVE_DEAD_SOUNDS_INTERVAL;
        }

        self.do_fades(dtime);
        self.step_streams(dtime);
    }

    fn do_fades(&mut self, dtime: f32) {
        let mut i = 0;
        while i < self.sounds_fading.len() {
            let still_fading = self.sounds_fading[i]
                .upgrade()
                .is_some_and(|sound| sound.borrow_mut().do_fade(dtime));
            if still_fading {
                i += 1;
            } else {
                self.sounds_fading.swap_remove(i);
            }
        }
    }

    fn step_streams(&mut self, dtime: f32) {
        // spread the refills of the current bucket over the whole bigstep
        let mut num_issued = (self.sounds_streaming_current_bigstep.len() as f32 * dtime
            / self.stream_timer)
            .ceil() as usize;

        while num_issued > 0 {
            num_issued -= 1;
            let Some(weak) = self.sounds_streaming_current_bigstep.pop() else {
                break;
            };
            let Some(sound) = weak.upgrade() else {
                continue;
            };
            if !sound.borrow_mut().step_stream() {
                // nothing left to queue; the sound leaves the rotation
                continue;
            }
            self.sounds_streaming_next_bigstep.push(weak);
        }

        self.stream_timer -= dtime;
        if self.stream_timer <= 0.0 {
            self.stream_timer = STREAM_BIGSTEP_TIME;
            std::mem::swap(
                &mut self.sounds_streaming_current_bigstep,
                &mut self.sounds_streaming_next_bigstep,
            );
        }
    }

    fn report_removed_sound(&self, handle: SoundHandle) {
        let _ = self.events.send(EngineEvent::RemovedSound { handle });
    }

    fn pause_all(&mut self) {
        for sound in self.sounds_playing.values() {
            sound.borrow().pause();
        }
        self.is_paused = true;
    }

    fn resume_all(&mut self) {
        for sound in self.sounds_playing.values() {
            sound.borrow().resume();
        }
        self.is_paused = false;
    }

    fn update_listener(&self, pos: Vec3, vel: Vec3, at: Vec3, up: Vec3) {
        let backend = self.context.backend();
        warn_on_native_error(
            "setting listener position",
            backend.set_listener_position(swap_handedness(pos)),
        );
        warn_on_native_error(
            "setting listener velocity",
            backend.set_listener_velocity(swap_handedness(vel)),
        );
        warn_on_native_error(
            "setting listener orientation",
            backend.set_listener_orientation(swap_handedness(at), swap_handedness(up)),
        );
    }

    fn set_listener_gain(&self, gain: f32) {
        warn_on_native_error(
            "setting listener gain",
            self.context.backend().set_listener_gain(gain),
        );
    }

    /// Registers a sound file. Refused if `name` is already taken or the
    /// path does not point at a file.
    fn load_sound_file(&mut self, name: String, path: PathBuf) -> bool {
        if self.sound_datas_open.contains_key(&name)
            || self.sound_datas_unopen.contains_key(&name)
        {
            return false;
        }
        if !path.is_file() {
            return false;
        }
        self.sound_datas_unopen.insert(name, UnopenSound::File(path));
        true
    }

    /// Registers an in-memory sound. Refused if `name` is already taken.
    fn load_sound_data(&mut self, name: String, data: Vec<u8>) -> bool {
        if self.sound_datas_open.contains_key(&name)
            || self.sound_datas_unopen.contains_key(&name)
        {
            return false;
        }
        self.sound_datas_unopen.insert(name, UnopenSound::Data(data));
        true
    }

    fn add_sound_to_group(&mut self, sound_name: String, group_name: String) {
        self.sound_groups
            .entry(group_name)
            .or_default()
            .push(sound_name);
    }

    /// Returns the open asset for `sound_name`, opening (and caching) it on
    /// first use.
    fn open_single_sound(&mut self, sound_name: &str) -> Option<Rc<OpenSound>> {
        if let Some(open) = self.sound_datas_open.get(sound_name) {
            return Some(Rc::clone(open));
        }

        let unopen = self.sound_datas_unopen.remove(sound_name)?;
        match unopen.open(sound_name, self.context.backend()) {
            Ok(open) => {
                let open = Rc::new(open);
                self.sound_datas_open
                    .insert(sound_name.to_string(), Rc::clone(&open));
                Some(open)
            }
            Err(err) => {
                warn!("Audio: failed to open sound \"{sound_name}\": {err}");
                None
            }
        }
    }

    /// Picks a random openable member of the group. Members that fail to
    /// open are dropped from the group for good.
    fn get_loaded_sound_name_from_group(&mut self, group_name: &str) -> Option<String> {
        loop {
            let group = self.sound_groups.get_mut(group_name)?;
            if group.is_empty() {
                return None;
            }
            let j = rand::thread_rng().gen_range(0..group.len());
            let chosen = group[j].clone();

            if self.open_single_sound(&chosen).is_some() {
                return Some(chosen);
            }

            if let Some(group) = self.sound_groups.get_mut(group_name) {
                group.swap_remove(j);
            }
        }
    }

    /// Like [`Self::get_loaded_sound_name_from_group`], but consults the
    /// fallback path provider when the group has no loadable member.
    fn get_or_load_loaded_sound_name_from_group(&mut self, group_name: &str) -> Option<String> {
        if let Some(name) = self.get_loaded_sound_name_from_group(group_name) {
            return Some(name);
        }

        let paths = match &self.fallback_path_provider {
            Some(provider) => provider.fallback_paths(group_name),
            None => return None,
        };

        for path in paths {
            // the path itself doubles as the sound name
            let name = path.to_string_lossy().into_owned();
            if self.load_sound_file(name.clone(), path) {
                self.add_sound_to_group(name, group_name.to_string());
            }
        }

        self.get_loaded_sound_name_from_group(group_name)
    }

    fn create_playing_sound(
        &mut self,
        sound_name: &str,
        looping: bool,
        volume: f32,
        pitch: f32,
        start_time: f32,
        pos_vel: Option<(Vec3, Vec3)>,
    ) -> Option<Rc<RefCell<PlayingSound>>> {
        debug!("Audio: creating playing sound \"{sound_name}\"");

        let data = self.open_single_sound(sound_name)?;

        // source exhaustion is the common failure here
        let source_id = warn_on_native_error(
            "creating playback source",
            self.context.backend().create_source(),
        )?;
        let source = NativeSource::new(source_id, std::sync::Arc::clone(self.context.backend()));

        let sound = PlayingSound::new(source, data, looping, volume, pitch, start_time, pos_vel);
        sound.play();
        if self.is_paused {
            sound.pause();
        }
        Some(Rc::new(RefCell::new(sound)))
    }

    fn play_sound_generic(
        &mut self,
        handle: SoundHandle,
        spec: SoundSpec,
        pos_vel: Option<(Vec3, Vec3)>,
    ) {
        if spec.name.is_empty() {
            self.report_removed_sound(handle);
            return;
        }

        let sound_name = if spec.use_local_fallback {
            self.get_or_load_loaded_sound_name_from_group(&spec.name)
        } else {
            self.get_loaded_sound_name_from_group(&spec.name)
        };
        let Some(sound_name) = sound_name else {
            info!("Audio: \"{}\" not found", spec.name);
            self.report_removed_sound(handle);
            return;
        };

        let mut volume = spec.gain.max(0.0);
        let target_fade_volume = volume;
        if spec.fade > 0.0 {
            // fading in: start silent
            volume = 0.0;
        }

        let mut pitch = spec.pitch;
        if !(pitch > 0.0) {
            warn!("Audio: illegal pitch value: {}", spec.pitch);
            pitch = 1.0;
        }

        let mut start_time = spec.start_time;
        if !start_time.is_finite() {
            warn!("Audio: illegal start_time value: {start_time}");
            start_time = 0.0;
        }

        let Some(sound) = self.create_playing_sound(
            &sound_name,
            spec.loop_,
            volume,
            pitch,
            start_time,
            pos_vel,
        ) else {
            self.report_removed_sound(handle);
            return;
        };

        if sound.borrow().is_streaming() {
            self.sounds_streaming_next_bigstep.push(Rc::downgrade(&sound));
        }

        self.sounds_playing.insert(handle, sound);

        if spec.fade > 0.0 {
            self.fade_sound(handle, spec.fade, target_fade_volume);
        }
    }

    fn stop_sound(&mut self, handle: SoundHandle) {
        self.sounds_playing.remove(&handle);
        self.report_removed_sound(handle);
    }

    fn fade_sound(&mut self, handle: SoundHandle, step: f32, target_gain: f32) {
        if step == 0.0 {
            return;
        }
        let Some(sound) = self.sounds_playing.get(&handle) else {
            return;
        };
        if sound.borrow_mut().fade(step, target_gain) {
            self.sounds_fading.push(Rc::downgrade(sound));
        }
    }

    fn update_sound_pos_vel(&self, handle: SoundHandle, pos: Vec3, vel: Vec3) {
        if let Some(sound) = self.sounds_playing.get(&handle) {
            sound
                .borrow()
                .update_pos_vel(swap_handedness(pos), swap_handedness(vel));
        }
    }
}
