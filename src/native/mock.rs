//! In-memory backend for tests: full bookkeeping, no audio output.
//!
//! Buffer consumption does not happen on its own; tests drive it with
//! [`MockBackend::finish_buffers`] to simulate the native layer finishing
//! queued buffers.

use super::{
    AudioBackend, BufferId, DistanceModel, NativeError, NativeResult, SourceId, SourceState,
};
use crate::math::Vec3;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct MockBuffer {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

#[derive(Debug)]
pub struct MockSource {
    pub state: SourceState,
    pub static_buffer: BufferId,
    pub queue: VecDeque<BufferId>,
    pub processed: usize,
    pub sample_offset: u32,
    pub looping: bool,
    pub gain: f32,
    pub pitch: f32,
    pub relative: bool,
    pub position: Vec3,
    pub velocity: Vec3,
    pub reference_distance: f32,
}

impl MockSource {
    fn new() -> Self {
        Self {
            state: SourceState::Initial,
            static_buffer: BufferId::NULL,
            queue: VecDeque::new(),
            processed: 0,
            sample_offset: 0,
            looping: false,
            gain: 1.0,
            pitch: 1.0,
            relative: false,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            reference_distance: 1.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockListener {
    pub position: Vec3,
    pub velocity: Vec3,
    pub at: Vec3,
    pub up: Vec3,
    pub gain: f32,
}

#[derive(Default)]
struct MockState {
    distance_model: Option<DistanceModel>,
    speed_of_sound: Option<f32>,
    doppler_factor: Option<f32>,
    buffers: HashMap<u32, MockBuffer>,
    sources: HashMap<u32, MockSource>,
    next_buffer_id: u32,
    next_source_id: u32,
    listener: MockListener,
    fail_source_creation: bool,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        {
            let mut st = backend.state.lock().unwrap();
            st.next_buffer_id = 1;
            st.next_source_id = 1;
            st.listener.gain = 1.0;
        }
        backend
    }

    /// Makes every following `create_source` fail with `OutOfMemory`.
    pub fn fail_source_creation(&self, fail: bool) {
        self.state.lock().unwrap().fail_source_creation = fail;
    }

    /// Simulates the native layer finishing `count` queued buffers.
    pub fn finish_buffers(&self, source: SourceId, count: usize) {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).expect("unknown source");
        src.processed = (src.processed + count).min(src.queue.len());
    }

    /// Simulates playback halting because the queue ran dry.
    pub fn starve(&self, source: SourceId) {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).expect("unknown source");
        src.processed = src.queue.len();
        src.state = SourceState::Stopped;
    }

    pub fn with_source<R>(&self, source: SourceId, f: impl FnOnce(&MockSource) -> R) -> R {
        let st = self.state.lock().unwrap();
        f(st.sources.get(&source.0).expect("unknown source"))
    }

    pub fn with_buffer<R>(&self, buffer: BufferId, f: impl FnOnce(&MockBuffer) -> R) -> R {
        let st = self.state.lock().unwrap();
        f(st.buffers.get(&buffer.0).expect("unknown buffer"))
    }

    pub fn buffer_samples(&self, buffer: BufferId) -> Vec<f32> {
        self.with_buffer(buffer, |b| b.samples.clone())
    }

    pub fn listener_snapshot(&self) -> (Vec3, Vec3, Vec3, Vec3, f32) {
        let st = self.state.lock().unwrap();
        let l = &st.listener;
        (l.position, l.velocity, l.at, l.up, l.gain)
    }

    pub fn source_count(&self) -> usize {
        self.state.lock().unwrap().sources.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    pub fn context_params(&self) -> (Option<DistanceModel>, Option<f32>, Option<f32>) {
        let st = self.state.lock().unwrap();
        (st.distance_model, st.speed_of_sound, st.doppler_factor)
    }
}

impl AudioBackend for MockBackend {
    fn set_distance_model(&self, model: DistanceModel) -> NativeResult<()> {
        self.state.lock().unwrap().distance_model = Some(model);
        Ok(())
    }

    fn set_speed_of_sound(&self, meters_per_second: f32) -> NativeResult<()> {
        self.state.lock().unwrap().speed_of_sound = Some(meters_per_second);
        Ok(())
    }

    fn set_doppler_factor(&self, factor: f32) -> NativeResult<()> {
        self.state.lock().unwrap().doppler_factor = Some(factor);
        Ok(())
    }

    fn describe(&self) -> String {
        "mock backend".into()
    }

    fn create_buffer(
        &self,
        channels: u16,
        sample_rate: u32,
        samples: &[f32],
    ) -> NativeResult<BufferId> {
        if channels == 0 || channels > 2 || sample_rate == 0 {
            return Err(NativeError::InvalidValue);
        }
        let mut st = self.state.lock().unwrap();
        let id = st.next_buffer_id;
        st.next_buffer_id += 1;
        st.buffers.insert(
            id,
            MockBuffer {
                channels,
                sample_rate,
                samples: samples.to_vec(),
            },
        );
        Ok(BufferId(id))
    }

    fn delete_buffer(&self, buffer: BufferId) -> NativeResult<()> {
        if buffer.is_null() {
            return Ok(());
        }
        self.state
            .lock()
            .unwrap()
            .buffers
            .remove(&buffer.0)
            .map(|_| ())
            .ok_or(NativeError::InvalidName)
    }

    fn create_source(&self) -> NativeResult<SourceId> {
        let mut st = self.state.lock().unwrap();
        if st.fail_source_creation {
            return Err(NativeError::OutOfMemory);
        }
        let id = st.next_source_id;
        st.next_source_id += 1;
        st.sources.insert(id, MockSource::new());
        Ok(SourceId(id))
    }

    fn delete_source(&self, source: SourceId) -> NativeResult<()> {
        self.state
            .lock()
            .unwrap()
            .sources
            .remove(&source.0)
            .map(|_| ())
            .ok_or(NativeError::InvalidName)
    }

    fn set_buffer(&self, source: SourceId, buffer: BufferId) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        if !buffer.is_null() && !st.buffers.contains_key(&buffer.0) {
            return Err(NativeError::InvalidName);
        }
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.static_buffer = buffer;
        Ok(())
    }

    fn queue_buffers(&self, source: SourceId, buffers: &[BufferId]) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        for id in buffers {
            if !id.is_null() && !st.buffers.contains_key(&id.0) {
                return Err(NativeError::InvalidName);
            }
        }
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.queue.extend(buffers.iter().copied().filter(|b| !b.is_null()));
        Ok(())
    }

    fn processed_buffer_count(&self, source: SourceId) -> NativeResult<usize> {
        let st = self.state.lock().unwrap();
        st.sources
            .get(&source.0)
            .map(|s| s.processed)
            .ok_or(NativeError::InvalidName)
    }

    fn unqueue_buffers(&self, source: SourceId, count: usize) -> NativeResult<Vec<BufferId>> {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        if count > src.processed {
            return Err(NativeError::InvalidValue);
        }
        let mut removed = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(b) = src.queue.pop_front() {
                removed.push(b);
                src.processed -= 1;
            }
        }
        Ok(removed)
    }

    fn set_sample_offset(&self, source: SourceId, frames: u32) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.sample_offset = frames;
        Ok(())
    }

    fn set_looping(&self, source: SourceId, looping: bool) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.looping = looping;
        Ok(())
    }

    fn set_gain(&self, source: SourceId, gain: f32) -> NativeResult<()> {
        if !(gain >= 0.0) {
            return Err(NativeError::InvalidValue);
        }
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.gain = gain;
        Ok(())
    }

    fn gain(&self, source: SourceId) -> NativeResult<f32> {
        let st = self.state.lock().unwrap();
        st.sources
            .get(&source.0)
            .map(|s| s.gain)
            .ok_or(NativeError::InvalidName)
    }

    fn set_pitch(&self, source: SourceId, pitch: f32) -> NativeResult<()> {
        if !(pitch > 0.0) {
            return Err(NativeError::InvalidValue);
        }
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.pitch = pitch;
        Ok(())
    }

    fn set_relative(&self, source: SourceId, relative: bool) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.relative = relative;
        Ok(())
    }

    fn set_position(&self, source: SourceId, pos: Vec3) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.position = pos;
        Ok(())
    }

    fn set_velocity(&self, source: SourceId, vel: Vec3) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.velocity = vel;
        Ok(())
    }

    fn set_reference_distance(&self, source: SourceId, distance: f32) -> NativeResult<()> {
        if !(distance > 0.0) {
            return Err(NativeError::InvalidValue);
        }
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.reference_distance = distance;
        Ok(())
    }

    fn play(&self, source: SourceId) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        // nothing to play: the source stops right away
        src.state = if src.static_buffer.is_null() && src.queue.is_empty() {
            SourceState::Stopped
        } else {
            SourceState::Playing
        };
        Ok(())
    }

    fn pause(&self, source: SourceId) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        if src.state == SourceState::Playing {
            src.state = SourceState::Paused;
        }
        Ok(())
    }

    fn stop(&self, source: SourceId) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        let src = st.sources.get_mut(&source.0).ok_or(NativeError::InvalidName)?;
        src.state = SourceState::Stopped;
        Ok(())
    }

    fn state(&self, source: SourceId) -> NativeResult<SourceState> {
        let st = self.state.lock().unwrap();
        st.sources
            .get(&source.0)
            .map(|s| s.state)
            .ok_or(NativeError::InvalidName)
    }

    fn set_listener_position(&self, pos: Vec3) -> NativeResult<()> {
        self.state.lock().unwrap().listener.position = pos;
        Ok(())
    }

    fn set_listener_velocity(&self, vel: Vec3) -> NativeResult<()> {
        self.state.lock().unwrap().listener.velocity = vel;
        Ok(())
    }

    fn set_listener_orientation(&self, at: Vec3, up: Vec3) -> NativeResult<()> {
        let mut st = self.state.lock().unwrap();
        st.listener.at = at;
        st.listener.up = up;
        Ok(())
    }

    fn set_listener_gain(&self, gain: f32) -> NativeResult<()> {
        if !(gain >= 0.0) {
            return Err(NativeError::InvalidValue);
        }
        self.state.lock().unwrap().listener.gain = gain;
        Ok(())
    }
}
