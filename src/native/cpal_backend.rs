//! The one modeled native backend: a software 3D mixer feeding a cpal
//! output stream.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on its own output
//! thread for the lifetime of the backend. All engine-facing state sits
//! behind one mutex that the audio callback locks per period.

use super::{
    AudioBackend, BufferId, DistanceModel, NativeError, NativeResult, SourceId, SourceState,
};
use crate::error::{FernSonicError, Result};
use crate::math::Vec3;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender, bounded};
use log::error;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Native sources are a finite resource; creation past this count fails
/// with `OutOfMemory`, matching hardware-backed audio APIs.
const MAX_SOURCES: usize = 256;

struct BufferData {
    channels: u16,
    sample_rate: u32,
    /// Interleaved f32 PCM.
    samples: Vec<f32>,
}

impl BufferData {
    fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }
}

struct Source {
    state: SourceState,
    static_buffer: BufferId,
    /// Queued buffers; the first `processed` of them are finished.
    queue: VecDeque<BufferId>,
    processed: usize,
    /// Read position in the current buffer, in frames.
    cursor: f64,
    looping: bool,
    gain: f32,
    pitch: f32,
    relative: bool,
    position: Vec3,
    #[allow(dead_code)]
    velocity: Vec3,
    reference_distance: f32,
}

impl Source {
    fn new() -> Self {
        Self {
            state: SourceState::Initial,
            static_buffer: BufferId::NULL,
            queue: VecDeque::new(),
            processed: 0,
            cursor: 0.0,
            looping: false,
            gain: 1.0,
            pitch: 1.0,
            relative: false,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            reference_distance: 1.0,
        }
    }

    fn current_queued(&self) -> Option<BufferId> {
        self.queue.get(self.processed).copied()
    }
}

struct Listener {
    position: Vec3,
    gain: f32,
}

struct MixerState {
    distance_model: DistanceModel,
    buffers: HashMap<u32, BufferData>,
    sources: HashMap<u32, Source>,
    next_buffer_id: u32,
    next_source_id: u32,
    listener: Listener,
}

impl MixerState {
    fn new() -> Self {
        Self {
            distance_model: DistanceModel::InverseClamped,
            buffers: HashMap::new(),
            sources: HashMap::new(),
            next_buffer_id: 1,
            next_source_id: 1,
            listener: Listener {
                position: Vec3::ZERO,
                gain: 1.0,
            },
        }
    }

    fn source(&mut self, id: SourceId) -> NativeResult<&mut Source> {
        self.sources.get_mut(&id.0).ok_or(NativeError::InvalidName)
    }
}

pub struct CpalBackend {
    state: Arc<Mutex<MixerState>>,
    device_name: String,
    shutdown: Sender<()>,
    output_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalBackend {
    /// Opens the default output device and starts the output thread.
    pub fn open() -> Result<Self> {
        let state = Arc::new(Mutex::new(MixerState::new()));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<String, String>>(1);

        let thread_state = Arc::clone(&state);
        let handle = std::thread::Builder::new()
            .name("fernsonic-output".into())
            .spawn(move || run_output_thread(thread_state, ready_tx, shutdown_rx))
            .map_err(FernSonicError::Io)?;

        match ready_rx.recv() {
            Ok(Ok(device_name)) => Ok(Self {
                state,
                device_name,
                shutdown: shutdown_tx,
                output_thread: Mutex::new(Some(handle)),
            }),
            Ok(Err(msg)) => {
                let _ = handle.join();
                Err(FernSonicError::AudioDevice(msg))
            }
            Err(_) => {
                let _ = handle.join();
                Err(FernSonicError::AudioDevice(
                    "output thread died during device setup".into(),
                ))
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MixerState> {
        // a panic while holding the mixer lock is unrecoverable anyway
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Ok(mut guard) = self.output_thread.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

fn run_output_thread(
    state: Arc<Mutex<MixerState>>,
    ready: Sender<std::result::Result<String, String>>,
    shutdown: Receiver<()>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            let _ = ready.send(Err("no default output device available".into()));
            return;
        }
    };

    let default_config = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to query default config: {e}")));
            return;
        }
    };

    let config: cpal::StreamConfig = default_config.config();
    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&state)),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&state)),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&state)),
        other => Err(format!("unsupported sample format {other}")),
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(format!("failed to start stream: {e}")));
        return;
    }

    let name = device.name().unwrap_or_else(|_| "<unnamed device>".into());
    let _ = ready.send(Ok(name));

    // the stream plays until the backend is dropped
    let _ = shutdown.recv();
    drop(stream);
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    state: Arc<Mutex<MixerState>>,
) -> std::result::Result<cpal::Stream, String>
where
    T: SizedSample + FromSample<f32>,
{
    let out_channels = config.channels as usize;
    let out_rate = config.sample_rate.0;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.clear();
                scratch.resize(data.len(), 0.0);
                {
                    let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
                    mix_into(&mut st, &mut scratch, out_channels, out_rate);
                }
                for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(s);
                }
            },
            move |err| {
                error!("Audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| format!("failed to build stream: {e}"))
}

/// Mixes all playing sources into `out` (interleaved, zero-initialized).
fn mix_into(state: &mut MixerState, out: &mut [f32], out_channels: usize, out_rate: u32) {
    let frames = out.len() / out_channels;
    let listener_pos = state.listener.position;
    let listener_gain = state.listener.gain;
    let model = state.distance_model;
    let MixerState {
        buffers, sources, ..
    } = state;

    for source in sources.values_mut() {
        if source.state != SourceState::Playing {
            continue;
        }

        let mut gain = source.gain * listener_gain;
        if model == DistanceModel::InverseClamped {
            let rel = if source.relative {
                source.position
            } else {
                source.position - listener_pos
            };
            let reference = source.reference_distance.max(f32::EPSILON);
            let dist = rel.length().max(reference);
            gain *= reference / (reference + (dist - reference));
        }

        for frame in 0..frames {
            let buffer_id = if source.static_buffer.is_null() {
                source.current_queued()
            } else {
                Some(source.static_buffer)
            };

            let Some(buffer_id) = buffer_id else {
                source.state = SourceState::Stopped;
                break;
            };
            let Some(buffer) = buffers.get(&buffer_id.0) else {
                source.state = SourceState::Stopped;
                break;
            };

            if source.cursor >= buffer.frames() as f64 {
                source.cursor = 0.0;
                if !source.static_buffer.is_null() {
                    if !source.looping {
                        source.state = SourceState::Stopped;
                        break;
                    }
                } else {
                    source.processed += 1;
                    if source.processed >= source.queue.len() {
                        source.state = SourceState::Stopped;
                        break;
                    }
                    continue;
                }
            }

            let (left, right) = sample_at(buffer, source.cursor);
            let base = frame * out_channels;
            match out_channels {
                1 => out[base] += gain * 0.5 * (left + right),
                _ => {
                    out[base] += gain * left;
                    out[base + 1] += gain * right;
                }
            }

            let step = source.pitch as f64 * buffer.sample_rate as f64 / out_rate as f64;
            source.cursor += step;
        }
    }
}

/// Linearly interpolated stereo frame at a fractional cursor. Mono buffers
/// return the same value for both channels.
fn sample_at(buffer: &BufferData, cursor: f64) -> (f32, f32) {
    let channels = buffer.channels as usize;
    let frames = buffer.frames();
    let i0 = cursor as usize;
    let i1 = (i0 + 1).min(frames.saturating_sub(1));
    let t = (cursor - i0 as f64) as f32;

    let read = |frame: usize, ch: usize| buffer.samples[frame * channels + ch.min(channels - 1)];
    let l = read(i0, 0) * (1.0 - t) + read(i1, 0) * t;
    let r = read(i0, 1) * (1.0 - t) + read(i1, 1) * t;
    (l, r)
}

impl AudioBackend for CpalBackend {
    fn set_distance_model(&self, model: DistanceModel) -> NativeResult<()> {
        self.lock().distance_model = model;
        Ok(())
    }

    fn set_speed_of_sound(&self, meters_per_second: f32) -> NativeResult<()> {
        if !(meters_per_second > 0.0) {
            return Err(NativeError::InvalidValue);
        }
        // stored nowhere: doppler is forced off, so it has no effect yet
        Ok(())
    }

    fn set_doppler_factor(&self, factor: f32) -> NativeResult<()> {
        if !(factor >= 0.0) {
            return Err(NativeError::InvalidValue);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("cpal output on \"{}\"", self.device_name)
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
        let mut st = self.lock();
        let id = st.next_buffer_id;
        st.next_buffer_id += 1;
        st.buffers.insert(
            id,
            BufferData {
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
        let mut st = self.lock();
        st.buffers
            .remove(&buffer.0)
            .map(|_| ())
            .ok_or(NativeError::InvalidName)
    }

    fn create_source(&self) -> NativeResult<SourceId> {
        let mut st = self.lock();
        if st.sources.len() >= MAX_SOURCES {
            return Err(NativeError::OutOfMemory);
        }
        let id = st.next_source_id;
        st.next_source_id += 1;
        st.sources.insert(id, Source::new());
        Ok(SourceId(id))
    }

    fn delete_source(&self, source: SourceId) -> NativeResult<()> {
        self.lock()
            .sources
            .remove(&source.0)
            .map(|_| ())
            .ok_or(NativeError::InvalidName)
    }

    fn set_buffer(&self, source: SourceId, buffer: BufferId) -> NativeResult<()> {
        let mut st = self.lock();
        if !buffer.is_null() && !st.buffers.contains_key(&buffer.0) {
            return Err(NativeError::InvalidName);
        }
        let src = st.source(source)?;
        src.static_buffer = buffer;
        src.cursor = 0.0;
        Ok(())
    }

    fn queue_buffers(&self, source: SourceId, buffers: &[BufferId]) -> NativeResult<()> {
        let mut st = self.lock();
        for id in buffers {
            if !id.is_null() && !st.buffers.contains_key(&id.0) {
                return Err(NativeError::InvalidName);
            }
        }
        let src = st.source(source)?;
        // queueing the null buffer is a legal no-op
        src.queue.extend(buffers.iter().copied().filter(|b| !b.is_null()));
        Ok(())
    }

    fn processed_buffer_count(&self, source: SourceId) -> NativeResult<usize> {
        let mut st = self.lock();
        Ok(st.source(source)?.processed)
    }

    fn unqueue_buffers(&self, source: SourceId, count: usize) -> NativeResult<Vec<BufferId>> {
        let mut st = self.lock();
        let src = st.source(source)?;
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
        let mut st = self.lock();
        st.source(source)?.cursor = frames as f64;
        Ok(())
    }

    fn set_looping(&self, source: SourceId, looping: bool) -> NativeResult<()> {
        let mut st = self.lock();
        st.source(source)?.looping = looping;
        Ok(())
    }

    fn set_gain(&self, source: SourceId, gain: f32) -> NativeResult<()> {
        if !(gain >= 0.0) {
            return Err(NativeError::InvalidValue);
        }
        let mut st = self.lock();
        st.source(source)?.gain = gain;
        Ok(())
    }

    fn gain(&self, source: SourceId) -> NativeResult<f32> {
        let mut st = self.lock();
        Ok(st.source(source)?.gain)
    }

    fn set_pitch(&self, source: SourceId, pitch: f32) -> NativeResult<()> {
        if !(pitch > 0.0) {
            return Err(NativeError::InvalidValue);
        }
        let mut st = self.lock();
        st.source(source)?.pitch = pitch;
        Ok(())
    }

    fn set_relative(&self, source: SourceId, relative: bool) -> NativeResult<()> {
        let mut st = self.lock();
        st.source(source)?.relative = relative;
        Ok(())
    }

    fn set_position(&self, source: SourceId, pos: Vec3) -> NativeResult<()> {
        let mut st = self.lock();
        st.source(source)?.position = pos;
        Ok(())
    }

    fn set_velocity(&self, source: SourceId, vel: Vec3) -> NativeResult<()> {
        let mut st = self.lock();
        st.source(source)?.velocity = vel;
        Ok(())
    }

    fn set_reference_distance(&self, source: SourceId, distance: f32) -> NativeResult<()> {
        if !(distance > 0.0) {
            return Err(NativeError::InvalidValue);
        }
        let mut st = self.lock();
        st.source(source)?.reference_distance = distance;
        Ok(())
    }

    fn play(&self, source: SourceId) -> NativeResult<()> {
        let mut st = self.lock();
        let src = st.source(source)?;
        if src.static_buffer.is_null() && src.queue.is_empty() {
            // nothing to play: the source stops right away
            src.state = SourceState::Stopped;
            return Ok(());
        }
        if src.state == SourceState::Stopped {
            src.cursor = 0.0;
        }
        src.state = SourceState::Playing;
        Ok(())
    }

    fn pause(&self, source: SourceId) -> NativeResult<()> {
        let mut st = self.lock();
        let src = st.source(source)?;
        if src.state == SourceState::Playing {
            src.state = SourceState::Paused;
        }
        Ok(())
    }

    fn stop(&self, source: SourceId) -> NativeResult<()> {
        let mut st = self.lock();
        let src = st.source(source)?;
        src.state = SourceState::Stopped;
        Ok(())
    }

    fn state(&self, source: SourceId) -> NativeResult<SourceState> {
        let mut st = self.lock();
        Ok(st.source(source)?.state)
    }

    fn set_listener_position(&self, pos: Vec3) -> NativeResult<()> {
        self.lock().listener.position = pos;
        Ok(())
    }

    fn set_listener_velocity(&self, _vel: Vec3) -> NativeResult<()> {
        // doppler is off; velocity currently has no audible effect
        Ok(())
    }

    fn set_listener_orientation(&self, at: Vec3, up: Vec3) -> NativeResult<()> {
        if at.length_squared() == 0.0 || up.length_squared() == 0.0 {
            return Err(NativeError::InvalidValue);
        }
        Ok(())
    }

    fn set_listener_gain(&self, gain: f32) -> NativeResult<()> {
        if !(gain >= 0.0) {
            return Err(NativeError::InvalidValue);
        }
        self.lock().listener.gain = gain;
        Ok(())
    }
}
