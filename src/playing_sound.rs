//! One playing instance of an opened sound asset.
//!
//! A [`PlayingSound`] owns its native source and shares the asset with the
//! engine's cache. Fully buffered sounds are bound once and looped natively;
//! streamed sounds keep two buffers queued and are refilled by
//! [`PlayingSound::step_stream`], with looping done by hand.

use crate::math::Vec3;
use crate::native::{warn_on_native_error, NativeSource, SourceState};
use crate::sound_data::OpenSound;
use log::warn;
use std::rc::Rc;

/// Gain multiplier for positional sources. Distance attenuation starts at
/// the reference distance, so positional sounds are boosted to keep their
/// perceived loudness comparable to non-positional ones.
const POSITIONAL_GAIN_FACTOR: f32 = 3.0;

#[derive(Debug, Clone, Copy)]
struct FadeState {
    /// Gain change per second. Sign points towards the target.
    step: f32,
    target_gain: f32,
}

pub struct PlayingSound {
    source: NativeSource,
    data: Rc<OpenSound>,
    /// Asset-wide frame where the next queued buffer will start. Only
    /// meaningful for streamed sounds.
    next_sample_pos: u32,
    looping: bool,
    is_positional: bool,
    /// Whether a stopped native source means this sound has ended. False
    /// while a streamed sound may merely be starved.
    stopped_means_dead: bool,
    fade_state: Option<FadeState>,
}

impl PlayingSound {
    /// Binds `data` to the source and applies the initial parameters. The
    /// caller starts playback afterwards with [`PlayingSound::play`].
    ///
    /// `start_time` follows the play-offset rules: negative counts from the
    /// end (clamped to 0 for non-looping sounds), a non-looping start at or
    /// past the end produces a sound that is dead as soon as it is played,
    /// and looping sounds take the offset modulo the length.
    pub fn new(
        source: NativeSource,
        data: Rc<OpenSound>,
        looping: bool,
        volume: f32,
        pitch: f32,
        mut start_time: f32,
        pos_vel: Option<(Vec3, Vec3)>,
    ) -> Self {
        let info = data.info();
        let len_seconds = info.length_seconds;
        let len_samples = info.length_samples;

        if pos_vel.is_some() && info.channels != 1 {
            warn!(
                "Audio: positional sound \"{}\" is stereo, it will not attenuate with distance properly",
                info.name_for_logging
            );
        }

        if !looping {
            if start_time < 0.0 {
                start_time = (start_time + len_seconds).max(0.0);
            } else if start_time >= len_seconds {
                start_time = len_seconds;
            }
        } else {
            start_time = start_time.rem_euclid(len_seconds);
        }

        let mut next_sample_pos =
            ((start_time / len_seconds * len_samples as f32) as u32).min(len_samples);
        if looping && next_sample_pos == len_samples {
            next_sample_pos = 0;
        }

        let mut sound = Self {
            source,
            data,
            next_sample_pos,
            looping,
            is_positional: pos_vel.is_some(),
            stopped_means_dead: true,
            fade_state: None,
        };

        let backend = sound.source.backend();
        let id = sound.source.id();

        if !sound.data.is_streaming() {
            // a start past the end resolves to the null buffer here, which
            // detaches and leaves the source with nothing to play
            let (buf, buf_end, offset_in_buf) =
                sound.data.get_or_load_buffer_at(backend, sound.next_sample_pos);
            sound.next_sample_pos = buf_end;

            warn_on_native_error("binding sound buffer", backend.set_buffer(id, buf));
            warn_on_native_error(
                "setting play offset",
                backend.set_sample_offset(id, offset_in_buf),
            );
            warn_on_native_error("setting looping", backend.set_looping(id, looping));
        } else if !looping && sound.next_sample_pos == len_samples {
            // started at or past the end: nothing is queued, the source
            // stops as soon as it is played and the sound counts as dead
        } else {
            // start with 2 queued buffers
            let (buf0, buf0_end, offset_in_buf0) =
                sound.data.get_or_load_buffer_at(backend, sound.next_sample_pos);
            sound.next_sample_pos = buf0_end;

            if sound.looping && sound.next_sample_pos == len_samples {
                sound.next_sample_pos = 0;
            }

            let (buf1, buf1_end, offset_in_buf1) =
                sound.data.get_or_load_buffer_at(backend, sound.next_sample_pos);
            sound.next_sample_pos = buf1_end;
            debug_assert_eq!(offset_in_buf1, 0);

            warn_on_native_error(
                "queueing initial stream buffers",
                backend.queue_buffers(id, &[buf0, buf1]),
            );
            warn_on_native_error(
                "setting play offset",
                backend.set_sample_offset(id, offset_in_buf0),
            );

            // native looping can't be used with a refilled queue; looping is
            // done by hand in step_stream. A stopped source may just be
            // starved until step_stream says otherwise.
            sound.stopped_means_dead = false;
        }

        match pos_vel {
            Some((pos, vel)) => sound.update_pos_vel(pos, vel),
            None => {
                warn_on_native_error("making source relative", backend.set_relative(id, true));
                warn_on_native_error("zeroing position", backend.set_position(id, Vec3::ZERO));
                warn_on_native_error("zeroing velocity", backend.set_velocity(id, Vec3::ZERO));
            }
        }

        sound.set_gain(volume);
        sound.set_pitch(pitch);

        sound
    }

    pub fn is_streaming(&self) -> bool {
        self.data.is_streaming()
    }

    /// Unqueues finished buffers and queues fresh ones. Returns `false` when
    /// there is nothing left to queue and the sound can leave the streaming
    /// list.
    pub fn step_stream(&mut self) -> bool {
        if self.is_dead() {
            return false;
        }

        let backend = self.source.backend();
        let id = self.source.id();

        let finished =
            warn_on_native_error("querying processed buffers", backend.processed_buffer_count(id))
                .unwrap_or(0);
        if finished == 0 {
            return true;
        }
        // at most 2 buffers are ever queued
        debug_assert!(finished <= 2);
        warn_on_native_error(
            "unqueueing finished buffers",
            backend.unqueue_buffers(id, finished),
        );

        let len_samples = self.data.info().length_samples;
        for _ in 0..finished {
            if self.next_sample_pos == len_samples {
                if !self.looping {
                    // the queued rest plays out, then the source stops for good
                    self.stopped_means_dead = true;
                    return false;
                }
                self.next_sample_pos = 0;
            }

            let (buf, buf_end, offset_in_buf) = self
                .data
                .get_or_load_buffer_at(self.source.backend(), self.next_sample_pos);
            self.next_sample_pos = buf_end;
            debug_assert_eq!(offset_in_buf, 0);

            let backend = self.source.backend();
            warn_on_native_error("queueing stream buffer", backend.queue_buffers(id, &[buf]));

            // restart if the queue ran dry and stopped the source
            if self.state() == SourceState::Stopped {
                self.play();
                warn!(
                    "Audio: stream queue ran empty for \"{}\"",
                    self.data.info().name_for_logging
                );
            }
        }

        true
    }

    /// Starts or redirects a fade towards `target_gain`. The sign of `step`
    /// is ignored; the direction follows from the current gain. Returns
    /// `true` if the sound was not fading before.
    pub fn fade(&mut self, step: f32, target_gain: f32) -> bool {
        let already_fading = self.fade_state.is_some();

        let target_gain = target_gain.max(0.0); // also maps NaN to 0.0
        let step = if target_gain - self.gain() > 0.0 {
            step.abs()
        } else {
            -step.abs()
        };

        self.fade_state = Some(FadeState { step, target_gain });

        !already_fading
    }

    /// Advances a running fade by `dtime` seconds. Returns `false` once the
    /// fade is finished (target reached, or faded out and stopped).
    pub fn do_fade(&mut self, dtime: f32) -> bool {
        if self.is_dead() {
            return false;
        }
        let Some(fade) = self.fade_state else {
            return false;
        };
        debug_assert!(fade.step != 0.0);

        let mut gain = self.gain() + fade.step * dtime;
        if fade.step < 0.0 {
            gain = gain.max(fade.target_gain);
        } else {
            gain = gain.min(fade.target_gain);
        }

        if gain <= 0.0 {
            // faded out entirely
            self.stopped_means_dead = true;
            warn_on_native_error(
                "stopping faded-out sound",
                self.source.backend().stop(self.source.id()),
            );
            self.fade_state = None;
            return false;
        }

        self.set_gain(gain);

        if gain == fade.target_gain {
            self.fade_state = None;
            return false;
        }

        true
    }

    pub fn update_pos_vel(&self, pos: Vec3, vel: Vec3) {
        let backend = self.source.backend();
        let id = self.source.id();
        warn_on_native_error("making source absolute", backend.set_relative(id, false));
        warn_on_native_error("setting position", backend.set_position(id, pos));
        warn_on_native_error("setting velocity", backend.set_velocity(id, vel));
        // distance attenuation starts at 1 unit from the source
        warn_on_native_error(
            "setting reference distance",
            backend.set_reference_distance(id, 1.0),
        );
    }

    pub fn set_gain(&self, mut gain: f32) {
        if self.is_positional {
            gain *= POSITIONAL_GAIN_FACTOR;
        }
        warn_on_native_error(
            "setting gain",
            self.source.backend().set_gain(self.source.id(), gain),
        );
    }

    pub fn gain(&self) -> f32 {
        let mut gain =
            warn_on_native_error("querying gain", self.source.backend().gain(self.source.id()))
                .unwrap_or(0.0);
        if self.is_positional {
            gain /= POSITIONAL_GAIN_FACTOR;
        }
        gain
    }

    pub fn set_pitch(&self, pitch: f32) {
        warn_on_native_error(
            "setting pitch",
            self.source.backend().set_pitch(self.source.id(), pitch),
        );
    }

    pub fn play(&self) {
        warn_on_native_error(
            "starting source",
            self.source.backend().play(self.source.id()),
        );
    }

    /// No-op unless currently playing.
    pub fn pause(&self) {
        warn_on_native_error(
            "pausing source",
            self.source.backend().pause(self.source.id()),
        );
    }

    pub fn resume(&self) {
        if self.state() == SourceState::Paused {
            self.play();
        }
    }

    pub fn state(&self) -> SourceState {
        warn_on_native_error(
            "querying source state",
            self.source.backend().state(self.source.id()),
        )
        .unwrap_or(SourceState::Stopped)
    }

    /// Whether playback has ended. A stopped streamed source does not count
    /// as dead while it may merely be starved.
    pub fn is_dead(&self) -> bool {
        self.stopped_means_dead && self.state() == SourceState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testing::SyntheticDecoder;
    use crate::native::mock::MockBackend;
    use crate::native::{AudioBackend, BufferId, SourceId};
    use std::sync::Arc;

    const RATE: u32 = 1000;

    fn open(mock: &Arc<MockBackend>, seconds: f32) -> Rc<OpenSound> {
        let frames = (seconds * RATE as f32) as u32;
        let decoder = SyntheticDecoder::new("clip", 1, RATE, frames);
        let backend: Arc<dyn AudioBackend> = Arc::clone(mock) as _;
        Rc::new(OpenSound::from_decoder(Box::new(decoder), &backend))
    }

    fn spawn(
        mock: &Arc<MockBackend>,
        data: Rc<OpenSound>,
        looping: bool,
        start_time: f32,
        pos_vel: Option<(Vec3, Vec3)>,
    ) -> (PlayingSound, SourceId) {
        let backend: Arc<dyn AudioBackend> = Arc::clone(mock) as _;
        let id = backend.create_source().unwrap();
        let source = NativeSource::new(id, backend);
        (
            PlayingSound::new(source, data, looping, 1.0, 1.0, start_time, pos_vel),
            id,
        )
    }

    #[test]
    fn negative_start_time_counts_from_end() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 2.5);

        // 2.5 s clip, start at -1.0 s, so 1.5 s in
        let (sound, id) = spawn(&mock, data, false, -1.0, None);
        sound.play();

        mock.with_source(id, |s| {
            assert!(!s.static_buffer.is_null());
            assert_eq!(s.sample_offset, 1500);
            assert!(!s.looping);
            assert_eq!(s.state, SourceState::Playing);
        });
    }

    #[test]
    fn large_negative_start_time_clamps_to_begin() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 2.5);

        let (_sound, id) = spawn(&mock, data, false, -100.0, None);
        mock.with_source(id, |s| assert_eq!(s.sample_offset, 0));
    }

    #[test]
    fn start_past_end_is_dead_once_played() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 2.5);

        let (sound, id) = spawn(&mock, data, false, 10.0, None);
        sound.play();

        mock.with_source(id, |s| assert!(s.static_buffer.is_null()));
        assert!(sound.is_dead());
    }

    #[test]
    fn streamed_start_past_end_is_dead_once_played() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 10.0);
        assert!(data.is_streaming());

        let (mut sound, id) = spawn(&mock, data, false, 100.0, None);
        sound.play();

        mock.with_source(id, |s| assert!(s.queue.is_empty()));
        assert!(sound.is_dead());
        assert!(!sound.step_stream(), "dead sounds leave the streaming list");
    }

    #[test]
    fn looping_start_time_wraps_modulo_length() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 2.5);

        // 3.0 s into a 2.5 s loop is 0.5 s in
        let (_sound, id) = spawn(&mock, data, true, 3.0, None);
        mock.with_source(id, |s| {
            assert_eq!(s.sample_offset, 500);
            assert!(s.looping, "buffered sounds loop natively");
        });
    }

    #[test]
    fn non_positional_sources_are_relative_at_origin() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 1.0);

        let (_sound, id) = spawn(&mock, data, false, 0.0, None);
        mock.with_source(id, |s| {
            assert!(s.relative);
            assert_eq!(s.position, Vec3::ZERO);
        });
    }

    #[test]
    fn positional_gain_is_boosted_natively() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 1.0);

        let pos_vel = Some((Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO));
        let (sound, id) = spawn(&mock, data, false, 0.0, pos_vel);

        mock.with_source(id, |s| {
            assert!(!s.relative);
            assert_eq!(s.position, Vec3::new(1.0, 2.0, 3.0));
            assert_eq!(s.reference_distance, 1.0);
            assert_eq!(s.gain, 3.0, "native gain carries the positional boost");
        });
        assert_eq!(sound.gain(), 1.0, "reported gain does not");
    }

    #[test]
    fn streamed_sound_starts_with_two_buffers() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 10.0);
        assert!(data.is_streaming());

        let (sound, id) = spawn(&mock, data, false, 0.0, None);
        mock.with_source(id, |s| {
            assert_eq!(s.queue.len(), 2);
            assert!(!s.looping, "streamed sounds never loop natively");
        });
        assert!(sound.is_streaming());
    }

    #[test]
    fn step_stream_replaces_finished_buffers() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 10.0);
        let (mut sound, id) = spawn(&mock, data, false, 0.0, None);
        sound.play();

        let initial: Vec<BufferId> =
            mock.with_source(id, |s| s.queue.iter().copied().collect());

        mock.finish_buffers(id, 1);
        assert!(sound.step_stream());

        mock.with_source(id, |s| {
            assert_eq!(s.queue.len(), 2);
            assert_eq!(s.processed, 0);
            assert_eq!(s.queue[0], initial[1], "oldest buffer was replaced");
            assert_ne!(s.queue[1], initial[0], "a fresh window was queued");
        });
    }

    #[test]
    fn step_stream_without_finished_buffers_is_a_no_op() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 10.0);
        let (mut sound, id) = spawn(&mock, data, false, 0.0, None);
        sound.play();

        assert!(sound.step_stream());
        mock.with_source(id, |s| assert_eq!(s.queue.len(), 2));
    }

    #[test]
    fn step_stream_recovers_from_starvation() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 10.0);
        let (mut sound, id) = spawn(&mock, data, false, 0.0, None);
        sound.play();

        mock.starve(id);
        assert!(!sound.is_dead(), "a starved stream is not dead");
        assert!(sound.step_stream());
        assert_eq!(sound.state(), SourceState::Playing, "playback restarted");
    }

    #[test]
    fn stream_end_marks_sound_dead_after_drain() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 4.0);
        let (mut sound, id) = spawn(&mock, data, false, 0.0, None);
        sound.play();

        // drain the whole asset, one window at a time
        loop {
            mock.finish_buffers(id, 1);
            if !sound.step_stream() {
                break;
            }
        }

        assert!(!sound.is_dead(), "still draining the last queued buffers");
        mock.starve(id);
        assert!(sound.is_dead());
    }

    #[test]
    fn looping_stream_wraps_to_the_start() {
        let mock = Arc::new(MockBackend::new());
        // a 4 s asset is covered by four 1 s windows
        let data = open(&mock, 4.0);
        let (mut sound, id) = spawn(&mock, data, true, 0.0, None);
        sound.play();

        let first = mock.with_source(id, |s| s.queue[0]);
        for _ in 0..3 {
            mock.finish_buffers(id, 1);
            assert!(sound.step_stream());
        }

        // the third refill passed the end and wrapped to frame 0, which is
        // the already-cached first window
        mock.with_source(id, |s| assert_eq!(s.queue[1], first));
    }

    #[test]
    fn fade_out_reaches_zero_and_dies() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 1.0);
        let (mut sound, _id) = spawn(&mock, data, false, 0.0, None);
        sound.play();
        sound.set_gain(0.625);

        // sign of the step is derived from the direction
        assert!(sound.fade(0.5, 0.0), "fade newly started");

        // 0.125 per step: 0.5, 0.375, 0.25, 0.125
        for _ in 0..4 {
            assert!(sound.do_fade(0.25));
        }
        assert_eq!(sound.gain(), 0.125);
        assert!(!sound.do_fade(0.25), "fifth step reaches zero");
        assert!(sound.is_dead());
    }

    #[test]
    fn fade_in_stops_at_target() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 1.0);
        let (mut sound, _id) = spawn(&mock, data, false, 0.0, None);
        sound.play();
        sound.set_gain(0.0);

        assert!(sound.fade(2.0, 1.0));
        assert!(sound.do_fade(0.25));
        assert!(!sound.do_fade(0.25), "clamped at the target");
        assert_eq!(sound.gain(), 1.0);
        assert!(!sound.is_dead());

        // redirecting a running fade does not report a fresh start
        assert!(sound.fade(1.0, 0.5));
        assert!(sound.do_fade(0.25));
        assert!(!sound.fade(1.0, 0.25), "already fading");
    }

    #[test]
    fn pause_and_resume() {
        let mock = Arc::new(MockBackend::new());
        let data = open(&mock, 1.0);
        let (sound, _id) = spawn(&mock, data, false, 0.0, None);

        // pausing a sound that was never started must stay a no-op
        sound.pause();
        assert_eq!(sound.state(), SourceState::Initial);
        sound.resume();
        assert_eq!(sound.state(), SourceState::Initial);

        sound.play();
        sound.pause();
        assert_eq!(sound.state(), SourceState::Paused);
        sound.resume();
        assert_eq!(sound.state(), SourceState::Playing);
    }
}
