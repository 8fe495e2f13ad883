//! Immutable description of a sound-playback request.

/// Parameters for one `play_sound`/`play_sound_at` call.
///
/// `name` refers to a sound *group*; the engine picks a random loaded member
/// of that group when the sound starts.
#[derive(Debug, Clone)]
pub struct SoundSpec {
    /// Group name to play from.
    pub name: String,
    /// Requested gain. Negative values are clamped to 0.
    pub gain: f32,
    /// Playback speed multiplier. Non-positive or NaN values fall back to 1.0.
    pub pitch: f32,
    /// Whether the sound repeats forever (until stopped or faded out).
    pub loop_: bool,
    /// If positive, the sound starts silent and fades in to `gain` at this
    /// rate (gain units per second).
    pub fade: f32,
    /// Start offset in seconds. Negative means "from the end" for
    /// non-looping sounds; looping sounds wrap it modulo the clip length.
    pub start_time: f32,
    /// Whether to fall back to locally resolved files when the group has no
    /// loaded member.
    pub use_local_fallback: bool,
}

impl Default for SoundSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            gain: 1.0,
            pitch: 1.0,
            loop_: false,
            fade: 0.0,
            start_time: 0.0,
            use_local_fallback: true,
        }
    }
}

impl SoundSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn looped(mut self, loop_: bool) -> Self {
        self.loop_ = loop_;
        self
    }

    pub fn with_fade(mut self, fade: f32) -> Self {
        self.fade = fade;
        self
    }

    pub fn with_start_time(mut self, start_time: f32) -> Self {
        self.start_time = start_time;
        self
    }
}
