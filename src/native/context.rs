//! The process-scoped native audio context.

use super::{AudioBackend, CpalBackend, DistanceModel};
use crate::error::{FernSonicError, Result};
use log::{error, info};
use std::sync::Arc;

/// Speed of sound in world units per second, assuming one unit is one meter
/// of normal air.
const SPEED_OF_SOUND: f32 = 343.3;

/// Doppler is turned off for backwards compatibility with content tuned
/// before it existed.
const DOPPLER_FACTOR: f32 = 0.0;

/// Owns the device/context pair for the process.
///
/// Construct exactly one, before the engine core, and keep it alive until
/// after the facade (and with it every playing sound and source) is gone.
/// If `init` fails the caller must not create the engine.
pub struct NativeContext {
    backend: Arc<dyn AudioBackend>,
}

impl NativeContext {
    /// Opens the default output device and configures the context.
    pub fn init() -> Result<Self> {
        let backend = CpalBackend::open().map_err(|e| {
            error!("Audio: global initialization: failed to open device: {e}");
            e
        })?;
        Self::init_with(Arc::new(backend))
    }

    /// Configures an already-opened backend. Used by tests and embedders
    /// that manage the device themselves.
    pub fn init_with(backend: Arc<dyn AudioBackend>) -> Result<Self> {
        let configure = || -> super::NativeResult<()> {
            backend.set_distance_model(DistanceModel::InverseClamped)?;
            backend.set_speed_of_sound(SPEED_OF_SOUND)?;
            backend.set_doppler_factor(DOPPLER_FACTOR)?;
            Ok(())
        };
        if let Err(err) = configure() {
            error!("Audio: global initialization: native error: {err}");
            return Err(FernSonicError::AudioDevice(format!(
                "context setup failed: {err}"
            )));
        }

        info!("Audio: global initialization done, using {}", backend.describe());
        Ok(Self { backend })
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }
}

impl Drop for NativeContext {
    fn drop(&mut self) {
        info!("Audio: global deinitialization");
    }
}
