//! Math types for FernSonic

pub use glam::Vec3;

/// Converts a vector between the game's left-handed coordinate space and the
/// native layer's right-handed one, and back again (the mapping is an
/// involution).
///
/// Every spatial vector crossing the facade/native boundary must pass through
/// here exactly once.
#[inline]
pub fn swap_handedness(v: Vec3) -> Vec3 {
    Vec3::new(-v.x, v.y, v.z)
}
