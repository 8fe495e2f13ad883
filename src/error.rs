//! Error types for FernSonic

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FernSonicError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("The sound engine thread stopped unexpectedly")]
    EngineStopped,
}

pub type Result<T> = std::result::Result<T, FernSonicError>;
