use thiserror::Error;

use crate::models::WorldId;
use crate::reference::Platform;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("unknown platform {0:?}")]
    UnknownPlatform(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    #[error("world {0} is not in the reference table for this platform")]
    UnknownWorld(WorldId),

    #[error("platform {0} is not tracked")]
    PlatformNotTracked(Platform),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
