use shared::Point;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("zone size must be positive in both axes, got {}x{}", .0.x, .0.y)]
    InvalidSize(Point),

    #[error("zone of {}x{} pixels exceeds the canvas memory budget", .0.x, .0.y)]
    CanvasTooLarge(Point),

    #[error("RGBA image required")]
    UnsupportedColorModel,

    #[error("image {width}x{height} is larger than the zone ({}x{})", .zone.x, .zone.y)]
    ImageTooLarge { width: u32, height: u32, zone: Point },

    #[error("zone is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("zone {0} has no privileged token to name its snapshot")]
    MissingPrivilegedToken(usize),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("tick duration must be greater than zero")]
    ZeroTickDuration,

    #[error("max challenges must be positive, got {0}")]
    NonPositiveChallenges(i32),

    #[error("failed to prepare working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
