//! Error types for the host boundary, the transform engine and file I/O.

use std::io;
use thiserror::Error;

use crate::host::LayerId;

/// Failures reported by a [`crate::host::LayerHost`] implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("unknown layer {0}")]
    UnknownLayer(LayerId),

    #[error("layer {0} is already part of the image")]
    AlreadyAttached(LayerId),

    #[error("layer {0} is not part of the image")]
    NotAttached(LayerId),

    #[error("pixel ({x}, {y}) is outside the {width}x{height} layer")]
    PixelOutOfBounds { x: u32, y: u32, width: u32, height: u32 },

    #[error("region {x},{y} {w}x{h} is outside the {width}x{height} layer")]
    RegionOutOfBounds { x: u32, y: u32, w: u32, h: u32, width: u32, height: u32 },

    #[error("tile ({col}, {row}) is outside the {cols}x{rows} tile grid")]
    TileOutOfBounds { col: u32, row: u32, cols: u32, rows: u32 },

    #[error("expected {expected} bytes per pixel, got {actual}")]
    PixelSize { expected: usize, actual: usize },

    #[error("layer name '{0}' is already in use")]
    NameInUse(String),

    #[error("layer {0} has no shadow buffer to merge")]
    NoShadow(LayerId),

    #[error("read-only region cannot be written back")]
    ReadOnlyRegion,

    #[error("undo group closed without being opened")]
    UndoGroupUnbalanced,

    #[error("invalid layer geometry: {0}")]
    InvalidGeometry(String),
}

/// Failures surfaced by the transform engine at the operation boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("host access failed: {0}")]
    HostAccess(HostError),

    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("layer name '{0}' already in use")]
    NamingConflict(String),
}

impl From<HostError> for TransformError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::NameInUse(name) => TransformError::NamingConflict(name),
            other => TransformError::HostAccess(other),
        }
    }
}

/// Errors from image codecs and layered project files.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("project serialization error: {0}")]
    Serialize(#[from] Box<bincode::ErrorKind>),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("invalid project file: {0}")]
    InvalidProject(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Errors while reading or writing the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },
}

impl From<TransformError> for String {
    fn from(err: TransformError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_maps_to_naming_conflict() {
        let err: TransformError = HostError::NameInUse("Background".into()).into();
        assert_eq!(err, TransformError::NamingConflict("Background".into()));
    }

    #[test]
    fn other_host_errors_map_to_host_access() {
        let err: TransformError = HostError::UndoGroupUnbalanced.into();
        assert!(matches!(err, TransformError::HostAccess(HostError::UndoGroupUnbalanced)));
    }
}
