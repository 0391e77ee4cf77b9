use std::path::PathBuf;

use thiserror::Error;

use crate::domain::registry::{GroupId, ImageId, ModelId, ParameterId};

/// Errors raised while assembling a measurement configuration.
///
/// I/O and FITS-format failures during image loading are reported through
/// `anyhow` with file context instead; this enum covers the registry and
/// grouping layer, where callers may want to match on the cause.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not registered")]
    UnknownParameter(ParameterId),

    #[error("{0} is not registered")]
    UnknownModel(ModelId),

    #[error("{0} is not registered")]
    UnknownGroup(GroupId),

    #[error("{0} is not registered")]
    UnknownImage(ImageId),

    #[error("keyword `{keyword}` not found in header of {path:?}")]
    MissingKeyword { keyword: String, path: PathBuf },

    #[error("value `{value}` of keyword `{keyword}` in {path:?} does not match `{pattern}`")]
    PatternMismatch {
        keyword: String,
        pattern: String,
        value: String,
        path: PathBuf,
    },

    #[error("`{0}` is not a valid FITS keyword")]
    InvalidKeyword(String),

    #[error("invalid grouping pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("group `{0}` is already split into subgroups")]
    AlreadySplit(String),

    #[error("aperture diameter {0} must be finite and positive")]
    InvalidAperture(f64),

    #[error("no aperture diameters given")]
    EmptyAperture,

    #[error("a group supports at most {limit} apertures, got {count}")]
    TooManyApertures { count: usize, limit: usize },

    #[error("output column `{0}` is already registered")]
    DuplicateColumn(String),

    #[error("output column name is empty")]
    EmptyColumnName,

    #[error("no output columns are registered")]
    NoOutputColumns,
}
