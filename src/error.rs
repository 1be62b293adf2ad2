// THEORY:
// Errors are grouped by the collaborator or stage that raises them. Only the zone
// loop's startup and the aggregator's collaborator calls can fail in a way a
// caller sees. Frame-level failures are absorbed by the loop and only logged, and
// store reads never fail.

use crate::core_modules::occupancy::ZoneId;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of a zone's occupancy loop.
#[derive(Debug, Error)]
pub enum ZoneError {
    /// The slot layout or the frame source could not be opened at startup.
    #[error("zone {zone_id}: configuration missing: {reason}")]
    ConfigurationMissing { zone_id: ZoneId, reason: String },
    /// The frame source ended and could not wrap around.
    #[error("zone {zone_id}: frame source exhausted")]
    SourceExhausted { zone_id: ZoneId },
    /// A single frame read failed.
    #[error("zone {zone_id}: transient read failure: {reason}")]
    TransientReadFailure { zone_id: ZoneId, reason: String },
}

/// Failures reported by a frame source.
#[derive(Debug, Error)]
pub enum FrameSourceError {
    #[error("no frame source configured for zone {0}")]
    Unavailable(ZoneId),
    #[error("failed to open frame source at {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("failed to decode frame {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame read failed: {0}")]
    Read(String),
    #[error("frame source cannot seek back to its first frame")]
    SeekUnsupported,
}

/// Failures loading a slot layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("no slot layout configured for zone {0}")]
    Missing(ZoneId),
    #[error("failed to read slot layout {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse slot layout {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A collaborator (zone metadata or reservations) could not answer.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{collaborator} unavailable: {reason}")]
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },
}

/// Failures surfaced by the aggregator to its caller.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("collaborator unavailable")]
    CollaboratorUnavailable(#[from] CollaboratorError),
}

/// Failures loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
