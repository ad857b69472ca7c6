use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that make a single annotation file (or a single object) unconvertible.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },

    #[error(
        "label file {} is already produced by {}",
        path.display(),
        claimed_by.display()
    )]
    DuplicateOutput { path: PathBuf, claimed_by: PathBuf },

    #[error("invalid box for object #{index} ({class_name}): {defect}")]
    InvalidBox {
        index: usize,
        class_name: String,
        defect: BoxDefect,
    },
}

impl ConvertError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<quick_xml::de::DeError> for ConvertError {
    fn from(e: quick_xml::de::DeError) -> Self {
        ConvertError::Parse(e.to_string())
    }
}

// Why a box was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxDefect {
    Degenerate {
        xmin: i64,
        ymin: i64,
        xmax: i64,
        ymax: i64,
    },
    OutOfBounds {
        xmin: i64,
        ymin: i64,
        xmax: i64,
        ymax: i64,
        width: i64,
        height: i64,
    },
}

impl fmt::Display for BoxDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BoxDefect::Degenerate {
                xmin,
                ymin,
                xmax,
                ymax,
            } => write!(
                f,
                "degenerate box ({}, {}, {}, {}), expected xmin < xmax and ymin < ymax",
                xmin, ymin, xmax, ymax
            ),
            BoxDefect::OutOfBounds {
                xmin,
                ymin,
                xmax,
                ymax,
                width,
                height,
            } => write!(
                f,
                "box ({}, {}, {}, {}) exceeds image bounds {}x{}",
                xmin, ymin, xmax, ymax, width, height
            ),
        }
    }
}

/// Errors raised while assembling the class mapping
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read class map {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid class map {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid class pair '{0}', expected NAME=ID")]
    InvalidPair(String),
}

/// Conditions that abort the whole run
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("input path does not exist: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    DatasetYaml {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
