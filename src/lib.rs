//! Pascal VOC to YOLO format converter
//!
//! This library reads Pascal VOC XML annotations and writes YOLO label files
//! (`class x_center y_center width height`, normalized to the image size).

pub mod batch;
pub mod config;
pub mod conversion;
pub mod error;
pub mod io;
pub mod types;
pub mod utils;
pub mod voc;

// Re-export commonly used types and functions
pub use batch::{
    convert_file, plan_batch, process_batch, run_conversion, BatchOptions, BatchPlan, OutputConflict,
};
pub use config::{Args, BoxPolicy, ClassMapping, OutputNaming};
pub use conversion::{normalize_annotation, Normalized};
pub use error::{BatchError, BoxDefect, ConfigError, ConvertError};
pub use types::{
    BoundingBoxRecord, ConversionJob, FileReport, NormalizedAnnotationLine, ProcessingStats,
    SourceAnnotation,
};
pub use voc::{parse_voc_reader, parse_voc_str, read_and_parse_xml};
