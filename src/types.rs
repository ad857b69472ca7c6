use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::config::ClassMapping;

// Extension of the annotation files picked up in directory mode
pub const SOURCE_EXTENSION: &str = "xml";

// Extension of the generated YOLO label files
pub const LABEL_EXTENSION: &str = "txt";

// Subdirectory used for labels when a directory is converted without an explicit output dir
pub const DEFAULT_LABELS_DIR: &str = "labels";

/// One Pascal VOC annotation document, reduced to what the conversion needs.
///
/// Dimensions and coordinates are kept signed so that malformed values survive parsing
/// and are rejected by the normalizer with a precise error.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceAnnotation {
    pub image_filename: String,
    pub image_path: Option<String>,
    pub image_width: i64,
    pub image_height: i64,
    pub objects: Vec<BoundingBoxRecord>,
}

// A labeled box in absolute pixel coordinates, origin top-left
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundingBoxRecord {
    pub class_name: String,
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
}

impl BoundingBoxRecord {
    pub fn new(class_name: &str, xmin: i64, ymin: i64, xmax: i64, ymax: i64) -> Self {
        Self {
            class_name: class_name.to_string(),
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }
}

/// A single YOLO label line: class id plus center/size normalized to the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedAnnotationLine {
    pub class_id: u32,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl fmt::Display for NormalizedAnnotationLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class_id, self.x_center, self.y_center, self.width, self.height
        )
    }
}

// Source file paired with the directory its label file goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output_dir: PathBuf,
}

/// What happened to a file that converted without a fatal error
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileReport {
    pub output_path: PathBuf,
    pub total_objects: usize,
    pub unknown_class_objects: usize,
    pub invalid_boxes: usize,
    // Written object count per class id
    pub class_counts: BTreeMap<u32, usize>,
}

impl FileReport {
    /// The file had objects, but none of them carried a mapped class
    pub fn only_unknown_classes(&self) -> bool {
        self.total_objects > 0 && self.unknown_class_objects == self.total_objects
    }

    pub fn written_objects(&self) -> usize {
        self.class_counts.values().sum()
    }
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessingStats {
    pub total_files_processed: usize,
    pub successful_conversions: usize,
    pub skipped_unknown_classes_only: usize,
    pub failed_conversions: usize,
    pub objects_written: usize,
    pub unknown_class_objects: usize,
    pub invalid_boxes_skipped: usize,
    pub objects_per_class: BTreeMap<u32, usize>,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the result of one file into the counters
    pub fn record<E>(&mut self, result: &Result<FileReport, E>) {
        self.total_files_processed += 1;
        match result {
            Ok(report) => {
                if report.only_unknown_classes() {
                    self.skipped_unknown_classes_only += 1;
                } else {
                    self.successful_conversions += 1;
                }
                self.unknown_class_objects += report.unknown_class_objects;
                self.invalid_boxes_skipped += report.invalid_boxes;
                for (&class_id, &count) in &report.class_counts {
                    self.objects_written += count;
                    *self.objects_per_class.entry(class_id).or_insert(0) += count;
                }
            }
            Err(_) => self.failed_conversions += 1,
        }
    }

    /// Combine the counters of two workers
    pub fn merge(mut self, other: Self) -> Self {
        self.total_files_processed += other.total_files_processed;
        self.successful_conversions += other.successful_conversions;
        self.skipped_unknown_classes_only += other.skipped_unknown_classes_only;
        self.failed_conversions += other.failed_conversions;
        self.objects_written += other.objects_written;
        self.unknown_class_objects += other.unknown_class_objects;
        self.invalid_boxes_skipped += other.invalid_boxes_skipped;
        for (class_id, count) in other.objects_per_class {
            *self.objects_per_class.entry(class_id).or_insert(0) += count;
        }
        self
    }

    pub fn has_failures(&self) -> bool {
        self.failed_conversions > 0
    }

    /// One-line summary of file outcomes
    pub fn summary_line(&self) -> String {
        format!(
            "Processed {} files: {} succeeded, {} skipped (unknown classes only), {} failed",
            self.total_files_processed,
            self.successful_conversions,
            self.skipped_unknown_classes_only,
            self.failed_conversions
        )
    }

    pub fn print_summary(&self, mapping: &ClassMapping) {
        log::info!("=== Processing Summary ===");
        log::info!("{}", self.summary_line());
        log::info!("Objects written: {}", self.objects_written);
        for (class_id, count) in &self.objects_per_class {
            let name = mapping.name_for(*class_id).unwrap_or("?");
            log::info!("  {} ({}): {}", name, class_id, count);
        }
        if self.unknown_class_objects > 0 {
            log::info!(
                "Objects skipped (unknown class): {}",
                self.unknown_class_objects
            );
        }
        if self.invalid_boxes_skipped > 0 {
            log::warn!(
                "Objects skipped (invalid box): {}",
                self.invalid_boxes_skipped
            );
        }
        if self.failed_conversions > 0 {
            log::error!("Failed conversions: {}", self.failed_conversions);
        }
    }
}
