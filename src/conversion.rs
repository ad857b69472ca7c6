use log::debug;
use std::io::{self, Write};

use crate::config::{BoxPolicy, ClassMapping};
use crate::error::{BoxDefect, ConvertError};
use crate::types::{BoundingBoxRecord, NormalizedAnnotationLine, SourceAnnotation};

/// Result of normalizing one annotation
#[derive(Debug, Default)]
pub struct Normalized {
    pub lines: Vec<NormalizedAnnotationLine>,
    pub unknown_class_objects: usize,
    // Boxes dropped under `BoxPolicy::SkipObject`, as `ConvertError::InvalidBox`
    pub invalid_boxes: Vec<ConvertError>,
}

/// Convert every mapped object of `annotation` into a YOLO line, in input order
pub fn normalize_annotation(
    annotation: &SourceAnnotation,
    mapping: &ClassMapping,
    policy: BoxPolicy,
) -> Result<Normalized, ConvertError> {
    let (image_width, image_height) = (annotation.image_width, annotation.image_height);
    if image_width <= 0 || image_height <= 0 {
        return Err(ConvertError::InvalidDimensions {
            width: image_width,
            height: image_height,
        });
    }

    let mut normalized = Normalized {
        lines: Vec::with_capacity(annotation.objects.len()),
        ..Default::default()
    };

    for (index, record) in annotation.objects.iter().enumerate() {
        let class_id = match mapping.get(&record.class_name) {
            Some(class_id) => class_id,
            None => {
                debug!("Skipping object #{} with unknown class '{}'", index, record.class_name);
                normalized.unknown_class_objects += 1;
                continue;
            }
        };

        if policy != BoxPolicy::Unchecked {
            if let Err(defect) = validate_box(record, image_width, image_height) {
                let error = ConvertError::InvalidBox {
                    index,
                    class_name: record.class_name.clone(),
                    defect,
                };
                match policy {
                    BoxPolicy::RejectFile => return Err(error),
                    _ => {
                        normalized.invalid_boxes.push(error);
                        continue;
                    }
                }
            }
        }

        normalized
            .lines
            .push(normalize_box(record, class_id, image_width, image_height));
    }

    Ok(normalized)
}

/// Check ordering and image bounds of a box
pub fn validate_box(
    record: &BoundingBoxRecord,
    image_width: i64,
    image_height: i64,
) -> Result<(), BoxDefect> {
    let BoundingBoxRecord {
        xmin,
        ymin,
        xmax,
        ymax,
        ..
    } = *record;

    if xmin >= xmax || ymin >= ymax {
        return Err(BoxDefect::Degenerate {
            xmin,
            ymin,
            xmax,
            ymax,
        });
    }
    if xmin < 0 || ymin < 0 || xmax > image_width || ymax > image_height {
        return Err(BoxDefect::OutOfBounds {
            xmin,
            ymin,
            xmax,
            ymax,
            width: image_width,
            height: image_height,
        });
    }
    Ok(())
}

/// Calculate the normalized center/size of a box
pub fn normalize_box(
    record: &BoundingBoxRecord,
    class_id: u32,
    image_width: i64,
    image_height: i64,
) -> NormalizedAnnotationLine {
    let (xmin, ymin) = (record.xmin as f64, record.ymin as f64);
    let (xmax, ymax) = (record.xmax as f64, record.ymax as f64);
    let (image_width, image_height) = (image_width as f64, image_height as f64);

    NormalizedAnnotationLine {
        class_id,
        x_center: (xmin + xmax) / 2.0 / image_width,
        y_center: (ymin + ymax) / 2.0 / image_height,
        width: (xmax - xmin) / image_width,
        height: (ymax - ymin) / image_height,
    }
}

/// Write YOLO lines, one per record, each terminated by a newline
pub fn write_yolo_lines<W: Write>(
    writer: &mut W,
    lines: &[NormalizedAnnotationLine],
) -> io::Result<()> {
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    Ok(())
}
