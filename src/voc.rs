//! Pascal VOC XML reader
//!
//! Deserializes the subset of a VOC annotation document used for conversion:
//! `filename`, `path`, `size/{width,height}` and every `object/{name,bndbox}`.
//! Unknown elements are ignored and `object` entries may be interleaved with them.

use log::debug;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::ConvertError;
use crate::types::{BoundingBoxRecord, SourceAnnotation};

#[derive(Debug, Deserialize)]
struct VocDocument {
    filename: String,
    #[serde(default)]
    path: Option<String>,
    size: VocSize,
    #[serde(rename = "object", default)]
    objects: Vec<VocObject>,
}

#[derive(Debug, Deserialize)]
struct VocSize {
    width: i64,
    height: i64,
}

#[derive(Debug, Deserialize)]
struct VocObject {
    name: String,
    bndbox: VocBndBox,
}

#[derive(Debug, Deserialize)]
struct VocBndBox {
    xmin: i64,
    ymin: i64,
    xmax: i64,
    ymax: i64,
}

impl From<VocDocument> for SourceAnnotation {
    fn from(doc: VocDocument) -> Self {
        SourceAnnotation {
            image_filename: doc.filename,
            image_path: doc.path.filter(|p| !p.is_empty()),
            image_width: doc.size.width,
            image_height: doc.size.height,
            objects: doc
                .objects
                .into_iter()
                .map(|obj| BoundingBoxRecord {
                    class_name: obj.name,
                    xmin: obj.bndbox.xmin,
                    ymin: obj.bndbox.ymin,
                    xmax: obj.bndbox.xmax,
                    ymax: obj.bndbox.ymax,
                })
                .collect(),
        }
    }
}

/// Parse a VOC document from any buffered reader
pub fn parse_voc_reader<R: BufRead>(reader: R) -> Result<SourceAnnotation, ConvertError> {
    let doc: VocDocument = quick_xml::de::from_reader(reader)?;
    Ok(doc.into())
}

/// Parse a VOC document held in memory
pub fn parse_voc_str(content: &str) -> Result<SourceAnnotation, ConvertError> {
    let doc: VocDocument = quick_xml::de::from_str(content)?;
    Ok(doc.into())
}

/// Read and parse a single VOC XML file from a buffered stream
pub fn read_and_parse_xml(path: &Path) -> Result<SourceAnnotation, ConvertError> {
    let file = File::open(path).map_err(|e| ConvertError::io(path, e))?;
    let annotation = parse_voc_reader(BufReader::new(file))?;
    debug!(
        "Parsed {}: {} ({}x{}, {} objects)",
        path.display(),
        annotation.image_filename,
        annotation.image_width,
        annotation.image_height,
        annotation.objects.len()
    );
    Ok(annotation)
}
