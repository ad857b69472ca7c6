use jwalk::WalkDir;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::{ClassMapping, OutputNaming};
use crate::conversion::write_yolo_lines;
use crate::types::{NormalizedAnnotationLine, SourceAnnotation, LABEL_EXTENSION, SOURCE_EXTENSION};

/// Collect the VOC files of a directory, sorted by path.
///
/// Only the directory itself is scanned unless `recursive` is set.
pub fn collect_annotation_files(dirname: &Path, recursive: bool) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(dirname)
        .skip_hidden(false)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {}", dirname.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && has_source_extension(&e.path()))
        .map(|e| e.path())
        .collect();
    files.sort();
    files
}

pub fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SOURCE_EXTENSION))
}

/// File name of the label for `annotation_path`, e.g. `IMG_0001.xml` -> `IMG_0001.txt`
pub fn label_file_name(
    annotation_path: &Path,
    annotation: &SourceAnnotation,
    naming: OutputNaming,
) -> Option<String> {
    let stem = match naming {
        OutputNaming::Annotation => annotation_path.file_stem()?,
        OutputNaming::Image => Path::new(&annotation.image_filename).file_stem()?,
    };
    label_file_name_from_stem(stem)
}

/// Sanitized `<stem>.txt`, or `None` when nothing usable is left of the stem
pub fn label_file_name_from_stem(stem: &OsStr) -> Option<String> {
    let sanitized = sanitize_filename::sanitize(stem.to_string_lossy());
    if sanitized.is_empty() {
        return None;
    }
    Some(format!("{}.{}", sanitized, LABEL_EXTENSION))
}

/// Write a YOLO label file; an empty slice yields an empty file
pub fn write_label_file(path: &Path, lines: &[NormalizedAnnotationLine]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_yolo_lines(&mut writer, lines)?;
    writer.flush()
}

// Layout of the generated dataset.yaml
#[derive(Debug, Serialize)]
struct DatasetYaml<'a> {
    path: String,
    names: BTreeMap<u32, &'a str>,
}

/// Create the dataset.yaml listing class names by id
pub fn create_dataset_yaml(output_dir: &Path, mapping: &ClassMapping) -> std::io::Result<PathBuf> {
    let dataset_yaml_path = output_dir.join("dataset.yaml");
    let absolute_path = fs::canonicalize(output_dir)?;
    let yaml_content = serde_yaml::to_string(&DatasetYaml {
        path: absolute_path.to_string_lossy().into_owned(),
        names: mapping.names_by_id().into_iter().collect(),
    })
    .map_err(std::io::Error::other)?;

    let mut dataset_yaml = BufWriter::new(File::create(&dataset_yaml_path)?);
    dataset_yaml.write_all(yaml_content.as_bytes())?;
    dataset_yaml.flush()?;
    Ok(dataset_yaml_path)
}
