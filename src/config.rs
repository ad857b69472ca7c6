use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Command-line arguments parser for converting Pascal VOC XML to YOLO format.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Pascal VOC XML file, or a directory containing them
    pub input: PathBuf,

    /// Directory for the YOLO label files (default: next to a single input file,
    /// or `labels/` inside an input directory)
    #[arg(short = 'o', long = "output_dir")]
    pub output_dir: Option<PathBuf>,

    /// Additional class mappings as NAME=ID pairs, on top of the default `bird=0`
    #[arg(short = 'c', long = "classes", use_value_delimiter = true, value_parser = parse_class_pair)]
    pub classes: Vec<(String, u32)>,

    /// YAML file with class mappings (`classes: {name: id}` and/or `names: {id: name}`)
    #[arg(long = "class_map")]
    pub class_map: Option<PathBuf>,

    /// How to handle boxes that are degenerate or outside the image
    #[arg(long = "box_policy", value_enum, default_value = "skip-object")]
    pub box_policy: BoxPolicy,

    /// Where the label file name comes from
    #[arg(long = "name_from", value_enum, default_value = "annotation")]
    pub name_from: OutputNaming,

    /// Also convert annotations in subdirectories of the input directory
    #[arg(short = 'r', long = "recursive")]
    pub recursive: bool,

    /// Number of worker threads (0 uses one per CPU)
    #[arg(long = "workers", default_value_t = 0)]
    pub workers: usize,

    /// Write a dataset.yaml listing the class names into the output directory
    #[arg(long = "dataset_yaml")]
    pub dataset_yaml: bool,
}

impl Args {
    /// Build the class mapping: defaults, then the YAML file, then `--classes` pairs
    pub fn class_mapping(&self) -> Result<ClassMapping, ConfigError> {
        let mut mapping = ClassMapping::default();
        if let Some(path) = &self.class_map {
            mapping.extend(ClassMapping::from_yaml_file(path)?);
        }
        for (name, id) in &self.classes {
            mapping.insert(name, *id);
        }
        Ok(mapping)
    }
}

// Policy for boxes that fail geometry validation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum BoxPolicy {
    /// Drop the offending object and keep converting the file
    #[default]
    SkipObject,
    /// Fail the whole file
    RejectFile,
    /// Emit boxes as computed, without validation
    Unchecked,
}

// Source of the label file name
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum OutputNaming {
    /// Base name of the XML annotation file
    #[default]
    Annotation,
    /// Base name of the image referenced by the annotation's `filename`
    Image,
}

/// Mapping from VOC class names to YOLO class ids.
///
/// Names that are absent are filtered out of the output. Several names may share an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMapping {
    classes: BTreeMap<String, u32>,
}

impl Default for ClassMapping {
    fn default() -> Self {
        let mut mapping = Self::new();
        mapping.insert("bird", 0);
        mapping
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for ClassMapping {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        Self {
            classes: iter.into_iter().map(|(name, id)| (name.into(), id)).collect(),
        }
    }
}

impl ClassMapping {
    /// An empty mapping; every class is unknown
    pub fn new() -> Self {
        Self {
            classes: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, class_id: u32) {
        self.classes.insert(name.to_string(), class_id);
    }

    /// Entries of `other` override entries with the same name
    pub fn extend(&mut self, other: ClassMapping) {
        self.classes.extend(other.classes);
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.classes.get(name).copied()
    }

    /// First name (in lexical order) mapped to `class_id`
    pub fn name_for(&self, class_id: u32) -> Option<&str> {
        self.classes
            .iter()
            .find(|(_, &id)| id == class_id)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// One `(id, name)` entry per distinct id, sorted by id
    pub fn names_by_id(&self) -> Vec<(u32, &str)> {
        let mut by_id: BTreeMap<u32, &str> = BTreeMap::new();
        for (name, &id) in &self.classes {
            by_id.entry(id).or_insert(name.as_str());
        }
        by_id.into_iter().collect()
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        let file: ClassMapFile = serde_yaml::from_str(content)?;
        let mut mapping = Self::new();
        match file.names {
            Some(ClassNames::List(names)) => {
                for (id, name) in names.iter().enumerate() {
                    mapping.insert(name, id as u32);
                }
            }
            Some(ClassNames::Map(names)) => {
                for (id, name) in &names {
                    mapping.insert(name, *id);
                }
            }
            None => {}
        }
        for (name, id) in &file.classes {
            mapping.insert(name, *id);
        }
        Ok(mapping)
    }
}

// On-disk shape of a class map file; also accepts a YOLO dataset.yaml
#[derive(Debug, Deserialize)]
struct ClassMapFile {
    #[serde(default)]
    classes: BTreeMap<String, u32>,
    #[serde(default)]
    names: Option<ClassNames>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassNames {
    List(Vec<String>),
    Map(BTreeMap<u32, String>),
}

// Parse a NAME=ID pair given on the command line
pub fn parse_class_pair(s: &str) -> Result<(String, u32), String> {
    let invalid = || ConfigError::InvalidPair(s.to_string()).to_string();
    let (name, id) = s.split_once('=').ok_or_else(invalid)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid());
    }
    let id = id.trim().parse::<u32>().map_err(|_| invalid())?;
    Ok((name.to_string(), id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_mapping_has_bird() {
        let mapping = ClassMapping::default();
        assert_eq!(mapping.get("bird"), Some(0));
        assert_eq!(mapping.get("cat"), None);
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_parse_class_pair() {
        assert_eq!(parse_class_pair("duck=1"), Ok(("duck".to_string(), 1)));
        assert_eq!(parse_class_pair(" heron = 7 "), Ok(("heron".to_string(), 7)));
        assert!(parse_class_pair("duck").is_err());
        assert!(parse_class_pair("=1").is_err());
        assert!(parse_class_pair("duck=-1").is_err());
        assert!(parse_class_pair("duck=one").is_err());
    }

    #[test]
    fn test_yaml_classes_and_names() {
        let mapping = ClassMapping::from_yaml_str(
            "names:\n  0: bird\n  1: duck\nclasses:\n  Bird: 0\n  duck: 5\n",
        )
        .unwrap();
        assert_eq!(mapping.get("bird"), Some(0));
        assert_eq!(mapping.get("Bird"), Some(0));
        assert_eq!(mapping.get("duck"), Some(5));
        assert_eq!(mapping.names_by_id(), vec![(0, "Bird"), (5, "duck")]);
    }

    #[test]
    fn test_yaml_name_list() {
        let mapping = ClassMapping::from_yaml_str("names: [bird, duck, heron]\n").unwrap();
        assert_eq!(mapping.get("heron"), Some(2));
        assert_eq!(mapping.name_for(1), Some("duck"));
    }

    #[test]
    fn test_yaml_invalid() {
        assert!(ClassMapping::from_yaml_str("classes: [1, 2").is_err());
        assert!(ClassMapping::from_yaml_str("classes:\n  bird: -3\n").is_err());
    }

    #[test]
    fn test_args_merge_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "classes:\n  duck: 1\n  heron: 2").unwrap();

        let args = Args::parse_from([
            "voc2yolo",
            "annotations",
            "--class_map",
            file.path().to_str().unwrap(),
            "--classes",
            "heron=9,owl=3",
        ]);
        let mapping = args.class_mapping().unwrap();
        assert_eq!(mapping.get("bird"), Some(0));
        assert_eq!(mapping.get("duck"), Some(1));
        assert_eq!(mapping.get("heron"), Some(9));
        assert_eq!(mapping.get("owl"), Some(3));
        assert_eq!(args.box_policy, BoxPolicy::SkipObject);
        assert_eq!(args.name_from, OutputNaming::Annotation);
    }

    #[test]
    fn test_missing_class_map_file() {
        let args = Args::parse_from(["voc2yolo", "a.xml", "--class_map", "/nonexistent/map.yaml"]);
        assert!(matches!(
            args.class_mapping(),
            Err(ConfigError::Io { .. })
        ));
    }
}
