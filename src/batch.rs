//! Batch driver
//!
//! Turns a file or directory argument into conversion jobs and runs
//! parse -> normalize -> write for each of them on a bounded worker pool.
//! A failing file is logged and counted; it never stops its siblings.

use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{Args, BoxPolicy, ClassMapping, OutputNaming};
use crate::conversion::normalize_annotation;
use crate::error::{BatchError, ConvertError};
use crate::io::{
    collect_annotation_files, create_dataset_yaml, label_file_name, label_file_name_from_stem,
    write_label_file,
};
use crate::types::{ConversionJob, FileReport, ProcessingStats, DEFAULT_LABELS_DIR};
use crate::utils::{
    create_io_thread_pool, create_progress_bar, ensure_output_directory, resolve_path,
};
use crate::voc::read_and_parse_xml;

/// Settings shared by every file of a run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_dir: Option<PathBuf>,
    pub recursive: bool,
    pub box_policy: BoxPolicy,
    pub naming: OutputNaming,
    pub workers: usize,
    pub dataset_yaml: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            output_dir: None,
            recursive: false,
            box_policy: BoxPolicy::default(),
            naming: OutputNaming::default(),
            workers: 0,
            dataset_yaml: false,
        }
    }
}

impl From<&Args> for BatchOptions {
    fn from(args: &Args) -> Self {
        Self {
            output_dir: args.output_dir.clone(),
            recursive: args.recursive,
            box_policy: args.box_policy,
            naming: args.name_from,
            workers: args.workers,
            dataset_yaml: args.dataset_yaml,
        }
    }
}

/// A job dropped from the run because an earlier job writes the same label file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConflict {
    pub job: ConversionJob,
    pub label_path: PathBuf,
    pub claimed_by: PathBuf,
}

impl OutputConflict {
    pub fn to_error(&self) -> ConvertError {
        ConvertError::DuplicateOutput {
            path: self.label_path.clone(),
            claimed_by: self.claimed_by.clone(),
        }
    }
}

/// Output root plus one job per annotation file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub output_root: PathBuf,
    pub jobs: Vec<ConversionJob>,
    pub conflicts: Vec<OutputConflict>,
}

/// Enumerate the annotation files of `input` and decide where their labels go
pub fn plan_batch(input: &Path, options: &BatchOptions) -> Result<BatchPlan, BatchError> {
    if input.is_file() {
        let output_root = match &options.output_dir {
            Some(dir) => dir.clone(),
            None => match input.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        };
        return Ok(BatchPlan {
            jobs: vec![ConversionJob {
                input: input.to_path_buf(),
                output_dir: output_root.clone(),
            }],
            output_root,
            conflicts: Vec::new(),
        });
    }

    if !input.is_dir() {
        return Err(BatchError::InputNotFound(input.to_path_buf()));
    }

    let output_root = options
        .output_dir
        .clone()
        .unwrap_or_else(|| input.join(DEFAULT_LABELS_DIR));

    // Only an output root strictly inside the input tree is excluded from the walk
    let resolved_input = resolve_path(input);
    let resolved_root = resolve_path(&output_root);
    let nested_root = (resolved_root != resolved_input && resolved_root.starts_with(&resolved_input))
        .then_some(resolved_root);

    let mut jobs = Vec::new();
    for path in collect_annotation_files(input, options.recursive) {
        let relative = path.strip_prefix(input).unwrap_or(&path).to_path_buf();
        if let Some(root) = &nested_root {
            if resolved_input.join(&relative).starts_with(root) {
                debug!("Skipping {} inside the output directory", path.display());
                continue;
            }
        }
        // Mirror the input layout below the output root
        let relative_dir = relative.parent().map(Path::to_path_buf).unwrap_or_default();
        jobs.push(ConversionJob {
            output_dir: output_root.join(relative_dir),
            input: path,
        });
    }

    let (jobs, conflicts) = split_output_conflicts(jobs, options.naming);
    Ok(BatchPlan {
        output_root,
        jobs,
        conflicts,
    })
}

// With annotation naming the label path is known up front; the first job in path order keeps it
fn split_output_conflicts(
    jobs: Vec<ConversionJob>,
    naming: OutputNaming,
) -> (Vec<ConversionJob>, Vec<OutputConflict>) {
    if naming != OutputNaming::Annotation {
        return (jobs, Vec::new());
    }

    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut kept = Vec::with_capacity(jobs.len());
    let mut conflicts = Vec::new();
    for job in jobs {
        let label_name = job.input.file_stem().and_then(label_file_name_from_stem);
        let Some(label_name) = label_name else {
            kept.push(job);
            continue;
        };
        match claimed.entry(job.output_dir.join(label_name)) {
            Entry::Occupied(entry) => conflicts.push(OutputConflict {
                label_path: entry.key().clone(),
                claimed_by: entry.get().clone(),
                job,
            }),
            Entry::Vacant(entry) => {
                entry.insert(job.input.clone());
                kept.push(job);
            }
        }
    }
    (kept, conflicts)
}

/// Convert one annotation file into its YOLO label file
pub fn convert_file(
    job: &ConversionJob,
    mapping: &ClassMapping,
    options: &BatchOptions,
) -> Result<FileReport, ConvertError> {
    convert_claimed(job, mapping, options, &DashMap::new())
}

// Label paths are claimed in `claims` before writing so two jobs never share a file
fn convert_claimed(
    job: &ConversionJob,
    mapping: &ClassMapping,
    options: &BatchOptions,
    claims: &DashMap<PathBuf, PathBuf>,
) -> Result<FileReport, ConvertError> {
    let annotation = read_and_parse_xml(&job.input)?;
    let normalized = normalize_annotation(&annotation, mapping, options.box_policy)?;

    for invalid in &normalized.invalid_boxes {
        warn!("{}: skipping {}", job.input.display(), invalid);
    }

    let file_name = label_file_name(&job.input, &annotation, options.naming).ok_or_else(|| {
        ConvertError::Parse(format!(
            "cannot derive a label file name from {}",
            job.input.display()
        ))
    })?;
    let output_path = job.output_dir.join(file_name);

    match claims.entry(output_path.clone()) {
        DashEntry::Occupied(entry) => {
            let claimed_by = entry.get().clone();
            return Err(ConvertError::DuplicateOutput {
                path: output_path,
                claimed_by,
            });
        }
        DashEntry::Vacant(entry) => {
            entry.insert(job.input.clone());
        }
    }

    ensure_output_directory(&job.output_dir).map_err(|e| ConvertError::io(&job.output_dir, e))?;
    write_label_file(&output_path, &normalized.lines)
        .map_err(|e| ConvertError::io(&output_path, e))?;

    info!(
        "Converted: {} -> {}",
        job.input.display(),
        output_path.display()
    );

    let mut report = FileReport {
        output_path,
        total_objects: annotation.objects.len(),
        unknown_class_objects: normalized.unknown_class_objects,
        invalid_boxes: normalized.invalid_boxes.len(),
        ..Default::default()
    };
    for line in &normalized.lines {
        *report.class_counts.entry(line.class_id).or_insert(0) += 1;
    }
    Ok(report)
}

/// Run every job of `plan` in parallel and aggregate the outcome
pub fn process_batch(
    plan: &BatchPlan,
    mapping: &ClassMapping,
    options: &BatchOptions,
) -> Result<ProcessingStats, BatchError> {
    ensure_output_directory(&plan.output_root).map_err(|source| BatchError::OutputDirectory {
        path: plan.output_root.clone(),
        source,
    })?;

    let mut conflict_stats = ProcessingStats::new();
    for conflict in &plan.conflicts {
        let error = conflict.to_error();
        error!("Failed to convert {}: {}", conflict.job.input.display(), error);
        conflict_stats.record::<ConvertError>(&Err(error));
    }

    let thread_pool = create_io_thread_pool(options.workers)?;
    let pb = create_progress_bar(plan.jobs.len() as u64, "Convert");
    let claims: DashMap<PathBuf, PathBuf> = DashMap::new();

    // Each worker folds into its own counters; they are merged once at the end
    let stats = thread_pool.install(|| {
        plan.jobs
            .par_iter()
            .map(|job| {
                let result = convert_claimed(job, mapping, options, &claims);
                if let Err(e) = &result {
                    error!("Failed to convert {}: {}", job.input.display(), e);
                }
                pb.inc(1);
                result
            })
            .fold(ProcessingStats::new, |mut stats, result| {
                stats.record(&result);
                stats
            })
            .reduce(ProcessingStats::new, ProcessingStats::merge)
    });
    let stats = conflict_stats.merge(stats);
    pb.finish_with_message("Conversion complete");

    if options.dataset_yaml {
        let path = create_dataset_yaml(&plan.output_root, mapping).map_err(|source| {
            BatchError::DatasetYaml {
                path: plan.output_root.join("dataset.yaml"),
                source,
            }
        })?;
        info!("Wrote {}", path.display());
    }

    Ok(stats)
}

/// Plan and process the conversion described by `input` and `options`
pub fn run_conversion(
    input: &Path,
    mapping: &ClassMapping,
    options: &BatchOptions,
) -> Result<ProcessingStats, BatchError> {
    let plan = plan_batch(input, options)?;
    if plan.jobs.is_empty() && plan.conflicts.is_empty() {
        warn!("No .xml annotation files found in {}", input.display());
    } else {
        info!(
            "Converting {} annotation file(s) into {}",
            plan.jobs.len(),
            plan.output_root.display()
        );
    }
    process_batch(&plan, mapping, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const BIRD_XML: &str = "<annotation><filename>bird.jpg</filename>\
        <size><width>100</width><height>100</height></size>\
        <object><name>bird</name><bndbox><xmin>0</xmin><ymin>0</ymin>\
        <xmax>50</xmax><ymax>50</ymax></bndbox></object></annotation>";

    #[test]
    fn test_plan_single_file_defaults_to_its_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let xml = temp_dir.path().join("IMG_1.xml");
        fs::write(&xml, "").unwrap();

        let plan = plan_batch(&xml, &BatchOptions::default()).unwrap();
        assert_eq!(plan.output_root, temp_dir.path());
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].output_dir, temp_dir.path());
    }

    #[test]
    fn test_plan_directory_defaults_to_labels_subdir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.xml"), "").unwrap();
        fs::write(root.join("sub/b.xml"), "").unwrap();

        let plan = plan_batch(root, &BatchOptions::default()).unwrap();
        assert_eq!(plan.output_root, root.join("labels"));
        assert_eq!(plan.jobs.len(), 1);

        let options = BatchOptions {
            recursive: true,
            ..Default::default()
        };
        let plan = plan_batch(root, &options).unwrap();
        let dirs: Vec<_> = plan.jobs.iter().map(|j| j.output_dir.clone()).collect();
        assert_eq!(dirs, vec![root.join("labels"), root.join("labels/sub")]);
    }

    #[test]
    fn test_plan_skips_files_inside_output_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("labels")).unwrap();
        fs::write(root.join("a.xml"), "").unwrap();
        fs::write(root.join("labels/stale.xml"), "").unwrap();

        let options = BatchOptions {
            recursive: true,
            ..Default::default()
        };
        let plan = plan_batch(root, &options).unwrap();
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].input, root.join("a.xml"));
    }

    #[test]
    fn test_plan_missing_input() {
        let result = plan_batch(Path::new("/nonexistent/voc"), &BatchOptions::default());
        assert!(matches!(result, Err(BatchError::InputNotFound(_))));
    }

    #[test]
    fn test_output_dir_equal_to_input_keeps_jobs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.xml"), BIRD_XML).unwrap();

        let options = BatchOptions {
            output_dir: Some(root.to_path_buf()),
            ..Default::default()
        };
        let plan = plan_batch(root, &options).unwrap();
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].output_dir, root);

        let stats = run_conversion(root, &ClassMapping::default(), &options).unwrap();
        assert_eq!(stats.successful_conversions, 1);
        assert_eq!(
            fs::read_to_string(root.join("a.txt")).unwrap(),
            "0 0.250000 0.250000 0.500000 0.500000\n"
        );
    }

    #[test]
    fn test_output_dir_above_input_keeps_jobs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let input = temp_dir.path().join("voc");
        fs::create_dir_all(input.join("train")).unwrap();
        fs::write(input.join("train/a.xml"), BIRD_XML).unwrap();

        let options = BatchOptions {
            output_dir: Some(temp_dir.path().to_path_buf()),
            recursive: true,
            ..Default::default()
        };
        let plan = plan_batch(&input, &options).unwrap();
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].output_dir, temp_dir.path().join("train"));
    }

    #[test]
    fn test_unnormalized_output_dir_inside_input_is_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join("labels")).unwrap();
        fs::write(root.join("a.xml"), BIRD_XML).unwrap();
        fs::write(root.join("labels/stale.xml"), BIRD_XML).unwrap();

        // Input given through `..`, output through the canonical path
        let input = root.join("sub/..");
        let options = BatchOptions {
            output_dir: Some(fs::canonicalize(root).unwrap().join("labels")),
            recursive: true,
            ..Default::default()
        };
        let plan = plan_batch(&input, &options).unwrap();
        let inputs: Vec<_> = plan.jobs.iter().map(|j| j.input.clone()).collect();
        assert_eq!(inputs, vec![input.join("a.xml")]);

        let options = BatchOptions {
            output_dir: Some(root.join("sub/../labels")),
            recursive: true,
            ..Default::default()
        };
        let plan = plan_batch(root, &options).unwrap();
        let inputs: Vec<_> = plan.jobs.iter().map(|j| j.input.clone()).collect();
        assert_eq!(inputs, vec![root.join("a.xml")]);
    }

    #[test]
    fn test_duplicate_label_targets_fail_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.xml"), BIRD_XML).unwrap();
        fs::write(root.join("a.XML"), BIRD_XML).unwrap();
        if fs::read_dir(root).unwrap().count() < 2 {
            // Case-insensitive file system: both names are the same file
            return;
        }

        let plan = plan_batch(root, &BatchOptions::default()).unwrap();
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].input, root.join("a.XML"));
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].job.input, root.join("a.xml"));
        assert_eq!(plan.conflicts[0].label_path, root.join("labels/a.txt"));
        assert_eq!(plan.conflicts[0].claimed_by, root.join("a.XML"));

        let stats =
            process_batch(&plan, &ClassMapping::default(), &BatchOptions::default()).unwrap();
        assert_eq!(stats.total_files_processed, 2);
        assert_eq!(stats.successful_conversions, 1);
        assert_eq!(stats.failed_conversions, 1);
        assert!(stats.has_failures());
    }

    #[test]
    fn test_claimed_label_path_is_not_written_twice() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("first.xml"), BIRD_XML).unwrap();
        fs::write(root.join("second.xml"), BIRD_XML).unwrap();

        let options = BatchOptions {
            naming: OutputNaming::Image,
            ..Default::default()
        };
        let claims = DashMap::new();
        let mapping = ClassMapping::default();
        let job = |name: &str| ConversionJob {
            input: root.join(name),
            output_dir: root.to_path_buf(),
        };

        let report = convert_claimed(&job("first.xml"), &mapping, &options, &claims).unwrap();
        assert_eq!(report.output_path, root.join("bird.txt"));

        let result = convert_claimed(&job("second.xml"), &mapping, &options, &claims);
        match result {
            Err(ConvertError::DuplicateOutput { path, claimed_by }) => {
                assert_eq!(path, root.join("bird.txt"));
                assert_eq!(claimed_by, root.join("first.xml"));
            }
            other => panic!("expected a duplicate output error, got {:?}", other),
        }
    }
}
