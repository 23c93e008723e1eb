use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use zip::ZipArchive;

use crate::classfile::parse_class;
use crate::ir::Class;

/// Snapshot of parsed artifacts and classes for a scan.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) classes: Vec<Class>,
}

impl ScanOutput {
    pub(crate) fn class_count(&self) -> usize {
        self.classes.len()
    }
}

#[derive(Default)]
struct Collector {
    artifacts: Vec<Artifact>,
    classes: Vec<Class>,
}

pub(crate) fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut collector = Collector::default();

    scan_path(input, true, true, &mut collector)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in classpath_entries {
        scan_path(&entry, false, true, &mut collector)?;
    }

    debug!(
        "scanned {} artifact(s), {} class(es)",
        collector.artifacts.len(),
        collector.classes.len()
    );
    Ok(ScanOutput {
        artifacts: collector.artifacts,
        classes: collector.classes,
    })
}

fn scan_path(path: &Path, is_input: bool, strict: bool, collector: &mut Collector) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, is_input, collector);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let roles = if is_input {
        Some(vec![
            serde_json::to_value(ArtifactRoles::AnalysisTarget)
                .context("failed to serialize artifact role")?,
        ])
    } else {
        None
    };

    match extension {
        "class" => scan_class_file(path, is_input, roles, collector),
        "jar" => scan_jar_file(path, is_input, roles, collector),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, is_input: bool, collector: &mut Collector) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, is_input, collector)?;
        } else {
            scan_path(&entry, is_input, false, collector)?;
        }
    }

    Ok(())
}

fn scan_class_file(
    path: &Path,
    is_input: bool,
    roles: Option<Vec<Value>>,
    collector: &mut Collector,
) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let artifact_index = collector.artifacts.len() as i64;
    let class = parse_class(&data, artifact_index, is_input)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    collector.classes.push(class);

    push_artifact(path_to_uri(path), data.len() as u64, None, roles, collector);
    Ok(())
}

fn scan_jar_file(
    path: &Path,
    is_input: bool,
    roles: Option<Vec<Value>>,
    collector: &mut Collector,
) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    let jar_index = push_artifact(path_to_uri(path), jar_len, None, roles, collector);

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class") && !name.ends_with("module-info.class") {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let artifact_index = collector.artifacts.len() as i64;
        let class = parse_class(&data, artifact_index, is_input)
            .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
        collector.classes.push(class);

        let entry_uri = jar_entry_uri(path, &name);
        push_artifact(entry_uri, entry.size(), Some(jar_index), None, collector);
    }

    Ok(())
}

fn push_artifact(
    uri: String,
    len: u64,
    parent_index: Option<i64>,
    roles: Option<Vec<Value>>,
    collector: &mut Collector,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let mut artifact = Artifact::builder()
        .location(location)
        .length(len as i64)
        .build();
    artifact.parent_index = parent_index;
    artifact.roles = roles;
    collector.artifacts.push(artifact);
    collector.artifacts.len() as i64 - 1
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn jar_entry_uri(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
