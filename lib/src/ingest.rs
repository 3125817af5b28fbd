//! Loading changesets from N-Triples files.
//!
//! A changeset is a list of files, each tagged as additions or deletions. A
//! version directory holds `*.nt.additions.txt` and `*.nt.deletions.txt`
//! files; a dataset directory holds one version directory per version.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use oxigraph::io::{RdfFormat, RdfParser};
use regex::Regex;

use crate::controller::{Controller, PatchBuilder};
use crate::patch::PatchId;
use crate::triple::StringTriple;

/// Triples of an N-Triples file, with terms in their N-Triples form.
pub fn read_ntriples(path: &Path) -> Result<Vec<StringTriple>> {
    debug!("Reading file: {}", path.display());
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let parser = RdfParser::from_format(RdfFormat::NTriples).for_reader(BufReader::new(file));
    let mut triples = Vec::new();
    for quad in parser {
        let quad = quad.with_context(|| format!("parsing {}", path.display()))?;
        triples.push(StringTriple::new(
            quad.subject.to_string(),
            quad.predicate.to_string(),
            quad.object.to_string(),
        ));
    }
    Ok(triples)
}

/// Files making up one version, in the order their changes apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub files: Vec<(PathBuf, bool)>,
}

impl Changeset {
    /// Parse `+ a.nt b.nt - c.nt` style arguments. Files before the first
    /// sign are additions.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut files = Vec::new();
        let mut addition = true;
        for arg in args {
            match arg.as_ref() {
                "+" => addition = true,
                "-" => addition = false,
                file => {
                    let path = PathBuf::from(file);
                    if !path.is_file() {
                        return Err(anyhow!("Could not find a file at location: {file}"));
                    }
                    files.push((path, addition));
                }
            }
        }
        Ok(Changeset { files })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn has_deletions(&self) -> bool {
        self.files.iter().any(|(_, addition)| !addition)
    }

    /// Every change of every file, in file order.
    pub fn changes(&self) -> Result<Vec<(StringTriple, bool)>> {
        let mut changes = Vec::new();
        for (path, addition) in &self.files {
            changes.extend(read_ntriples(path)?.into_iter().map(|t| (t, *addition)));
        }
        Ok(changes)
    }
}

/// Outcome of committing one version.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub patch_id: PatchId,
    pub changes: usize,
    pub committed: bool,
    pub seconds: f64,
}

/// Commit `changeset` as version `patch_id` (default: the next free id).
pub fn insert(controller: &Controller, patch_id: Option<PatchId>, changeset: &Changeset) -> Result<IngestReport> {
    let started = Instant::now();
    let changes = changeset.changes()?;
    let id = match patch_id {
        Some(id) => id,
        None => controller.get_max_patch_id()?.map_or(0, |max| max + 1),
    };
    let count = changes.len();
    let mut builder = PatchBuilder::new(controller);
    for (triple, addition) in changes {
        builder.triple(triple, addition);
    }
    let committed = builder.commit(Some(id))?;
    let seconds = started.elapsed().as_secs_f64();
    info!("version {id}: {count} changes in {seconds:.3}s (committed: {committed})");
    Ok(IngestReport {
        patch_id: id,
        changes: count,
        committed,
        seconds,
    })
}

/// The changeset stored in one version directory.
pub fn version_changeset(dir: &Path) -> Result<Changeset> {
    let additions = Regex::new(r"^[A-Za-z0-9_\-]*\.nt\.additions\.txt$")?;
    let deletions = Regex::new(r"^[A-Za-z0-9_\-]*\.nt\.deletions\.txt$")?;
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if additions.is_match(&name) {
            files.push((entry.path().to_path_buf(), true));
        } else if deletions.is_match(&name) {
            files.push((entry.path().to_path_buf(), false));
        }
    }
    // deletions first, so a triple moved within one version ends up added
    files.sort_by_key(|(_, addition)| *addition);
    Ok(Changeset { files })
}

/// Version directories under `root`, ordered by their numeric name.
pub fn discover_versions(root: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let number = Regex::new(r"^(\d+)$")?;
    let mut versions = Vec::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(caps) = number.captures(&name) {
            versions.push((caps[1].parse::<u64>()?, entry.path().to_path_buf()));
        }
    }
    versions.sort();
    Ok(versions)
}

/// Commit every version directory under `root`, in order, as versions
/// `0..n` following the store's newest version.
pub fn ingest_versions(controller: &Controller, root: &Path) -> Result<Vec<IngestReport>> {
    let versions = discover_versions(root)?;
    if versions.is_empty() {
        return Err(anyhow!("no version directories under {}", root.display()));
    }
    let mut reports = Vec::with_capacity(versions.len());
    for (_, dir) in versions {
        let changeset = version_changeset(&dir)?;
        reports.push(insert(controller, None, &changeset)?);
    }
    Ok(reports)
}
