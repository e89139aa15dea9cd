use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::report::{CandidateOutcome, FlattenReport, Flattened};

pub const DEFAULT_SUFFIX: &str = "-master";

const STAGING_PREFIX: &str = ".unnest-";

/// How to pick the nested directory when a candidate holds more than one.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NestedPolicy {
    /// Lexicographically smallest qualifying name.
    #[default]
    First,
    /// Exactly one qualifying directory must exist.
    Unique,
}

/// What to do with the remaining candidates after one fails.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Continue,
}

#[derive(Clone, Debug)]
pub struct FlattenOptions {
    pub suffix: String,
    pub nested: NestedPolicy,
    pub on_error: FailurePolicy,
    pub dry_run: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.to_owned(),
            nested: NestedPolicy::default(),
            on_error: FailurePolicy::default(),
            dry_run: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    #[error("root {0} is not an existing directory")]
    InvalidRoot(Utf8PathBuf),
    #[error("listing {path}")]
    Scan {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{candidate} has no nested directory ending in `{suffix}`")]
    NoNestedDirectory { candidate: Utf8PathBuf, suffix: String },
    #[error("{candidate} has {} nested directories, expected one: {}", .found.len(), .found.join(", "))]
    AmbiguousNested {
        candidate: Utf8PathBuf,
        found: Vec<String>,
    },
    #[error("{candidate} has nothing left once `{suffix}` is stripped")]
    EmptyTarget { candidate: Utf8PathBuf, suffix: String },
    #[error("moving {from} to {to}")]
    MoveFailure {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot rename {candidate}: {target} already exists")]
    RenameConflict {
        candidate: Utf8PathBuf,
        target: Utf8PathBuf,
    },
    #[error("renaming {candidate} to {target}")]
    RenameFailure {
        candidate: Utf8PathBuf,
        target: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("removing {path}")]
    DeleteFailure {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FlattenError {
    /// Short machine-readable name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            FlattenError::InvalidRoot(_) => "invalid-root",
            FlattenError::Scan { .. } => "scan",
            FlattenError::NoNestedDirectory { .. } => "no-nested-directory",
            FlattenError::AmbiguousNested { .. } => "ambiguous-nested",
            FlattenError::EmptyTarget { .. } => "empty-target",
            FlattenError::MoveFailure { .. } => "move-failure",
            FlattenError::RenameConflict { .. } => "rename-conflict",
            FlattenError::RenameFailure { .. } => "rename-failure",
            FlattenError::DeleteFailure { .. } => "delete-failure",
        }
    }
}

/// Everything needed to flatten one candidate, gathered without mutating anything.
#[derive(Clone, Debug, Serialize)]
pub struct CandidatePlan {
    pub candidate: Utf8PathBuf,
    pub nested: Utf8PathBuf,
    pub target: Utf8PathBuf,
    pub entries: Vec<String>,
}

impl CandidatePlan {
    fn nested_name(&self) -> &str {
        self.nested.file_name().unwrap_or_default()
    }
}

pub type PlanResult = Result<CandidatePlan, FlattenError>;

/// Flatten every candidate below `root`.
///
/// Only an unusable root is returned as `Err`; per-candidate failures are recorded
/// in the report. With [`FailurePolicy::Abort`] the report ends at the first failure.
pub fn flatten(root: &Utf8Path, options: &FlattenOptions) -> Result<FlattenReport, FlattenError> {
    let candidates = discover_candidates(root, &options.suffix)?;
    let mut report = FlattenReport::new(root, options.dry_run);

    if candidates.is_empty() {
        info!("no directories ending in `{}` under {}", options.suffix, root);
        return Ok(report);
    }

    for candidate in candidates {
        let result = plan_candidate(&candidate, options).and_then(|plan| {
            if options.dry_run {
                Ok(Flattened::planned(&plan))
            } else {
                apply(&plan)
            }
        });

        let failed = result.is_err();
        if let Err(err) = &result {
            warn!("{}: {}", candidate, err);
        }
        report.push(CandidateOutcome::new(candidate, result));

        if failed && options.on_error == FailurePolicy::Abort {
            break;
        }
    }

    Ok(report)
}

/// Read-only counterpart of [`flatten`]: one plan per candidate.
pub fn plan(root: &Utf8Path, options: &FlattenOptions) -> Result<Vec<PlanResult>, FlattenError> {
    let candidates = discover_candidates(root, &options.suffix)?;
    Ok(candidates
        .iter()
        .map(|candidate| plan_candidate(candidate, options))
        .collect())
}

/// Direct child directories of `root` whose names end in `suffix`, sorted by name.
pub fn discover_candidates(root: &Utf8Path, suffix: &str) -> Result<Vec<Utf8PathBuf>, FlattenError> {
    if !root.is_dir() {
        return Err(FlattenError::InvalidRoot(root.to_owned()));
    }
    suffixed_dirs(root, suffix)
}

/// Pick the nested directory inside `candidate` according to `policy`.
pub fn select_nested(
    candidate: &Utf8Path,
    suffix: &str,
    policy: NestedPolicy,
) -> Result<Utf8PathBuf, FlattenError> {
    let mut found = suffixed_dirs(candidate, suffix)?;
    match (found.len(), policy) {
        (0, _) => Err(FlattenError::NoNestedDirectory {
            candidate: candidate.to_owned(),
            suffix: suffix.to_owned(),
        }),
        (1, _) | (_, NestedPolicy::First) => Ok(found.remove(0)),
        (_, NestedPolicy::Unique) => Err(FlattenError::AmbiguousNested {
            candidate: candidate.to_owned(),
            found: found
                .iter()
                .filter_map(|path| path.file_name().map(str::to_owned))
                .collect(),
        }),
    }
}

/// Sibling path of `candidate` with the trailing `suffix` removed.
pub fn target_for(candidate: &Utf8Path, suffix: &str) -> Result<Utf8PathBuf, FlattenError> {
    let stripped = candidate
        .file_name()
        .and_then(|name| name.strip_suffix(suffix))
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| FlattenError::EmptyTarget {
            candidate: candidate.to_owned(),
            suffix: suffix.to_owned(),
        })?;
    Ok(candidate.with_file_name(stripped))
}

fn plan_candidate(candidate: &Utf8Path, options: &FlattenOptions) -> PlanResult {
    let target = target_for(candidate, &options.suffix)?;
    let nested = select_nested(candidate, &options.suffix, options.nested)?;
    debug!("{}: nested directory {}", candidate, nested);

    // Checked up front so a conflict leaves the candidate untouched.
    if target.symlink_metadata().is_ok() {
        return Err(FlattenError::RenameConflict {
            candidate: candidate.to_owned(),
            target,
        });
    }

    let entries = entry_names(&nested)?;
    Ok(CandidatePlan {
        candidate: candidate.to_owned(),
        nested,
        target,
        entries,
    })
}

fn apply(plan: &CandidatePlan) -> Result<Flattened, FlattenError> {
    let nested_name = plan.nested_name().to_owned();
    let nested = if plan.entries.iter().any(|entry| *entry == nested_name) {
        stage_nested(plan)?
    } else {
        plan.nested.clone()
    };
    let staged_name = nested.file_name().unwrap_or_default().to_owned();

    for entry in &plan.entries {
        let from = nested.join(entry);
        let to = plan.candidate.join(entry);
        debug!("moving {} -> {}", from, to);
        replace_entry(&from, &to).map_err(|source| FlattenError::MoveFailure {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;
    }

    rename_candidate(&plan.candidate, &plan.target)?;
    info!("renamed {} -> {}", plan.candidate, plan.target);

    let leftover = plan.target.join(&staged_name);
    fs::remove_dir_all(&leftover).map_err(|source| FlattenError::DeleteFailure {
        path: leftover.clone(),
        source,
    })?;
    debug!("removed {}", leftover);

    Ok(Flattened {
        candidate: plan.candidate.clone(),
        target: plan.target.clone(),
        moved: plan.entries.len(),
    })
}

/// Move the nested directory out of the way of an entry sharing its name.
fn stage_nested(plan: &CandidatePlan) -> Result<Utf8PathBuf, FlattenError> {
    let base = format!("{STAGING_PREFIX}{}", plan.nested_name());
    let mut staged = plan.candidate.join(&base);
    let mut attempt = 1;
    while staged.symlink_metadata().is_ok() || plan.entries.contains(&staged_file_name(&staged)) {
        staged = plan.candidate.join(format!("{base}-{attempt}"));
        attempt += 1;
    }

    debug!("staging {} as {}", plan.nested, staged);
    fs::rename(&plan.nested, &staged).map_err(|source| FlattenError::MoveFailure {
        from: plan.nested.clone(),
        to: staged.clone(),
        source,
    })?;
    Ok(staged)
}

fn staged_file_name(path: &Utf8Path) -> String {
    path.file_name().unwrap_or_default().to_owned()
}

/// Rename `from` to `to`, replacing whatever already sits at `to`.
fn replace_entry(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    if let Ok(existing) = to.symlink_metadata() {
        if existing.is_dir() {
            fs::remove_dir_all(to)?;
        } else {
            fs::remove_file(to)?;
        }
    }
    fs::rename(from, to)
}

fn rename_candidate(candidate: &Utf8Path, target: &Utf8Path) -> Result<(), FlattenError> {
    if target.symlink_metadata().is_ok() {
        return Err(FlattenError::RenameConflict {
            candidate: candidate.to_owned(),
            target: target.to_owned(),
        });
    }
    fs::rename(candidate, target).map_err(|source| FlattenError::RenameFailure {
        candidate: candidate.to_owned(),
        target: target.to_owned(),
        source,
    })
}

fn suffixed_dirs(dir: &Utf8Path, suffix: &str) -> Result<Vec<Utf8PathBuf>, FlattenError> {
    let scan_err = |source: io::Error| FlattenError::Scan {
        path: dir.to_owned(),
        source,
    };

    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        let Ok(name) = entry.file_name().into_string() else {
            debug!("skipping non UTF-8 entry in {}", dir);
            continue;
        };
        if name.len() <= suffix.len() || !name.ends_with(suffix) {
            continue;
        }
        if !entry.file_type().map_err(scan_err)?.is_dir() {
            debug!("skipping {}/{}: not a directory", dir, name);
            continue;
        }
        found.push(dir.join(name));
    }
    found.sort();
    Ok(found)
}

fn entry_names(dir: &Utf8Path) -> Result<Vec<String>, FlattenError> {
    let scan_err = |source: io::Error| FlattenError::Scan {
        path: dir.to_owned(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        let name = entry.file_name().into_string().map_err(|raw| {
            scan_err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry name {:?} is not valid UTF-8", raw),
            ))
        })?;
        names.push(name);
    }
    names.sort();
    Ok(names)
}
