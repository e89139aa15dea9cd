use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};

use crate::flatten::{CandidatePlan, FlattenError};

/// A candidate that was flattened (or would be, in a dry run).
#[derive(Clone, Debug, Serialize, Eq, PartialEq)]
pub struct Flattened {
    pub candidate: Utf8PathBuf,
    pub target: Utf8PathBuf,
    pub moved: usize,
}

impl Flattened {
    pub fn planned(plan: &CandidatePlan) -> Self {
        Self {
            candidate: plan.candidate.clone(),
            target: plan.target.clone(),
            moved: plan.entries.len(),
        }
    }
}

#[derive(Debug)]
pub struct CandidateOutcome {
    pub candidate: Utf8PathBuf,
    pub result: Result<Flattened, FlattenError>,
}

impl CandidateOutcome {
    pub fn new(candidate: Utf8PathBuf, result: Result<Flattened, FlattenError>) -> Self {
        Self { candidate, result }
    }
}

impl Serialize for CandidateOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CandidateOutcome", 5)?;
        state.serialize_field("candidate", &self.candidate)?;
        match &self.result {
            Ok(done) => {
                state.serialize_field("status", "ok")?;
                state.serialize_field("target", &done.target)?;
                state.serialize_field("moved", &done.moved)?;
                state.serialize_field("error", &Option::<ErrorView>::None)?;
            }
            Err(err) => {
                state.serialize_field("status", "failed")?;
                state.serialize_field("target", &Option::<Utf8PathBuf>::None)?;
                state.serialize_field("moved", &0usize)?;
                state.serialize_field("error", &Some(ErrorView::from(err)))?;
            }
        }
        state.end()
    }
}

#[derive(Serialize)]
struct ErrorView {
    kind: &'static str,
    message: String,
}

impl From<&FlattenError> for ErrorView {
    fn from(err: &FlattenError) -> Self {
        Self {
            kind: err.kind(),
            message: error_chain(err),
        }
    }
}

/// Outcome of one flatten run, in candidate order.
#[derive(Debug, Serialize)]
pub struct FlattenReport {
    pub root: Utf8PathBuf,
    pub dry_run: bool,
    pub outcomes: Vec<CandidateOutcome>,
}

impl FlattenReport {
    pub fn new(root: &Utf8Path, dry_run: bool) -> Self {
        Self {
            root: root.to_owned(),
            dry_run,
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: CandidateOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }
}

pub fn format_text(report: &FlattenReport) -> String {
    let mut out = String::new();
    if report.is_empty() {
        let _ = writeln!(out, "Nothing to flatten under {}.", report.root);
        return out;
    }

    let verb = if report.dry_run { "would flatten" } else { "flattened" };
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(done) => {
                let _ = writeln!(
                    out,
                    "  {} {} -> {} ({} entries)",
                    verb, done.candidate, done.target, done.moved
                );
            }
            Err(err) => {
                let _ = writeln!(out, "  failed {}: {}", outcome.candidate, error_chain(err));
            }
        }
    }

    let _ = writeln!(
        out,
        "{} succeeded, {} failed under {}{}",
        report.succeeded(),
        report.failed(),
        report.root,
        if report.dry_run { " (dry-run)" } else { "" }
    );
    out
}

pub fn format_json(report: &FlattenReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// Render an error and its `source()` chain on one line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(message, ": {}", cause);
        source = cause.source();
    }
    message
}
