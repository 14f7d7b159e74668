use std::fmt;

use polars::prelude::*;

use crate::error::AhleError;
use crate::schema::diagnostics as cols;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    MissingFile,
    SchemaDrift,
    MissingStdev,
    ZeroDenominator,
    MissingRate,
    DataQuality,
    ConsistencyViolation,
    FailedPartition,
}

impl DiagnosticKind {
    pub fn name(self) -> &'static str {
        match self {
            DiagnosticKind::MissingFile => "missing_file",
            DiagnosticKind::SchemaDrift => "schema_drift",
            DiagnosticKind::MissingStdev => "missing_stdev",
            DiagnosticKind::ZeroDenominator => "zero_denominator",
            DiagnosticKind::MissingRate => "missing_rate",
            DiagnosticKind::DataQuality => "data_quality",
            DiagnosticKind::ConsistencyViolation => "consistency_violation",
            DiagnosticKind::FailedPartition => "failed_partition",
        }
    }

    fn severity(self) -> Severity {
        match self {
            DiagnosticKind::MissingFile | DiagnosticKind::MissingStdev | DiagnosticKind::MissingRate => {
                Severity::Warning
            }
            DiagnosticKind::SchemaDrift
            | DiagnosticKind::ZeroDenominator
            | DiagnosticKind::DataQuality
            | DiagnosticKind::ConsistencyViolation
            | DiagnosticKind::FailedPartition => Severity::Error,
        }
    }
}

/// A non-fatal problem found while running the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    /// Where it happened: a file path, a segment, a partition.
    pub context: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind.name(), self.context, self.message)
    }
}

/// Diagnostics collected during one run. Every push is also logged.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: DiagnosticKind, context: impl Into<String>, message: impl Into<String>) {
        let d = Diagnostic {
            severity: kind.severity(),
            kind,
            context: context.into(),
            message: message.into(),
        };
        match d.severity {
            Severity::Warning => log::warn!("{d}"),
            Severity::Error => log::error!("{d}"),
        }
        self.items.push(d);
    }

    /// Push unless a diagnostic of the same kind and context is already held.
    pub fn push_once(&mut self, kind: DiagnosticKind, context: impl Into<String>, message: impl Into<String>) {
        let context = context.into();
        if self.items.iter().any(|d| d.kind == kind && d.context == context) {
            return;
        }
        self.push(kind, context, message);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.kind == kind)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_dataframe(&self) -> Result<DataFrame, AhleError> {
        let severity: Vec<&str> = self
            .items
            .iter()
            .map(|d| match d.severity {
                Severity::Warning => "warning",
                Severity::Error => "error",
            })
            .collect();
        let kind: Vec<&str> = self.items.iter().map(|d| d.kind.name()).collect();
        let context: Vec<&str> = self.items.iter().map(|d| d.context.as_str()).collect();
        let message: Vec<&str> = self.items.iter().map(|d| d.message.as_str()).collect();

        Ok(DataFrame::new(vec![
            Column::new(cols::SEVERITY.into(), severity),
            Column::new(cols::KIND.into(), kind),
            Column::new(cols::CONTEXT.into(), context),
            Column::new(cols::MESSAGE.into(), message),
        ])?)
    }
}
