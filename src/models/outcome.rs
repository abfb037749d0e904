use serde::Serialize;
use std::fmt;

/// Why a core operation fell back instead of producing its primary result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    /// No embedding credentials; the vector index is a no-op.
    IndexDisabled,
    /// Empty listen history, answered from the fallback or the catalog.
    ColdStart,
    /// The song has no embedding in the index.
    NotIndexed,
    /// The vector index or its backend failed during the call.
    QueryFailed,
    /// History embeddings disagree on dimension with each other or the index.
    DimensionMismatch,
    /// The catalog store could not be read.
    CatalogUnavailable,
}

impl DegradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradeReason::IndexDisabled => "index_disabled",
            DegradeReason::ColdStart => "cold_start",
            DegradeReason::NotIndexed => "not_indexed",
            DegradeReason::QueryFailed => "query_failed",
            DegradeReason::DimensionMismatch => "dimension_mismatch",
            DegradeReason::CatalogUnavailable => "catalog_unavailable",
        }
    }
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A usable value produced on a fallback path, tagged with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Degraded<T> {
    pub reason: DegradeReason,
    pub value: T,
}

impl<T> Degraded<T> {
    pub fn new(reason: DegradeReason, value: T) -> Self {
        Self { reason, value }
    }
}

pub type Outcome<T> = std::result::Result<T, Degraded<T>>;

pub trait OutcomeExt<T> {
    /// The value regardless of which path produced it.
    fn into_value(self) -> T;

    fn degrade_reason(&self) -> Option<DegradeReason>;
}

impl<T> OutcomeExt<T> for Outcome<T> {
    fn into_value(self) -> T {
        match self {
            Ok(value) => value,
            Err(degraded) => degraded.value,
        }
    }

    fn degrade_reason(&self) -> Option<DegradeReason> {
        self.as_ref().err().map(|d| d.reason)
    }
}

pub(crate) fn degraded<T>(reason: DegradeReason, value: T) -> Outcome<T> {
    Err(Degraded::new(reason, value))
}
