//! Pipeline data model: runs, phase plans, results, artifacts and events.

mod artifact;
mod error_code;
#[cfg(test)]
mod error_code_test;
mod event;
mod phase_descriptor;
mod phase_result;
#[cfg(test)]
mod phase_result_test;
mod run;
pub(crate) mod run_context;
#[cfg(test)]
mod run_context_test;
mod run_status;
mod run_summary;

pub use artifact::{Artifact, ArtifactKind, ArtifactMeta, NewArtifact};
pub use error_code::ErrorCode;
pub use event::{Event, EventData, EventLevel, NewEvent, event_data};
pub use phase_descriptor::{PhaseConfig, PhaseDescriptor};
pub use phase_result::PhaseResult;
pub use run::{NewRun, Run, RunCompletion};
pub use run_context::{RunContext, join_uri};
pub use run_status::RunStatus;
pub use run_summary::{PhaseSummaryEntry, RUN_SUMMARY_VERSION, RunSummary, SummaryArtifact};
