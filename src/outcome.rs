//! Maps the end state of a run to one of three outcomes and an exit status.

use log::{debug, error};

use crate::engine::ReportNode;
use crate::error::Error;

pub const EXIT_CLEAN: u8 = 0;
pub const EXIT_DIFFERENCES: u8 = 1;
pub const EXIT_FAILURE: u8 = 2;

const UNAVAILABLE_HINT: &str =
    "(Hint: specify `--platform` explicitly, e.g., `--platform=linux/amd64`)";

#[derive(Debug)]
pub enum ExecutionOutcome {
    Clean,
    DifferencesFound,
    Failed(Error),
}

impl ExecutionOutcome {
    /// An error wins over any report, even one with conflicts.
    pub fn classify(report: Option<&ReportNode>, error: Option<Error>) -> Self {
        if let Some(err) = error {
            return ExecutionOutcome::Failed(err);
        }
        match report {
            Some(report) if report.has_differences() => ExecutionOutcome::DifferencesFound,
            _ => ExecutionOutcome::Clean,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            ExecutionOutcome::Clean => EXIT_CLEAN,
            ExecutionOutcome::DifferencesFound => EXIT_DIFFERENCES,
            ExecutionOutcome::Failed(_) => EXIT_FAILURE,
        }
    }

    /// Logs the outcome and returns the exit status.
    pub fn finish(self) -> u8 {
        let code = self.exit_code();
        if let ExecutionOutcome::Failed(err) = &self {
            error!("{}", failure_message(err));
        }
        if code != EXIT_CLEAN {
            debug!("exiting with code {}", code);
        }
        code
    }
}

impl From<Error> for ExecutionOutcome {
    fn from(err: Error) -> Self {
        ExecutionOutcome::Failed(err)
    }
}

/// The line logged for a failed run.
pub fn failure_message(err: &Error) -> String {
    if err.is_unavailable() {
        format!("{} {}", err, UNAVAILABLE_HINT)
    } else {
        err.to_string()
    }
}
