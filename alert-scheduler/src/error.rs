use alert_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A run produced nothing and hit at least one failure that points at
    /// broken infrastructure rather than a single bad item.
    #[error("{job} run failed: {}", .failures.join("; "))]
    Systemic {
        job: &'static str,
        failures: Vec<String>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("binding {0} not found")]
    BindingNotFound(i64),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn is_systemic(&self) -> bool {
        matches!(self, SchedulerError::Systemic { .. })
    }
}

/// Collapses a run into `Err` only when nothing succeeded and something
/// systemic failed.
pub(crate) fn settle<T>(
    job: &'static str,
    report: T,
    successes: usize,
    failures: Vec<String>,
) -> Result<T, SchedulerError> {
    if successes == 0 && !failures.is_empty() {
        tracing::error!(job, failures = failures.len(), "Run failed without any success");
        return Err(SchedulerError::Systemic { job, failures });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_success_is_not_an_error() {
        let settled = settle("offline", 3usize, 1, vec!["nodes: timeout".into()]);
        assert_eq!(settled.unwrap(), 3);
    }

    #[test]
    fn zero_successes_with_failures_is_systemic() {
        let err = settle("daily", (), 0, vec!["binding lookup: refused".into()]).unwrap_err();
        assert!(err.is_systemic());
        assert_eq!(err.to_string(), "daily run failed: binding lookup: refused");
    }

    #[test]
    fn quiet_run_is_ok() {
        assert!(settle("weekly", (), 0, Vec::new()).is_ok());
    }
}
