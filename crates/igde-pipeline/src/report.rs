use igde_core::FilterOutcome;
use igde_store_sqlite::AppendSummary;
use serde::Serialize;

/// Rows kept and removed by one named step.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepCount {
    pub step: String,
    pub kept: usize,
    pub removed: usize,
}

/// Named assertion evaluated during a pass.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub detail: String,
}

/// Counts, checks and appends of one pass, in the order they happened.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PassReport {
    pub pass: String,
    pub steps: Vec<StepCount>,
    pub checks: Vec<CheckResult>,
    pub appends: Vec<AppendSummary>,
}

impl PassReport {
    #[must_use]
    pub fn new(pass: &str) -> Self {
        Self { pass: pass.to_string(), steps: Vec::new(), checks: Vec::new(), appends: Vec::new() }
    }

    pub fn record(&mut self, step: &str, outcome: FilterOutcome) {
        tracing::info!(
            pass = self.pass.as_str(),
            step,
            kept = outcome.kept,
            removed = outcome.removed,
            "filtered"
        );
        self.steps.push(StepCount {
            step: step.to_string(),
            kept: outcome.kept,
            removed: outcome.removed,
        });
    }

    /// Record a step that changes row counts without filtering (clip, dissolve, merge).
    pub fn record_counts(&mut self, step: &str, before: usize, after: usize) {
        self.record(step, FilterOutcome { kept: after, removed: before.saturating_sub(after) });
    }

    pub fn check(&mut self, check: &str, passed: bool, detail: String) {
        let pass = self.pass.as_str();
        if passed {
            tracing::info!(pass, check, detail = detail.as_str(), "check passed");
        } else {
            tracing::warn!(pass, check, detail = detail.as_str(), "check failed");
        }
        self.checks.push(CheckResult { check: check.to_string(), passed, detail });
    }

    pub fn appended(&mut self, summary: AppendSummary) {
        self.appends.push(summary);
    }

    #[must_use]
    pub fn step(&self, step: &str) -> Option<&StepCount> {
        self.steps.iter().find(|entry| entry.step == step)
    }

    #[must_use]
    pub fn rows_appended(&self) -> usize {
        self.appends.iter().map(|append| append.rows_appended).sum()
    }
}
