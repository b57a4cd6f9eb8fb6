//! Run summary
//!
//! One line per resource in declaration order, then a single counts line.

use colored::Colorize;

use crate::resource::{ReconcileStatus, ReconciliationResult};
use crate::ui;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_results(results: &[ReconciliationResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                ReconcileStatus::Created => summary.created += 1,
                ReconcileStatus::Updated => summary.updated += 1,
                ReconcileStatus::Skipped => summary.skipped += 1,
                ReconcileStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn counts_line(&self) -> String {
        format!(
            "created: {}, updated: {}, skipped: {}, failed: {}",
            self.created, self.updated, self.skipped, self.failed
        )
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Emit the per-resource table and counts line. Pure output; never fails.
pub fn report(results: &[ReconciliationResult]) {
    ui::header("Summary");

    for result in results {
        let symbol = match result.status {
            ReconcileStatus::Created => "+".green(),
            ReconcileStatus::Updated => "~".cyan(),
            ReconcileStatus::Skipped => "○".dimmed(),
            ReconcileStatus::Failed => "✗".red(),
        };
        println!(
            "  {} {:<28} {:<8} {}",
            symbol,
            result.name,
            result.status.to_string(),
            result.detail.dimmed()
        );
    }

    let summary = Summary::from_results(results);
    println!();
    if summary.is_success() {
        ui::success(&summary.counts_line());
    } else {
        ui::warn(&summary.counts_line());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ReconciliationResult;

    #[test]
    fn test_counts_line_format() {
        let results = vec![
            ReconciliationResult::new("a", ReconcileStatus::Created, ""),
            ReconciliationResult::new("b", ReconcileStatus::Created, ""),
            ReconciliationResult::new("c", ReconcileStatus::Updated, ""),
        ];
        let summary = Summary::from_results(&results);
        assert_eq!(
            summary.counts_line(),
            "created: 2, updated: 1, skipped: 0, failed: 0"
        );
        assert!(summary.is_success());
    }

    #[test]
    fn test_failed_counts() {
        let results = vec![
            ReconciliationResult::new("a", ReconcileStatus::Failed, "boom"),
            ReconciliationResult::new("b", ReconcileStatus::Skipped, ""),
        ];
        let summary = Summary::from_results(&results);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_empty_results() {
        let summary = Summary::from_results(&[]);
        assert_eq!(
            summary.counts_line(),
            "created: 0, updated: 0, skipped: 0, failed: 0"
        );
        assert!(summary.is_success());
    }
}
