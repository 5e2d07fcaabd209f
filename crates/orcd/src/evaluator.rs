//! Executor-step evaluation: did the tool actually change the working tree?
//!
//! The baseline is the `diff --name-only` listing taken immediately before
//! the executor child is launched; the current listing comes from the
//! post-step evidence. An exit-0 executor whose set difference is empty is
//! suspicious; if the preceding content-search cmd had already found matches
//! (precheck hit) it is classified as a deliberate no-op instead and the
//! retry is skipped.

use orc_core::{Evaluation, RetryOutcome};

/// Instructions for the single-shot retry after a suspicious no-change.
pub const RETRY_INSTRUCTIONS: &str = "\
The previous attempt finished without changing any files. Apply the smallest \
real change that satisfies the original instructions: modify exactly one \
existing view or renderer source file so the working tree shows a diff, do \
not add or change dependency manifests or lockfiles, and do not duplicate \
existing UI elements.";

/// Set difference current-minus-baseline, preserving `current` order.
pub fn changed_since(baseline: &[String], current: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|path| !baseline.contains(path))
        .cloned()
        .collect()
}

/// Classify an executor step's effect on the working tree.
pub fn evaluate(
    baseline: &[String],
    current: &[String],
    exit_code: i32,
    precheck_hit: bool,
) -> Evaluation {
    let changed_files = changed_since(baseline, current);
    let has_changes = !changed_files.is_empty();
    let suspicious_no_change = exit_code == 0 && !has_changes;
    let no_op = suspicious_no_change && precheck_hit;

    Evaluation {
        has_changes,
        changed_files,
        suspicious_no_change,
        no_op,
        retried: false,
        retry_result: None,
    }
}

/// Outcome of the retried attempt, from a fresh post-retry listing.
pub fn retry_outcome(baseline: &[String], current: &[String]) -> RetryOutcome {
    let changed_files = changed_since(baseline, current);
    RetryOutcome {
        has_changes: !changed_files.is_empty(),
        changed_files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn changed_since_preserves_current_order() {
        let baseline = paths(&["a.ts"]);
        let current = paths(&["z.ts", "a.ts", "b.ts"]);
        assert_eq!(changed_since(&baseline, &current), paths(&["z.ts", "b.ts"]));
    }

    #[test]
    fn a_real_diff_is_not_suspicious() {
        let eval = evaluate(&paths(&[]), &paths(&["src/app.tsx"]), 0, false);
        assert!(eval.has_changes);
        assert!(!eval.suspicious_no_change);
        assert!(!eval.no_op);
    }

    #[test]
    fn exit_zero_without_diff_is_suspicious() {
        let eval = evaluate(&paths(&[]), &paths(&[]), 0, false);
        assert!(!eval.has_changes);
        assert!(eval.suspicious_no_change);
        assert!(!eval.no_op);
    }

    #[test]
    fn precheck_hit_upgrades_suspicious_to_no_op() {
        let eval = evaluate(&paths(&[]), &paths(&[]), 0, true);
        assert!(eval.suspicious_no_change);
        assert!(eval.no_op);
    }

    #[test]
    fn nonzero_exit_is_never_suspicious() {
        let eval = evaluate(&paths(&[]), &paths(&[]), 1, true);
        assert!(!eval.suspicious_no_change);
        assert!(!eval.no_op);
    }

    #[test]
    fn pre_existing_dirt_does_not_count_as_changes() {
        // A file already dirty before the step is in the baseline; only new
        // paths count.
        let baseline = paths(&["dirty.ts"]);
        let eval = evaluate(&baseline, &baseline, 0, false);
        assert!(!eval.has_changes);
        assert!(eval.suspicious_no_change);
    }

    #[test]
    fn retry_outcome_reflects_fresh_listing() {
        let baseline = paths(&["dirty.ts"]);
        let outcome = retry_outcome(&baseline, &paths(&["dirty.ts", "view.tsx"]));
        assert!(outcome.has_changes);
        assert_eq!(outcome.changed_files, paths(&["view.tsx"]));

        let outcome = retry_outcome(&baseline, &baseline);
        assert!(!outcome.has_changes);
    }

    #[test]
    fn retry_instructions_forbid_dependency_edits() {
        assert!(RETRY_INSTRUCTIONS.contains("lockfiles"));
        assert!(RETRY_INSTRUCTIONS.contains("exactly one"));
    }
}
