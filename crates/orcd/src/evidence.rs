//! Evidence collection: three read-only git queries after every non-note
//! step.
//!
//! The queries run in sequence in the workspace and their raw stdout is both
//! logged as a fixed-order system block and attached to the step record. A
//! failing query produces an `Evidence::Failed` block instead; execution of
//! the run continues.

use crate::supervisor::OutputSink;
use orc_core::{Evidence, OutputSource};
use std::path::Path;
use tokio::process::Command;

const QUERIES: [&[&str]; 3] = [
    &["status", "--porcelain"],
    &["diff", "--stat"],
    &["diff", "--name-only"],
];

/// Run the three evidence queries and emit the formatted block to the sink.
pub async fn collect(workspace: &Path, sink: &dyn OutputSink) -> Evidence {
    let mut outputs = Vec::with_capacity(QUERIES.len());
    for args in QUERIES {
        match run_git(workspace, args).await {
            Ok(stdout) => outputs.push(stdout),
            Err(reason) => {
                sink.line(OutputSource::System, "--- evidence (failed) ---");
                sink.line(OutputSource::System, &reason);
                return Evidence::Failed { error: reason };
            }
        }
    }

    let evidence = Evidence::Collected {
        status: outputs[0].clone(),
        diff_stat: outputs[1].clone(),
        diff_names: outputs[2].clone(),
    };

    sink.line(OutputSource::System, "--- evidence ---");
    for (args, output) in QUERIES.iter().zip(&outputs) {
        sink.line(OutputSource::System, &format!("git {}:", args.join(" ")));
        for line in output.lines() {
            sink.line(OutputSource::System, line);
        }
    }

    evidence
}

/// A fresh `git diff --name-only` listing, parsed. Used by the evaluator to
/// take the pre-step baseline and the post-retry snapshot.
pub async fn changed_files(workspace: &Path) -> Result<Vec<String>, String> {
    let stdout = run_git(workspace, &["diff", "--name-only"]).await?;
    Ok(parse_name_only(&stdout))
}

/// Parse `diff --name-only` output into a deduplicated path list, preserving
/// the listing order.
pub fn parse_name_only(stdout: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| seen.insert((*l).to_string()))
        .map(ToString::to_string)
        .collect()
}

async fn run_git(workspace: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workspace)
        .output()
        .await
        .map_err(|e| format!("failed to execute git {}: {e}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "git {} exited {}: {}",
            args.join(" "),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::NullSink;
    use std::process::Command as StdCommand;

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {args:?} failed");
    }

    fn setup_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init"]);
        git(dir.path(), &["config", "user.email", "test@test.com"]);
        git(dir.path(), &["config", "user.name", "Test"]);
        std::fs::write(dir.path().join("README.md"), "# test\n").unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-m", "init"]);
        dir
    }

    #[test]
    fn parse_name_only_dedupes_and_keeps_order() {
        let parsed = parse_name_only("b.txt\na.txt\nb.txt\n\n  \n");
        assert_eq!(parsed, vec!["b.txt", "a.txt"]);
    }

    #[tokio::test]
    async fn collects_evidence_in_a_clean_repo() {
        let repo = setup_repo();
        let evidence = collect(repo.path(), &NullSink).await;
        match evidence {
            Evidence::Collected { status, diff_stat, diff_names } => {
                assert!(status.is_empty());
                assert!(diff_stat.is_empty());
                assert!(diff_names.is_empty());
            }
            Evidence::Failed { error } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn sees_a_modified_file() {
        let repo = setup_repo();
        std::fs::write(repo.path().join("README.md"), "# changed\n").unwrap();
        let evidence = collect(repo.path(), &NullSink).await;
        let names = evidence.diff_names().unwrap();
        assert_eq!(parse_name_only(names), vec!["README.md"]);
    }

    #[tokio::test]
    async fn failing_query_yields_error_evidence() {
        let dir = tempfile::tempdir().unwrap();
        // Not a repository: git status exits non-zero.
        let evidence = collect(dir.path(), &NullSink).await;
        assert!(evidence.is_error());
    }

    #[tokio::test]
    async fn changed_files_reports_working_tree_diff() {
        let repo = setup_repo();
        assert!(changed_files(repo.path()).await.unwrap().is_empty());
        std::fs::write(repo.path().join("README.md"), "# v2\n").unwrap();
        assert_eq!(
            changed_files(repo.path()).await.unwrap(),
            vec!["README.md"]
        );
    }
}
