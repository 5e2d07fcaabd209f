//! Planner prompt assembly and output extraction.
//!
//! The user message sent to the completion endpoint is three blocks in fixed
//! order: the capability card, the last-run summary, and the requirement
//! verbatim. Extraction pulls the first plausible JSON object back out of the
//! model's reply.

/// Fixed preamble telling the planner what this orchestrator can execute.
pub const CAPABILITY_CARD: &str = "\
You produce build plans for a local orchestrator. Reply with a single JSON \
object and nothing else: {\"name\": string, \"steps\": [...]}.

Step types:
- {\"type\":\"note\",\"message\":string} — commentary; runs nothing.
- {\"type\":\"cmd\",\"command\":string} — one git command. Only git is \
allowed, and the command must be a single invocation: no |, ||, &&, >, <, ;, \
$( or backticks. git grep is useful as a precheck before editing.
- {\"type\":\"executor\",\"tool\":\"codex\",\"instructions\":string} — asks \
the codex tool to modify the workspace. It runs in two phases (propose, then \
apply) and its effect is measured afterwards by git status --porcelain, git \
diff --stat and git diff --name-only; an executor step that changes nothing \
is flagged suspicious and may be retried once.

Rules: at most 8 steps; include at least one note step; never stage, commit \
or push (no git add/commit/push); changes to package manager files \
(package.json, lockfiles) require human approval.";

/// Placeholder used when no prior run exists for the workspace.
pub const NO_PRIOR_RUNS_PLACEHOLDER: &str = "No previous runs in this workspace.";

/// Maximum length of the last-run summary block, in characters.
pub const LAST_RUN_SUMMARY_LIMIT: usize = 1_200;

/// Appended to the user prompt on the single retry after a plan came back
/// with forbidden shell operators.
pub const OPERATOR_RETRY_REMINDER: &str = "\
Reminder: cmd steps must be single git invocations with no shell operators \
(||, &&, |, >, <, ;, $(, `). Regenerate the full plan as pure JSON.";

/// Assemble the user-role message: capability card, last-run summary,
/// requirement — in that order.
pub fn build_user_prompt(last_run_summary: Option<&str>, requirement: &str) -> String {
    let summary = last_run_summary.unwrap_or(NO_PRIOR_RUNS_PLACEHOLDER);
    format!("{CAPABILITY_CARD}\n\nLast run:\n{summary}\n\nRequirement:\n{requirement}")
}

/// Truncate a last-run summary to [`LAST_RUN_SUMMARY_LIMIT`] characters.
pub fn truncate_summary(summary: &str) -> String {
    if summary.chars().nth(LAST_RUN_SUMMARY_LIMIT).is_none() {
        summary.to_string()
    } else {
        summary.chars().take(LAST_RUN_SUMMARY_LIMIT).collect()
    }
}

/// Extract a JSON payload from model output.
///
/// Prefers a fenced block (```` ``` ```` or ```` ```json ````); otherwise
/// falls back to the substring between the first `{` and the last `}`.
/// Returns the trimmed extraction, or `None` when neither form is present.
pub fn extract_json(content: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced_block(content) {
        let trimmed = fenced.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    Some(content[start..=end].trim().to_string())
}

fn extract_fenced_block(content: &str) -> Option<&str> {
    let open = content.find("```")?;
    let after_fence = &content[open + 3..];
    // Skip an optional language tag on the opening fence line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_blocks_are_in_order() {
        let prompt = build_user_prompt(Some("summary here"), "add a button");
        let card_pos = prompt.find("build plans").unwrap();
        let summary_pos = prompt.find("summary here").unwrap();
        let req_pos = prompt.find("add a button").unwrap();
        assert!(card_pos < summary_pos);
        assert!(summary_pos < req_pos);
    }

    #[test]
    fn user_prompt_uses_placeholder_without_history() {
        let prompt = build_user_prompt(None, "req");
        assert!(prompt.contains(NO_PRIOR_RUNS_PLACEHOLDER));
    }

    #[test]
    fn requirement_is_verbatim() {
        let requirement = "  keep\n  my whitespace  ";
        let prompt = build_user_prompt(None, requirement);
        assert!(prompt.ends_with(requirement));
    }

    #[test]
    fn summary_truncates_at_limit() {
        let long = "x".repeat(LAST_RUN_SUMMARY_LIMIT + 100);
        assert_eq!(truncate_summary(&long).chars().count(), LAST_RUN_SUMMARY_LIMIT);
        let short = "short".to_string();
        assert_eq!(truncate_summary(&short), short);
    }

    #[test]
    fn extracts_plain_fenced_block() {
        let content = "Here is the plan:\n```\n{\"name\":\"p\"}\n```\nDone.";
        assert_eq!(extract_json(content).unwrap(), "{\"name\":\"p\"}");
    }

    #[test]
    fn extracts_json_tagged_fenced_block() {
        let content = "```json\n{\"name\":\"p\",\"steps\":[]}\n```";
        assert_eq!(extract_json(content).unwrap(), "{\"name\":\"p\",\"steps\":[]}");
    }

    #[test]
    fn falls_back_to_brace_matching() {
        let content = "Sure! {\"name\":\"p\",\"steps\":[{\"type\":\"note\"}]} hope that helps";
        assert_eq!(
            extract_json(content).unwrap(),
            "{\"name\":\"p\",\"steps\":[{\"type\":\"note\"}]}"
        );
    }

    #[test]
    fn brace_fallback_spans_first_to_last() {
        let content = "{\"a\":1} noise {\"b\":2}";
        assert_eq!(extract_json(content).unwrap(), "{\"a\":1} noise {\"b\":2}");
    }

    #[test]
    fn returns_none_when_no_json_present() {
        assert!(extract_json("no braces here").is_none());
        assert!(extract_json("").is_none());
        assert!(extract_json("} reversed {").is_none());
    }

    #[test]
    fn empty_fenced_block_falls_back_to_braces() {
        let content = "```\n\n```\n{\"name\":\"p\"}";
        assert_eq!(extract_json(content).unwrap(), "{\"name\":\"p\"}");
    }

    #[test]
    fn capability_card_names_the_contract() {
        assert!(CAPABILITY_CARD.contains("note"));
        assert!(CAPABILITY_CARD.contains("cmd"));
        assert!(CAPABILITY_CARD.contains("executor"));
        assert!(CAPABILITY_CARD.contains("codex"));
        assert!(CAPABILITY_CARD.contains("git diff --name-only"));
        assert!(CAPABILITY_CARD.contains("no git add/commit/push"));
    }
}
