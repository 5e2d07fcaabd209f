//! Command policy: pure predicates over command strings.
//!
//! Everything here runs before a process is spawned. The checks are
//! deliberately dumb — prefix allowlist plus a substring denylist — because
//! commands are executed without a shell; the tokenizer below produces the
//! argv directly.

/// Shell operator sequences that are never allowed in a cmd step.
pub const FORBIDDEN_OPERATORS: [&str; 8] = ["||", "&&", "|", ">", "<", ";", "$(", "`"];

/// Default command-prefix allowlist: the VCS client only.
pub const DEFAULT_ALLOWED_COMMANDS: [&str; 1] = ["git"];

/// Default package-manager file basenames gated behind human approval.
pub const DEFAULT_DEPENDENCY_FILES: [&str; 4] = [
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
];

/// True if the command, after leading-whitespace trim, begins with an allowed
/// token followed by a word boundary.
pub fn is_command_allowed(command: &str, allowed: &[String]) -> bool {
    let trimmed = command.trim_start();
    allowed.iter().any(|token| {
        trimmed.strip_prefix(token.as_str()).is_some_and(|rest| {
            rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace())
        })
    })
}

/// True iff the raw command string contains any forbidden operator sequence.
pub fn has_forbidden_shell_operators(command: &str) -> bool {
    find_forbidden_operator(command).is_some()
}

/// The first forbidden operator found in the command, for error messages.
pub fn find_forbidden_operator(command: &str) -> Option<&'static str> {
    FORBIDDEN_OPERATORS.iter().find(|op| command.contains(**op)).copied()
}

/// Membership check for the executor-tool set.
///
/// The set is closed at the type level; this exists so the run executor can
/// guard the launch site the same way the validator guards the plan.
pub fn is_executor_tool_allowed(tool: crate::plan::ExecutorTool) -> bool {
    matches!(tool, crate::plan::ExecutorTool::Codex)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("empty command")]
    Empty,
    #[error("unterminated quote")]
    UnterminatedQuote,
}

/// POSIX-style argv splitter.
///
/// Single-quoted runs are literal; double-quoted runs honor `\"` and `\\`;
/// a backslash outside quotes escapes the next character. Whitespace outside
/// quotes separates tokens. An empty token list is an error.
pub fn tokenize(command: &str) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // Distinguishes "no token started" from "empty quoted token".
    let mut in_token = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err(TokenizeError::UnterminatedQuote),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc @ ('"' | '\\')) => current.push(esc),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(TokenizeError::UnterminatedQuote),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err(TokenizeError::UnterminatedQuote),
                    }
                }
            }
            '\\' => {
                in_token = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }

    if tokens.is_empty() {
        return Err(TokenizeError::Empty);
    }
    Ok(tokens)
}

/// Shell-style joiner: quotes arguments so that `tokenize` is a left inverse.
pub fn join(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() {
                "''".to_string()
            } else if arg
                .chars()
                .any(|c| c.is_whitespace() || c == '\'' || c == '"' || c == '\\')
            {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// True if the path's basename is exactly one of the dependency file names.
pub fn is_dependency_file(path: &str, dependency_files: &[String]) -> bool {
    let basename = path.rsplit(['/', '\\']).next().unwrap_or(path);
    dependency_files.iter().any(|f| f == basename)
}

/// Dependency-matching paths out of a changed-file list, sorted and
/// deduplicated.
pub fn dependency_changes(paths: &[String], dependency_files: &[String]) -> Vec<String> {
    let mut matched: Vec<String> = paths
        .iter()
        .filter(|p| is_dependency_file(p, dependency_files))
        .cloned()
        .collect();
    matched.sort();
    matched.dedup();
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["git".to_string()]
    }

    fn deps() -> Vec<String> {
        DEFAULT_DEPENDENCY_FILES.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn allows_commands_with_word_boundary() {
        assert!(is_command_allowed("git status", &allowed()));
        assert!(is_command_allowed("  git status", &allowed()));
        assert!(is_command_allowed("git", &allowed()));
        assert!(is_command_allowed("git\tstatus", &allowed()));
    }

    #[test]
    fn rejects_prefix_without_boundary_and_other_binaries() {
        assert!(!is_command_allowed("gitx status", &allowed()));
        assert!(!is_command_allowed("github-cli auth", &allowed()));
        assert!(!is_command_allowed("rm -rf /", &allowed()));
        assert!(!is_command_allowed("", &allowed()));
    }

    #[test]
    fn detects_each_forbidden_operator() {
        for op in FORBIDDEN_OPERATORS {
            let cmd = format!("git status {op} x");
            assert!(has_forbidden_shell_operators(&cmd), "missed operator {op}");
        }
        assert!(!has_forbidden_shell_operators("git log --oneline -5"));
    }

    #[test]
    fn double_pipe_and_single_pipe_both_match() {
        assert_eq!(find_forbidden_operator("git a || git b"), Some("||"));
        assert_eq!(find_forbidden_operator("git a | wc -l"), Some("|"));
    }

    #[test]
    fn tokenizes_plain_words() {
        assert_eq!(
            tokenize("git status --short").unwrap(),
            vec!["git", "status", "--short"]
        );
    }

    #[test]
    fn tokenizes_single_quotes_literally() {
        assert_eq!(
            tokenize(r#"git grep 'a "b" c'"#).unwrap(),
            vec!["git", "grep", r#"a "b" c"#]
        );
    }

    #[test]
    fn tokenizes_double_quotes_with_escapes() {
        assert_eq!(
            tokenize(r#"git grep "say \"hi\"""#).unwrap(),
            vec!["git", "grep", r#"say "hi""#]
        );
        assert_eq!(
            tokenize(r#"git grep "back\\slash""#).unwrap(),
            vec!["git", "grep", r"back\slash"]
        );
    }

    #[test]
    fn backslash_escapes_outside_quotes() {
        assert_eq!(
            tokenize(r"git grep a\ b").unwrap(),
            vec!["git", "grep", "a b"]
        );
    }

    #[test]
    fn empty_quoted_token_is_preserved() {
        assert_eq!(tokenize("git grep '' x").unwrap(), vec!["git", "grep", "", "x"]);
    }

    #[test]
    fn collapses_runs_of_whitespace_between_tokens() {
        assert_eq!(tokenize("git   status \t --short").unwrap(), vec!["git", "status", "--short"]);
    }

    #[test]
    fn empty_command_is_an_error() {
        assert_eq!(tokenize(""), Err(TokenizeError::Empty));
        assert_eq!(tokenize("   "), Err(TokenizeError::Empty));
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert_eq!(tokenize("git grep 'open"), Err(TokenizeError::UnterminatedQuote));
        assert_eq!(tokenize(r#"git grep "open"#), Err(TokenizeError::UnterminatedQuote));
    }

    #[test]
    fn tokenize_is_left_inverse_of_join() {
        let cases: Vec<Vec<String>> = vec![
            vec!["git".into(), "status".into()],
            vec!["git".into(), "grep".into(), "-n".into(), "Clear Logs".into()],
            vec!["git".into(), "grep".into(), "with'quote".into()],
            vec!["git".into(), "log".into(), String::new()],
            vec!["git".into(), "grep".into(), "tab\there".into()],
        ];
        for args in cases {
            let joined = join(&args);
            assert_eq!(tokenize(&joined).unwrap(), args, "joined: {joined}");
        }
    }

    #[test]
    fn dependency_match_is_basename_equality() {
        assert!(is_dependency_file("package.json", &deps()));
        assert!(is_dependency_file("apps/web/package.json", &deps()));
        assert!(is_dependency_file("pnpm-lock.yaml", &deps()));
        assert!(!is_dependency_file("package.json.bak", &deps()));
        assert!(!is_dependency_file("src/main.rs", &deps()));
        // Intentional: any directory containing a matching basename triggers.
        assert!(is_dependency_file("fixtures/sample/package.json", &deps()));
    }

    #[test]
    fn dependency_changes_are_sorted_and_deduplicated() {
        let paths = vec![
            "yarn.lock".to_string(),
            "src/app.ts".to_string(),
            "package.json".to_string(),
            "package.json".to_string(),
        ];
        assert_eq!(
            dependency_changes(&paths, &deps()),
            vec!["package.json".to_string(), "yarn.lock".to_string()]
        );
    }

    #[test]
    fn no_dependency_changes_yields_empty() {
        let paths = vec!["src/a.rs".to_string(), "README.md".to_string()];
        assert!(dependency_changes(&paths, &deps()).is_empty());
    }
}
