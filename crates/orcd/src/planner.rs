//! Planner client: turns a free-text requirement into a validated plan via
//! an OpenAI-compatible chat-completions endpoint.
//!
//! The HTTP call sits behind the small [`Complete`] trait; everything above
//! it — prompt assembly, JSON extraction, validation, the single retry on
//! forbidden shell operators — is transport-agnostic and tested against a
//! fake.

use crate::store::RunStore;
use futures_util::future::BoxFuture;
use orc_core::plan::{parse_and_validate, Plan, PlanError};
use orc_core::prompt::{build_user_prompt, extract_json, OPERATOR_RETRY_REMINDER};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Sampling temperature for plan generation.
const PLANNER_TEMPERATURE: f32 = 0.2;

/// Name of the packaged system-prompt file.
pub const SYSTEM_PROMPT_FILENAME: &str = "planner_system.md";

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("OPENAI_API_KEY is not set")]
    AuthMissing,
    #[error("planner system prompt not found")]
    PromptMissing,
    #[error("planner returned empty output")]
    EmptyOutput,
    #[error("plan still contains forbidden shell operators after retry")]
    ForbiddenShellOperators,
    #[error("completion endpoint error: {0}")]
    Upstream(String),
    #[error("completion request failed: {0}")]
    Transport(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// The completion call, reduced to its essence.
pub trait Complete: Send + Sync {
    fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> impl std::future::Future<Output = Result<String, PlannerError>> + Send;
}

/// Object-safe front the rest of the daemon consumes.
pub trait PlanSource: Send + Sync {
    fn generate_plan<'a>(
        &'a self,
        requirement: &'a str,
    ) -> BoxFuture<'a, Result<Plan, PlannerError>>;
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiClient {
    /// Build a client from the environment. The API key is the only
    /// environment dependency of the whole daemon.
    pub fn from_env(base_url: &str, model: &str) -> Result<Self, PlannerError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(PlannerError::AuthMissing)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<MessageContent>,
}

/// Assistant content arrives either as a plain string or as an array of
/// text parts; both are accepted and concatenated in order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

impl MessageContent {
    fn flatten(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Parts(parts) => parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorBody {
    error: Option<UpstreamErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorDetail {
    message: String,
}

impl Complete for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, PlannerError> {
        let endpoint = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.model,
            "temperature": PLANNER_TEMPERATURE,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlannerError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PlannerError::Transport(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<UpstreamErrorBody>(&text)
                .ok()
                .and_then(|b| b.error)
                .map(|e| e.message);
            return Err(PlannerError::Upstream(
                detail.unwrap_or_else(|| format!("status {status}")),
            ));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| PlannerError::Transport(format!("response parse failed: {e}")))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(MessageContent::flatten)
            .unwrap_or_default())
    }
}

/// The planner proper: prompt assembly, extraction, validation, one retry.
pub struct Planner<C> {
    client: C,
    store: RunStore,
    allowed_commands: Vec<String>,
}

impl<C: Complete> Planner<C> {
    pub fn new(client: C, store: RunStore, allowed_commands: Vec<String>) -> Self {
        Self {
            client,
            store,
            allowed_commands,
        }
    }

    pub async fn generate_plan(&self, requirement: &str) -> Result<Plan, PlannerError> {
        let system_prompt = load_system_prompt()?;
        let summary = self.store.last_run_summary();
        let user_prompt = build_user_prompt(summary.as_deref(), requirement);

        match self.attempt(&system_prompt, &user_prompt).await {
            Err(PlannerError::ForbiddenShellOperators) => {
                warn!("plan contained forbidden shell operators; retrying once");
                let retry_prompt = format!("{user_prompt}\n\n{OPERATOR_RETRY_REMINDER}");
                self.attempt(&system_prompt, &retry_prompt).await
            }
            other => other,
        }
    }

    async fn attempt(&self, system_prompt: &str, user_prompt: &str) -> Result<Plan, PlannerError> {
        let content = self.client.complete(system_prompt, user_prompt).await?;
        if content.trim().is_empty() {
            return Err(PlannerError::EmptyOutput);
        }
        let json = extract_json(&content).ok_or_else(|| {
            PlannerError::Plan(PlanError::InvalidJson(
                "no JSON object found in planner output".to_string(),
            ))
        })?;
        let plan = parse_and_validate(&json, &self.allowed_commands)?;
        if plan.has_forbidden_operators() {
            return Err(PlannerError::ForbiddenShellOperators);
        }
        debug!(plan = %plan.name, steps = plan.steps.len(), "plan validated");
        Ok(plan)
    }
}

impl<C: Complete + 'static> PlanSource for Planner<C> {
    fn generate_plan<'a>(
        &'a self,
        requirement: &'a str,
    ) -> BoxFuture<'a, Result<Plan, PlannerError>> {
        Box::pin(Planner::generate_plan(self, requirement))
    }
}

/// Plan source that builds the HTTP client per call, so the daemon starts
/// without an API key and `generatePlan` fails lazily with the auth error.
pub struct EnvPlanner {
    base_url: String,
    model: String,
    store: RunStore,
    allowed_commands: Vec<String>,
}

impl EnvPlanner {
    pub fn new(
        base_url: String,
        model: String,
        store: RunStore,
        allowed_commands: Vec<String>,
    ) -> Self {
        Self {
            base_url,
            model,
            store,
            allowed_commands,
        }
    }
}

impl PlanSource for EnvPlanner {
    fn generate_plan<'a>(
        &'a self,
        requirement: &'a str,
    ) -> BoxFuture<'a, Result<Plan, PlannerError>> {
        Box::pin(async move {
            let client = OpenAiClient::from_env(&self.base_url, &self.model)?;
            Planner::new(client, self.store.clone(), self.allowed_commands.clone())
                .generate_plan(requirement)
                .await
        })
    }
}

/// Read the packaged system prompt.
///
/// Two search paths: next to the installed binary, then the source tree
/// (development runs).
fn load_system_prompt() -> Result<String, PlannerError> {
    for path in system_prompt_search_paths() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            if !content.trim().is_empty() {
                return Ok(content);
            }
        }
    }
    Err(PlannerError::PromptMissing)
}

fn system_prompt_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            paths.push(dir.join("prompts").join(SYSTEM_PROMPT_FILENAME));
        }
    }
    paths.push(
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("prompts")
            .join(SYSTEM_PROMPT_FILENAME),
    );
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Fake completion backend returning scripted responses in order.
    struct Scripted {
        responses: Mutex<VecDeque<Result<String, PlannerError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, PlannerError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Complete for Scripted {
        async fn complete(
            &self,
            _system_prompt: &str,
            user_prompt: &str,
        ) -> Result<String, PlannerError> {
            self.calls.lock().unwrap().push(user_prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted completion call")
        }
    }

    fn planner(responses: Vec<Result<String, PlannerError>>) -> (Planner<Scripted>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().to_path_buf());
        (
            Planner::new(Scripted::new(responses), store, vec!["git".to_string()]),
            dir,
        )
    }

    const GOOD_PLAN: &str =
        r#"{"name":"p","steps":[{"type":"note","message":"hi"},{"type":"cmd","command":"git status"}]}"#;

    #[tokio::test]
    async fn accepts_a_clean_plan() {
        let (planner, _dir) = planner(vec![Ok(GOOD_PLAN.to_string())]);
        let plan = planner.generate_plan("req").await.unwrap();
        assert_eq!(plan.name, "p");
    }

    #[tokio::test]
    async fn accepts_a_fenced_plan() {
        let (planner, _dir) = planner(vec![Ok(format!("Here you go:\n```json\n{GOOD_PLAN}\n```"))]);
        assert!(planner.generate_plan("req").await.is_ok());
    }

    #[tokio::test]
    async fn empty_output_is_its_own_error() {
        let (planner, _dir) = planner(vec![Ok("   \n".to_string())]);
        assert!(matches!(
            planner.generate_plan("req").await,
            Err(PlannerError::EmptyOutput)
        ));
    }

    #[tokio::test]
    async fn output_without_json_is_invalid_json() {
        let (planner, _dir) = planner(vec![Ok("I cannot help with that.".to_string())]);
        assert!(matches!(
            planner.generate_plan("req").await,
            Err(PlannerError::Plan(PlanError::InvalidJson(_)))
        ));
    }

    #[tokio::test]
    async fn forbidden_operators_trigger_one_retry_with_reminder() {
        let bad = r#"{"name":"p","steps":[{"type":"note","message":"n"},{"type":"cmd","command":"git status && git log"}]}"#;
        let (planner, _dir) = planner(vec![Ok(bad.to_string()), Ok(GOOD_PLAN.to_string())]);
        let plan = planner.generate_plan("req").await.unwrap();
        assert_eq!(plan.name, "p");

        let calls = planner.client.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].contains("Reminder:"));
        assert!(calls[1].contains("Reminder:"));
    }

    #[tokio::test]
    async fn second_forbidden_plan_fails_for_good() {
        let bad = r#"{"name":"p","steps":[{"type":"note","message":"n"},{"type":"cmd","command":"git log | head"}]}"#;
        let (planner, _dir) = planner(vec![Ok(bad.to_string()), Ok(bad.to_string())]);
        assert!(matches!(
            planner.generate_plan("req").await,
            Err(PlannerError::ForbiddenShellOperators)
        ));
    }

    #[tokio::test]
    async fn schema_violations_do_not_retry() {
        let (planner, _dir) = planner(vec![Ok(r#"{"name":"p"}"#.to_string())]);
        assert!(matches!(
            planner.generate_plan("req").await,
            Err(PlannerError::Plan(PlanError::Schema { .. }))
        ));
        assert_eq!(planner.client.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upstream_errors_pass_through() {
        let (planner, _dir) = planner(vec![Err(PlannerError::Upstream(
            "model overloaded".to_string(),
        ))]);
        match planner.generate_plan("req").await {
            Err(PlannerError::Upstream(msg)) => assert_eq!(msg, "model overloaded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn message_content_flattens_both_shapes() {
        let text: MessageContent = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text.flatten(), "hello");

        let parts: MessageContent = serde_json::from_str(
            r#"[{"type":"text","text":"hel"},{"type":"text","text":"lo"},{"type":"image"}]"#,
        )
        .unwrap();
        assert_eq!(parts.flatten(), "hello");
    }

    #[test]
    fn system_prompt_is_packaged_with_the_crate() {
        let content = load_system_prompt().unwrap();
        assert!(content.contains("plan"));
    }

    #[test]
    fn search_paths_cover_binary_and_source_locations() {
        let paths = system_prompt_search_paths();
        assert!(paths.len() >= 2);
        assert!(paths
            .iter()
            .all(|p| p.file_name().unwrap() == SYSTEM_PROMPT_FILENAME));
    }
}
