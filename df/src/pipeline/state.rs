//! PlanState - the record threaded through every stage of one run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use super::stage::StageId;

/// Label used in the log and final error for the baseline prerequisite
pub const PREREQUISITE_STAGE: &str = "stage_1_baseline_data";

/// Label used when the request itself is unusable
pub const REQUEST_STAGE: &str = "request";

/// Caller-supplied request parameters, fixed once the run starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInput {
    pub match_id: String,
    pub sport_key: String,
    #[serde(default)]
    pub team_a: String,
    #[serde(default)]
    pub team_b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_date: Option<String>,
}

impl PipelineInput {
    /// Read whatever string fields the request carries; validation is separate
    pub fn from_request(request: &Value) -> Self {
        let field = |name: &str| {
            request
                .get(name)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        let match_date = Some(field("match_date")).filter(|d| !d.is_empty());

        Self {
            match_id: field("match_id"),
            sport_key: field("sport_key"),
            team_a: field("team_a"),
            team_b: field("team_b"),
            match_date,
        }
    }

    /// Fields a run cannot start without
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.match_id.is_empty() {
            missing.push("match_id");
        }
        if self.sport_key.is_empty() {
            missing.push("sport_key");
        }
        missing
    }

    /// Parameters for the baseline data tool
    pub fn baseline_params(&self) -> Value {
        let mut params = json!({
            "match_id": self.match_id,
            "sport_key": self.sport_key,
            "team_a": self.team_a,
            "team_b": self.team_b,
        });
        if let Some(date) = &self.match_date {
            params["match_date"] = Value::String(date.clone());
        }
        params
    }
}

/// One generated research question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchQuestion {
    pub question: String,
    pub query: String,
}

impl ResearchQuestion {
    /// Accepts `{question, perplexity_query_to_run | query}` objects or bare strings
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self {
                question: s.trim().to_string(),
                query: s.trim().to_string(),
            }),
            Value::Object(map) => {
                let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::trim).unwrap_or_default();
                let question = text("question");
                let query = Some(text("perplexity_query_to_run"))
                    .filter(|q| !q.is_empty())
                    .unwrap_or_else(|| text("query"));
                if question.is_empty() && query.is_empty() {
                    return None;
                }
                Some(Self {
                    question: if question.is_empty() { query } else { question }.to_string(),
                    query: query.to_string(),
                })
            }
            _ => None,
        }
    }
}

/// What one research question turned up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchFinding {
    pub question: String,
    pub query_used: String,
    pub finding_text: String,
}

/// Intermediate artifacts, one typed slot each
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DerivedContext {
    pub baseline: Option<Value>,
    pub analysis: Option<String>,
    pub research_questions: Vec<ResearchQuestion>,
    pub findings: Vec<ResearchFinding>,
    pub narrative: Option<Value>,
    pub hidden_gems: Vec<Value>,
    pub alternative_perspectives: Vec<Value>,
}

impl DerivedContext {
    /// A string field of the baseline, if present
    pub fn baseline_str(&self, field: &str) -> Option<&str> {
        self.baseline
            .as_ref()
            .and_then(|b| b.get(field))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One execution log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// What a run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FinalArtifact {
    Error { error: String, stage: String },
    Dossier(Value),
}

/// The shared record of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanState {
    pub run_id: String,
    pub input: PipelineInput,
    pub context: DerivedContext,
    pub execution_log: Vec<LogEntry>,
    pub final_artifact: Option<FinalArtifact>,
    #[serde(default)]
    pub from_cache: bool,
    /// Stage currently executing, if any
    #[serde(skip)]
    pub current_stage: Option<StageId>,
}

impl PlanState {
    pub fn new(input: PipelineInput) -> Self {
        let run_id = Uuid::now_v7().to_string();
        debug!(%run_id, match_id = %input.match_id, "PlanState::new: called");
        Self {
            run_id,
            input,
            context: DerivedContext::default(),
            execution_log: Vec::new(),
            final_artifact: None,
            from_cache: false,
            current_stage: None,
        }
    }

    /// Append an execution log entry
    pub fn log(&mut self, severity: Severity, stage: impl Into<String>, message: impl Into<String>) {
        self.execution_log.push(LogEntry {
            severity,
            stage: stage.into(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Record a fatal error as the final artifact
    pub fn fail(&mut self, stage: impl Into<String>, error: impl Into<String>) {
        self.final_artifact = Some(FinalArtifact::Error {
            error: error.into(),
            stage: stage.into(),
        });
    }

    pub fn is_error(&self) -> bool {
        matches!(self.final_artifact, Some(FinalArtifact::Error { .. }))
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.final_artifact {
            Some(FinalArtifact::Error { error, .. }) => Some(error),
            _ => None,
        }
    }

    pub fn dossier(&self) -> Option<&Value> {
        match &self.final_artifact {
            Some(FinalArtifact::Dossier(value)) => Some(value),
            _ => None,
        }
    }

    /// Log entries recording a stage attempt
    pub fn attempts(&self) -> impl Iterator<Item = &LogEntry> {
        self.execution_log.iter().filter(|e| e.message.starts_with("Attempting"))
    }

    /// Official team names, falling back to the request
    pub fn team_names(&self) -> (String, String) {
        let pick = |official: &str, given: &str, fallback: &str| {
            self.context
                .baseline_str(official)
                .map(str::to_string)
                .or_else(|| Some(given.to_string()).filter(|s| !s.is_empty()))
                .unwrap_or_else(|| fallback.to_string())
        };
        (
            pick("team_a_name_official", &self.input.team_a, "Team A"),
            pick("team_b_name_official", &self.input.team_b, "Team B"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> PipelineInput {
        PipelineInput::from_request(&json!({
            "match_id": "m1",
            "sport_key": "soccer_epl",
            "team_a": "Arsenal",
            "team_b": "Chelsea"
        }))
    }

    #[test]
    fn test_input_from_request() {
        let input = input();
        assert!(input.missing_fields().is_empty());
        assert_eq!(input.match_date, None);
        assert_eq!(input.baseline_params()["team_b"], "Chelsea");
        assert!(input.baseline_params().get("match_date").is_none());

        let bad = PipelineInput::from_request(&json!({"match_id": "  ", "sport_key": 3}));
        assert_eq!(bad.missing_fields(), vec!["match_id", "sport_key"]);
    }

    #[test]
    fn test_research_question_shapes() {
        let full = ResearchQuestion::from_value(&json!({
            "question": "Is Saka fit?",
            "perplexity_query_to_run": "Bukayo Saka injury update"
        }))
        .unwrap();
        assert_eq!(full.query, "Bukayo Saka injury update");

        let short = ResearchQuestion::from_value(&json!({"question": "Who starts?", "query": "Arsenal lineup"})).unwrap();
        assert_eq!(short.query, "Arsenal lineup");

        let bare = ResearchQuestion::from_value(&json!("Chelsea away form")).unwrap();
        assert_eq!(bare.question, bare.query);

        assert!(ResearchQuestion::from_value(&json!(42)).is_none());
        assert!(ResearchQuestion::from_value(&json!({"other": "x"})).is_none());
    }

    #[test]
    fn test_context_rejects_unknown_fields() {
        let ok: Result<DerivedContext, _> = serde_json::from_value(json!({"analysis": "text"}));
        assert!(ok.is_ok());

        let bad: Result<DerivedContext, _> = serde_json::from_value(json!({"analysis": "text", "odds": 2.1}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_fail_serializes_error_shape() {
        let mut state = PlanState::new(input());
        state.fail("stage_3_news_synthesis", "model refused");

        assert!(state.is_error());
        assert_eq!(state.error_message(), Some("model refused"));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json["final_artifact"],
            json!({"error": "model refused", "stage": "stage_3_news_synthesis"})
        );
    }

    #[test]
    fn test_team_names_prefer_official() {
        let mut state = PlanState::new(input());
        assert_eq!(state.team_names(), ("Arsenal".to_string(), "Chelsea".to_string()));

        state.context.baseline = Some(json!({"team_a_name_official": "Arsenal FC"}));
        assert_eq!(state.team_names(), ("Arsenal FC".to_string(), "Chelsea".to_string()));
    }

    #[test]
    fn test_attempts_counts_only_attempt_entries() {
        let mut state = PlanState::new(input());
        state.log(Severity::Info, "a", "Attempting a");
        state.log(Severity::Info, "a", "Completed");
        state.log(Severity::Error, "b", "Attempting b");
        assert_eq!(state.attempts().count(), 2);
    }
}
