//! Baseline data - the mandatory prerequisite of every dossier run

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::registry::BASELINE_TOOL;
use super::{Tool, ToolError, ToolResult};
use crate::cache::TtlCache;
use crate::dispatch::dispatch;
use crate::prompts::{PromptContext, PromptLoader};

/// The fixture a baseline is fetched for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRequest {
    pub match_id: String,
    pub sport_key: String,
    pub team_a: String,
    pub team_b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_date: Option<String>,
}

impl BaselineRequest {
    /// Read the request out of tool params, naming every missing field
    pub fn from_params(params: &Value) -> Result<Self, ToolError> {
        let field = |name: &str| {
            params
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let required = ["match_id", "sport_key", "team_a", "team_b"];
        let missing: Vec<&'static str> = required.into_iter().filter(|name| field(*name).is_none()).collect();
        if !missing.is_empty() {
            return Err(ToolError::MissingParameters(missing));
        }

        Ok(Self {
            match_id: field("match_id").unwrap_or_default(),
            sport_key: field("sport_key").unwrap_or_default(),
            team_a: field("team_a").unwrap_or_default(),
            team_b: field("team_b").unwrap_or_default(),
            match_date: field("match_date"),
        })
    }

    pub fn cache_key(&self) -> String {
        format!("dossier_baseline__{}__{}", self.match_id, self.sport_key)
    }
}

/// Where raw baseline fields come from
#[async_trait]
pub trait BaselineSource: Send + Sync {
    async fn fetch(&self, request: &BaselineRequest) -> Result<Map<String, Value>, ToolError>;
}

/// Fetches, defaults and caches baseline data for a fixture
pub struct BaselineDataTool {
    source: Arc<dyn BaselineSource>,
    cache: Arc<TtlCache<Value>>,
    ttl: Duration,
}

impl BaselineDataTool {
    pub fn new(source: Arc<dyn BaselineSource>, cache: Arc<TtlCache<Value>>, ttl: Duration) -> Self {
        debug!(?ttl, "BaselineDataTool::new: called");
        Self { source, cache, ttl }
    }

    async fn build(&self, request: &BaselineRequest) -> Result<Value, ToolError> {
        debug!(match_id = %request.match_id, "BaselineDataTool::build: called");
        let raw = self.source.fetch(request).await?;
        Ok(Value::Object(apply_defaults(raw, request)))
    }
}

/// Fill the fields every stage relies on, recording which ones were defaulted
fn apply_defaults(mut data: Map<String, Value>, request: &BaselineRequest) -> Map<String, Value> {
    let defaults = [
        ("team_a_name_official", request.team_a.as_str()),
        ("team_b_name_official", request.team_b.as_str()),
        ("match_date", "TBD"),
        ("odds_data_summary", "N/A"),
        ("key_news_summary_info", "No news available"),
    ];

    let mut defaulted = Vec::new();
    for (field, default) in defaults {
        let present = match data.get(field) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !present {
            data.insert(field.to_string(), Value::String(default.to_string()));
            defaulted.push(field);
        }
    }

    if !defaulted.is_empty() {
        debug!(?defaulted, "apply_defaults: filled missing fields");
        data.insert(
            "warning".to_string(),
            Value::String(format!("Defaulted fields: {}", defaulted.join(", "))),
        );
    }
    data
}

#[async_trait]
impl Tool for BaselineDataTool {
    fn name(&self) -> &'static str {
        BASELINE_TOOL
    }

    fn description(&self) -> &'static str {
        "Fetches the baseline facts (teams, date, news, market view) for a fixture"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "match_id": {"type": "string"},
                "sport_key": {"type": "string"},
                "team_a": {"type": "string"},
                "team_b": {"type": "string"},
                "match_date": {"type": "string"}
            },
            "required": ["match_id", "sport_key", "team_a", "team_b"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let request = match BaselineRequest::from_params(&params) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "BaselineDataTool::execute: rejected params");
                return ToolResult::error(e.to_string());
            }
        };
        debug!(match_id = %request.match_id, sport_key = %request.sport_key, "BaselineDataTool::execute: called");

        match self
            .cache
            .try_get_or_compute(&request.cache_key(), self.ttl, || self.build(&request))
            .await
        {
            Ok(data) => ToolResult::success(data),
            Err(e) => {
                warn!(match_id = %request.match_id, error = %e, "BaselineDataTool::execute: fetch failed");
                ToolResult::error(e.to_string())
            }
        }
    }
}

/// Display name for a sport key, e.g. `soccer_epl` -> `Premier League (EPL)`
pub fn sport_display(sport_key: &str) -> String {
    let known = match sport_key {
        "soccer_epl" => Some("Premier League (EPL)"),
        "soccer_uefa_champs_league" => Some("UEFA Champions League"),
        "soccer_italy_serie_a" => Some("Serie A - Italy"),
        "soccer_spain_la_liga" => Some("La Liga - Spain"),
        "soccer_germany_bundesliga" => Some("Bundesliga - Germany"),
        "soccer_france_ligue_one" => Some("Ligue 1 - France"),
        "soccer_usa_mls" => Some("MLS - USA"),
        "soccer_netherlands_eredivisie" => Some("Eredivisie"),
        "basketball_nba" => Some("NBA"),
        "basketball_wnba" => Some("WNBA"),
        "baseball_mlb" => Some("MLB"),
        "americanfootball_nfl" => Some("NFL"),
        "americanfootball_ncaaf" => Some("NCAAF"),
        "icehockey_nhl" => Some("NHL"),
        "cricket_ipl" => Some("Cricket - IPL"),
        "aussierules_afl" => Some("AFL"),
        _ => None,
    };
    if let Some(name) = known {
        return name.to_string();
    }

    sport_key
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Baseline built from two research lookups run side by side
pub struct ResearchBaselineSource {
    research: Arc<dyn Tool>,
    prompts: Arc<PromptLoader>,
    concurrency: usize,
}

impl ResearchBaselineSource {
    pub fn new(research: Arc<dyn Tool>, prompts: Arc<PromptLoader>, concurrency: usize) -> Self {
        Self {
            research,
            prompts,
            concurrency,
        }
    }

    fn queries(&self, request: &BaselineRequest) -> Result<Vec<(&'static str, String)>, ToolError> {
        let ctx = PromptContext {
            sport_key: Some(sport_display(&request.sport_key)),
            match_date: request.match_date.clone(),
            ..PromptContext::teams(&request.team_a, &request.team_b)
        };

        let mut queries = Vec::new();
        for (field, template) in [
            ("key_news_summary_info", "news-summary-query"),
            ("current_so_prediction_info", "prediction-query"),
        ] {
            let query = self
                .prompts
                .render(template, &ctx)
                .map_err(|e| ToolError::InvalidArgument(format!("cannot render {}: {}", template, e)))?;
            queries.push((field, query.trim().to_string()));
        }
        Ok(queries)
    }
}

#[async_trait]
impl BaselineSource for ResearchBaselineSource {
    async fn fetch(&self, request: &BaselineRequest) -> Result<Map<String, Value>, ToolError> {
        debug!(match_id = %request.match_id, "ResearchBaselineSource::fetch: called");
        let queries = self.queries(request)?;

        let research = &self.research;
        let results = dispatch(
            queries,
            |(_, query)| async move { research.execute(json!({ "query_string": query })).await.into_result() },
            self.concurrency,
        )
        .await
        .map_err(|e| ToolError::InvalidArgument(e.to_string()))?;

        let date = request.match_date.clone().unwrap_or_else(|| "TBD".to_string());
        let mut data = Map::new();
        data.insert(
            "match_title".to_string(),
            Value::String(format!(
                "{} vs. {} ({} - {})",
                request.team_a,
                request.team_b,
                sport_display(&request.sport_key),
                date
            )),
        );
        data.insert("match_id".to_string(), Value::String(request.match_id.clone()));
        data.insert("sport_key".to_string(), Value::String(request.sport_key.clone()));
        data.insert("team_a_name_official".to_string(), Value::String(request.team_a.clone()));
        data.insert("team_b_name_official".to_string(), Value::String(request.team_b.clone()));
        if let Some(match_date) = &request.match_date {
            data.insert("match_date".to_string(), Value::String(match_date.clone()));
        }

        let mut errors = Vec::new();
        for result in results {
            let (field, _) = result.item;
            match result.outcome {
                Ok(value) => {
                    data.insert(field.to_string(), value);
                }
                Err(e) => {
                    warn!(field, error = %e, "ResearchBaselineSource::fetch: lookup failed");
                    errors.push(format!("{}: {}", field, e));
                }
            }
        }

        if errors.len() == 2 {
            return Err(ToolError::Upstream(format!("all baseline lookups failed ({})", errors.join("; "))));
        }
        if !errors.is_empty() {
            data.insert("research_errors".to_string(), json!(errors));
        }

        info!(match_id = %request.match_id, fields = data.len(), "ResearchBaselineSource::fetch: baseline assembled");
        Ok(data)
    }
}
