//! Prompt Loader
//!
//! Loads prompt templates from an override directory or falls back to embedded defaults.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Variables available to stage templates
///
/// Unset fields are omitted, so templates can test them with `{{#if}}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_a: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_b: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sport_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_date: Option<String>,
    /// Pretty-printed baseline JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news: Option<String>,
    /// Pretty-printed research finding JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    /// Pretty-printed aggregate context JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl PromptContext {
    /// Context naming the two sides of a fixture
    pub fn teams(team_a: impl Into<String>, team_b: impl Into<String>) -> Self {
        Self {
            team_a: Some(team_a.into()),
            team_b: Some(team_b.into()),
            ..Default::default()
        }
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.analysis = Some(analysis.into());
        self
    }

    pub fn with_narrative(mut self, narrative: impl Into<String>) -> Self {
        self.narrative = Some(narrative.into());
        self
    }
}

/// Loads and renders prompt templates
///
/// Built once from configuration and shared; there is no global prompt store.
pub struct PromptLoader {
    /// Handlebars template engine, HTML escaping disabled
    hbs: Handlebars<'static>,
    /// Override directory searched before the embedded defaults
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a loader that searches `override_dir` first
    pub fn new(override_dir: Option<impl AsRef<Path>>) -> Self {
        let override_dir = override_dir.map(|d| d.as_ref().to_path_buf());
        debug!(?override_dir, "PromptLoader::new: called");

        let override_dir = match override_dir {
            Some(dir) if dir.is_dir() => Some(dir),
            Some(dir) => {
                debug!(?dir, "PromptLoader::new: override directory missing, using embedded prompts");
                None
            }
            None => None,
        };

        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        Self { hbs, override_dir }
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Self {
        Self::new(None::<PathBuf>)
    }

    /// Load a template by name: override directory, then embedded fallback
    pub fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(ref dir) = self.override_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: found override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render(&self, template_name: &str, context: &impl Serialize) -> Result<String> {
        debug!(%template_name, "PromptLoader::render: called");
        let template = self.load_template(template_name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }
}
