// src/score/model.rs
// External scoring model client. Chat-completions wire contract; the model
// answers with a JSON object that may arrive wrapped in a fenced code block.
// Every failure maps onto ModelError — the scorer decides what to do with it.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Settings;
use crate::error::ModelError;

const SYSTEM_PROMPT: &str = "You are a business intelligence analyst specializing in competitive analysis. \
Your task is to analyze website changes and determine their strategic business significance.\n\
\n\
Rate significance from 0-100 based on these criteria:\n\
- Pricing changes: 80-100 (direct impact on revenue/competition)\n\
- New product launches: 70-90 (market expansion)\n\
- Key personnel changes: 60-80 (leadership/strategic direction)\n\
- Messaging/branding shifts: 40-70 (market positioning)\n\
- Feature updates: 30-60 (product evolution)\n\
- Minor copy edits: 0-30 (no strategic impact)\n\
- Legal/disclaimers: 10-40 (compliance, rarely strategic)\n\
\n\
Provide your analysis in JSON format with these fields:\n\
- score: integer 0-100\n\
- category: one of [pricing, product, messaging, team, legal, other]\n\
- justification: brief explanation\n\
- recommended_action: what a competitor should do\n\
- summary: one-line summary of the change";

/// Structured request handed to the model path.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub target_name: String,
    pub old_excerpt: String,
    pub new_excerpt: String,
    pub edit_summary: String,
}

impl ModelRequest {
    fn render_user_prompt(&self) -> String {
        format!(
            "Company: {}\n\nOld content summary:\n{}...\n\nNew content summary:\n{}...\n\n\
             Detected changes:\n{}\n\nAnalyze the strategic significance of these changes.",
            self.target_name, self.old_excerpt, self.new_excerpt, self.edit_summary
        )
    }
}

/// Raw model answer. Missing fields fall back to neutral defaults rather
/// than failing the parse; a wholly unparsable body is MalformedResponse.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelAssessment {
    #[serde(default = "default_score")]
    pub score: i64,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub recommended_action: String,
    #[serde(default = "default_summary")]
    pub summary: String,
}

fn default_score() -> i64 {
    50
}
fn default_category() -> String {
    "other".to_string()
}
fn default_summary() -> String {
    "Website changes detected".to_string()
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn assess(&self, request: &ModelRequest) -> Result<ModelAssessment, ModelError>;
}

// ------------------------------------------------------------
// Chat-completions client
// ------------------------------------------------------------

pub struct ChatModelClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatModelClient {
    /// Returns None when no API key is configured; the scorer then runs
    /// fallback-only.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let api_key = settings.model_api_key.clone()?;
        let http = reqwest::Client::builder()
            .user_agent("sitewatch/0.1 (competitor monitoring bot)")
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.model_timeout)
            .build()
            .ok()?;
        Some(Self {
            http,
            endpoint: settings.model_endpoint.clone(),
            api_key,
            model: settings.model_name.clone(),
        })
    }
}

#[async_trait]
impl ModelClient for ChatModelClient {
    async fn assess(&self, request: &ModelRequest) -> Result<ModelAssessment, ModelError> {
        #[derive(serde::Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let user_prompt = request.render_user_prompt();
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: 0.0,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(ModelError::from_reqwest)?
            .error_for_status()
            .map_err(ModelError::from_reqwest)?;

        let body: Resp = resp.json().await.map_err(ModelError::from_reqwest)?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ModelError::MalformedResponse("empty choices".to_string()))?;

        parse_assessment(content)
    }
}

/// Decode the assessment, tolerating an optional markdown code fence around
/// the JSON object.
pub fn parse_assessment(content: &str) -> Result<ModelAssessment, ModelError> {
    let json = strip_code_fences(content);
    serde_json::from_str(json).map_err(|e| ModelError::MalformedResponse(e.to_string()))
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    for opener in ["```json", "```"] {
        if let Some(idx) = trimmed.find(opener) {
            let rest = &trimmed[idx + opener.len()..];
            let end = rest.find("```").unwrap_or(rest.len());
            return rest[..end].trim();
        }
    }
    trimmed
}
