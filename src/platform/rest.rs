use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::PlatformConfig;
use crate::error::{HiveError, HiveResult};
use crate::provider::retry_after_ms;
use crate::types::{ActionType, Bot, Stimulus, TargetRef};

use super::{PlatformAction, PlatformClient, PlatformOutcome};

/// Client for the document-style REST API (`GetDocuments`, `AddDocument`,
/// `UpdateDocument`), authenticated with a `token` query parameter.
pub struct RestPlatformClient {
    client: Client,
    base_url: String,
    token: String,
}

impl RestPlatformClient {
    pub fn new(config: &PlatformConfig) -> HiveResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Endpoint and JSON body for an action
    fn request_for(
        bot: &Bot,
        action: &PlatformAction,
        now: DateTime<Utc>,
    ) -> Option<(String, serde_json::Value)> {
        let name = &bot.username;
        match (action.action, &action.target) {
            (ActionType::Post, _) => Some((
                "AddDocument/Posts".into(),
                json!({
                    "Name": name,
                    "FullName": bot.full_name,
                    "Text": action.content.clone().unwrap_or_default(),
                    "OnDate": now.format("%Y-%m-%dT%H:%M:%S").to_string(),
                }),
            )),
            (ActionType::Like, TargetRef::Post(id)) => Some((
                format!("UpdateDocument/Posts/{id}"),
                json!({"Likes": ["Add", name]}),
            )),
            (ActionType::Comment, TargetRef::Post(id)) => {
                let comment = json!({
                    "Name": name,
                    "FullName": bot.full_name,
                    "Text": action.content.clone().unwrap_or_default(),
                    "OnDate": now.format("%m/%d/%Y").to_string(),
                });
                Some((
                    format!("UpdateDocument/Posts/{id}"),
                    json!({"Comments": ["Add", comment.to_string()]}),
                ))
            }
            (ActionType::Follow, TargetRef::User(user)) => Some((
                format!("UpdateDocument/Users/{name}"),
                json!({"Following": ["Add", user]}),
            )),
            (ActionType::Unfollow, TargetRef::User(user)) => Some((
                format!("UpdateDocument/Users/{name}"),
                json!({"Following": ["Remove", user]}),
            )),
            _ => None,
        }
    }

    async fn post_json(&self, endpoint: &str, body: &serde_json::Value) -> PlatformOutcome {
        let response = match self
            .client
            .post(self.url(endpoint))
            .query(&[("token", &self.token)])
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return PlatformOutcome::Transient(format!("request failed: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            let remote_id = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| extract_id(&v));
            return PlatformOutcome::Accepted { remote_id };
        }
        let retry_after = retry_after_ms(response.headers()).map(Duration::from_millis);
        let text = response.text().await.unwrap_or_default();
        classify(status, retry_after, text)
    }
}

fn extract_id(value: &serde_json::Value) -> Option<String> {
    ["docID", "id", "Id"].iter().find_map(|key| match value.get(*key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn classify(status: StatusCode, retry_after: Option<Duration>, body: String) -> PlatformOutcome {
    match status.as_u16() {
        429 => PlatformOutcome::RateLimited { retry_after },
        408 | 425 => PlatformOutcome::Transient(format!("{status}: {body}")),
        s if s >= 500 => PlatformOutcome::Transient(format!("{status}: {body}")),
        _ => PlatformOutcome::Permanent(format!("{status}: {body}")),
    }
}

/// Accepts the timestamp shapes the platform has been seen to emit
pub(crate) fn parse_platform_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%m/%d/%Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_post(value: &serde_json::Value) -> Option<Stimulus> {
    let post_id = extract_id(value)?;
    let doc = value.get("json").unwrap_or(value);
    let created_at = doc
        .get("OnDate")
        .and_then(|v| v.as_str())
        .and_then(parse_platform_date)?;
    Some(Stimulus {
        post_id,
        author: doc.get("Name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        text: doc.get("Text").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        created_at,
    })
}

#[async_trait]
impl PlatformClient for RestPlatformClient {
    async fn submit(&self, bot: &Bot, action: &PlatformAction) -> PlatformOutcome {
        let Some((endpoint, body)) = Self::request_for(bot, action, Utc::now()) else {
            return PlatformOutcome::Permanent(format!(
                "unsupported target {:?} for {}",
                action.target, action.action
            ));
        };
        debug!(bot = %bot.id, %endpoint, action = %action.action, "submitting");
        self.post_json(&endpoint, &body).await
    }

    async fn register(&self, bot: &Bot) -> PlatformOutcome {
        let body = json!({
            "Age": bot.age,
            "FullName": bot.full_name,
            "Gender": bot.gender,
            "IsBot": true,
            "Name": bot.username,
            "OnDate": bot.created_at.format("%m/%d/%Y").to_string(),
            "Prompt": bot.persona.system_prompt(),
            "Description": bot.bio,
            "Following": [],
        });
        self.post_json("AddDocument/Users", &body).await
    }

    async fn recent_posts(&self, limit: usize) -> HiveResult<Vec<Stimulus>> {
        let response = self
            .client
            .get(self.url("GetDocuments/Posts"))
            .query(&[("token", &self.token)])
            .send()
            .await
            .map_err(|e| HiveError::PlatformTransient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(match classify(status, None, body) {
                PlatformOutcome::RateLimited { .. } => HiveError::PlatformRateLimited {
                    retry_after_ms: retry_after,
                },
                PlatformOutcome::Permanent(msg) => HiveError::PlatformPermanent(msg),
                PlatformOutcome::Transient(msg) => {
                    HiveError::PlatformTransient(msg_or_status(msg, status))
                }
                PlatformOutcome::Accepted { .. } => HiveError::PlatformTransient(status.to_string()),
            });
        }

        let data: serde_json::Value = response.json().await?;
        let items = match data {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        let total = items.len();
        let mut posts: Vec<Stimulus> = items.iter().filter_map(parse_post).collect();
        if posts.len() < total {
            warn!(skipped = total - posts.len(), "posts without id or date ignored");
        }
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts.truncate(limit);
        Ok(posts)
    }
}

fn msg_or_status(msg: String, status: StatusCode) -> String {
    if msg.is_empty() {
        status.to_string()
    } else {
        msg
    }
}
