//! Preference oracle backed by an OpenAI-compatible chat-completions endpoint
//!
//! The user's free-form guidance document is sent as system context; answers are
//! requested as JSON objects (`{"ids": [...]}` for items, `{"names": [...]}` for
//! subcategories). Transport and parse failures surface as errors, the engine
//! decides the fallback.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{OracleItem, PreferenceOracle};
use crate::infrastructure::config::OracleConfig;

const DEFAULT_GUIDANCE: &str = "Suggest items a typical household would find genuinely useful. \
Avoid replacement parts, accessories for devices the user may not own and novelty items.";

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
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppealAnswer {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubcategoryAnswer {
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Serialize)]
struct PromptItem<'a> {
    id: &'a str,
    name: &'a str,
}

pub struct OpenAiOracle {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    guidance: String,
}

impl OpenAiOracle {
    pub fn new(config: &OracleConfig, guidance: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create oracle HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            guidance: guidance.into(),
        })
    }

    /// Read the guidance document and the API key named by the configuration
    pub async fn from_config(config: &OracleConfig) -> Result<Self> {
        let guidance = match &config.guidance_path {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read guidance document {path:?}"))?,
            None => {
                warn!("No guidance document configured, using the built-in default");
                DEFAULT_GUIDANCE.to_string()
            }
        };
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("{} is not set; oracle requests go out unauthenticated", config.api_key_env);
        }
        Self::new(config, guidance, api_key)
    }

    async fn ask<T: DeserializeOwned>(&self, task: &str) -> Result<T> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": self.guidance },
                { "role": "user", "content": task },
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Oracle request to {} failed", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("Oracle returned {}: {}", status, detail.chars().take(200).collect::<String>()));
        }

        let chat: ChatResponse = response.json().await.context("Oracle response is not a chat completion")?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("Oracle response carries no message content"))?;
        debug!("Oracle answered: {}", content);
        parse_answer(&content)
    }
}

/// Parse a JSON answer, tolerating a surrounding markdown code fence
fn parse_answer<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim()).with_context(|| format!("Oracle answer is not the expected JSON: {content}"))
}

fn appeal_task(items: &[OracleItem]) -> Result<String> {
    let listed: Vec<PromptItem<'_>> = items
        .iter()
        .map(|item| PromptItem {
            id: item.id.as_str(),
            name: &item.name,
        })
        .collect();
    Ok(format!(
        "Which of these items match my preferences? Reply with a JSON object {{\"ids\": [...]}} \
         listing the ids of matching items only, or an empty list if none match.\n{}",
        serde_json::to_string(&listed)?
    ))
}

fn subcategory_task(category: &str, subcategories: &[String]) -> Result<String> {
    Ok(format!(
        "The category \"{}\" has these subcategories. Which are worth browsing given my preferences? \
         Reply with a JSON object {{\"names\": [...]}} using the names exactly as given, or an empty list.\n{}",
        category,
        serde_json::to_string(subcategories)?
    ))
}

#[async_trait]
impl PreferenceOracle for OpenAiOracle {
    async fn classify_appeal(&self, items: &[OracleItem]) -> Result<Vec<String>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let answer: AppealAnswer = self.ask(&appeal_task(items)?).await?;
        Ok(answer.ids)
    }

    async fn filter_subcategories(&self, category: &str, subcategories: &[String]) -> Result<Vec<String>> {
        if subcategories.is_empty() {
            return Ok(Vec::new());
        }
        let answer: SubcategoryAnswer = self.ask(&subcategory_task(category, subcategories)?).await?;
        Ok(answer.names)
    }
}
