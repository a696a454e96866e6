use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// Registry package document (npm "packument"), reduced to the fields we read.
#[derive(Debug, Deserialize)]
pub struct Packument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,
    #[serde(default)]
    pub homepage: Option<String>,
    /// Either `"MIT"` or the legacy `{ "type": "MIT" }` form.
    #[serde(default)]
    pub license: Option<Value>,
    /// Either a URL string or `{ "type": "git", "url": ... }`.
    #[serde(default)]
    pub repository: Option<Value>,
    #[serde(default)]
    pub time: HashMap<String, String>,
    #[serde(default)]
    pub versions: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}
