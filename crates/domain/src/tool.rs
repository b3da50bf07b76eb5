use serde::{Deserialize, Serialize};

/// A single tool invocation requested by the model (provider-agnostic).
///
/// `identifier` names the tool/plugin, `api_name` the API inside it.
/// `arguments` is the raw JSON string the model produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub id: String,
    pub identifier: String,
    pub api_name: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default = "d_tool_type")]
    #[serde(rename = "type")]
    pub tool_type: String,
}

fn d_tool_type() -> String {
    "default".into()
}

impl ToolCallPayload {
    pub fn new(
        id: impl Into<String>,
        identifier: impl Into<String>,
        api_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            identifier: identifier.into(),
            api_name: api_name.into(),
            arguments: arguments.into(),
            tool_type: d_tool_type(),
        }
    }

    /// `identifier/apiName`, the key used by approval allow-lists.
    pub fn tool_key(&self) -> String {
        format!("{}/{}", self.identifier, self.api_name)
    }

    /// Parse `arguments` as JSON; invalid or empty input yields an empty
    /// object.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        if self.arguments.trim().is_empty() {
            return serde_json::json!({});
        }
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Whether a tool call must pause for explicit human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanIntervention {
    Never,
    #[serde(alias = "required")]
    Require,
    /// Older manifests spell `require` as `always`.
    Always,
}

impl HumanIntervention {
    pub fn requires_approval(self) -> bool {
        matches!(self, Self::Require | Self::Always)
    }
}

/// One API exposed by a tool manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolApi {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_intervention: Option<HumanIntervention>,
}

/// Manifest describing a tool/plugin and its intervention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolManifest {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_intervention: Option<HumanIntervention>,
    #[serde(default)]
    pub api: Vec<ToolApi>,
}

impl ToolManifest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            human_intervention: None,
            api: Vec::new(),
        }
    }

    pub fn with_intervention(mut self, policy: HumanIntervention) -> Self {
        self.human_intervention = Some(policy);
        self
    }

    pub fn with_api(mut self, name: impl Into<String>, policy: Option<HumanIntervention>) -> Self {
        self.api.push(ToolApi {
            name: name.into(),
            description: None,
            human_intervention: policy,
        });
        self
    }

    /// Effective policy for one API: the API-level entry wins over the
    /// tool-level one.
    pub fn intervention_for(&self, api_name: &str) -> Option<HumanIntervention> {
        self.api
            .iter()
            .find(|a| a.name == api_name)
            .and_then(|a| a.human_intervention)
            .or(self.human_intervention)
    }
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}
