//! Wire types of the Airplane.dev REST API.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An environment as returned by `GET /v0/envs/get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Env {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(rename = "teamID")]
    pub team_id: String,
    #[serde(default)]
    pub default: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

/// The kind of value a task parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Boolean,
    Upload,
    Integer,
    Float,
    Date,
    Datetime,
    #[serde(rename = "configvar")]
    ConfigVar,
}

impl ParameterType {
    /// Every accepted type, in the order they are documented.
    pub const ALL: [ParameterType; 8] = [
        Self::String,
        Self::Boolean,
        Self::Upload,
        Self::Integer,
        Self::Float,
        Self::Date,
        Self::Datetime,
        Self::ConfigVar,
    ];

    /// The API name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Upload => "upload",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::ConfigVar => "configvar",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the [`ParameterType`] names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported parameter type {0:?}")]
pub struct UnknownParameterType(pub String);

impl FromStr for ParameterType {
    type Err = UnknownParameterType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownParameterType(s.to_string()))
    }
}

/// Validation constraints on a parameter value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub regex: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<serde_json::Value>,
}

/// A typed task input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub desc: String,
    /// UI component hint such as `editor-sql` or `textarea`; empty for the
    /// type's default widget.
    #[serde(default)]
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub constraints: Constraints,
}

/// A config variable attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigAttachment {
    pub name_tag: String,
}

/// An environment variable value, either literal or sourced from a config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

/// Body of `POST /v0/tasks/create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    pub command: Vec<String>,
    pub arguments: Vec<String>,
    pub parameters: Vec<Parameter>,
    pub configs: Vec<ConfigAttachment>,
    pub constraints: HashMap<String, String>,
    #[serde(rename = "env")]
    pub env_vars: HashMap<String, EnvVarValue>,
    pub resource_requests: HashMap<String, String>,
    pub resources: HashMap<String, String>,
    pub kind: String,
    pub kind_options: HashMap<String, serde_json::Value>,
    pub runtime: String,
    pub repo: String,
    pub timeout: i64,
    pub env_slug: String,
}

/// Response of `POST /v0/tasks/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    #[serde(rename = "taskID")]
    pub task_id: String,
    #[serde(rename = "taskRevisionID")]
    pub task_revision_id: String,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}
