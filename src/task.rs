//! The `airplanedev_task` resource.
//!
//! Tasks are create-only: read, update and delete leave both the remote task
//! and the stored state untouched.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::api::AirplaneApi;
use crate::error::ProviderError;
use crate::models::{Constraints, CreateTaskRequest, Parameter, ParameterType};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};
use crate::types::{AttributeChange, PlanResult};
use crate::validation;
use crate::value::{is_unknown_json, AttrValue, UNKNOWN_VALUE};

/// Type name of the resource.
pub const TASK_RESOURCE: &str = "airplanedev_task";

/// Layout of `last_updated`: RFC 850, always in UTC.
pub const LAST_UPDATED_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S UTC";

const USER_ATTRIBUTES: [&str; 6] = [
    "slug",
    "name",
    "description",
    "command",
    "arguments",
    "parameters",
];

const COMPUTED_ATTRIBUTES: [&str; 3] = ["id", "revision", "last_updated"];

/// A task as stored in plan and state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskModel {
    #[serde(default)]
    pub id: AttrValue<String>,
    #[serde(default)]
    pub revision: AttrValue<String>,
    #[serde(default)]
    pub last_updated: AttrValue<String>,
    #[serde(default)]
    pub slug: AttrValue<String>,
    #[serde(default)]
    pub name: AttrValue<String>,
    #[serde(default)]
    pub description: AttrValue<String>,
    #[serde(default)]
    pub command: AttrValue<Vec<String>>,
    #[serde(default)]
    pub arguments: AttrValue<Vec<String>>,
    #[serde(default)]
    pub parameters: AttrValue<Vec<ParameterModel>>,
}

/// One entry of a task's `parameters` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterModel {
    #[serde(default)]
    pub slug: AttrValue<String>,
    #[serde(default)]
    pub name: AttrValue<String>,
    #[serde(default, rename = "type")]
    pub kind: AttrValue<String>,
    #[serde(default)]
    pub desc: AttrValue<String>,
    #[serde(default)]
    pub component: AttrValue<String>,
}

impl ParameterModel {
    /// Convert to the API representation. Constraints are always empty.
    pub fn to_api(&self) -> Result<Parameter, ProviderError> {
        let kind = self
            .kind
            .value_or_default()
            .parse::<ParameterType>()
            .map_err(|err| ProviderError::Validation(err.to_string()))?;

        Ok(Parameter {
            name: self.name.value_or_default(),
            slug: self.slug.value_or_default(),
            kind,
            desc: self.desc.value_or_default(),
            component: self.component.value_or_default(),
            default: None,
            constraints: Constraints::default(),
        })
    }
}

impl TaskModel {
    /// Build the create request for this task.
    pub fn to_create_request(&self) -> Result<CreateTaskRequest, ProviderError> {
        let parameters = self
            .parameters
            .value_or_default()
            .iter()
            .enumerate()
            .map(|(i, param)| {
                param.to_api().map_err(|err| match err {
                    ProviderError::Validation(msg) => {
                        ProviderError::Validation(format!("parameters.{}.type: {}", i, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CreateTaskRequest {
            slug: self.slug.value_or_default(),
            name: self.name.value_or_default(),
            description: self.description.value_or_default(),
            image: Some(String::new()),
            command: self.command.value_or_default(),
            arguments: self.arguments.value_or_default(),
            parameters,
            ..Default::default()
        })
    }
}

/// Creates tasks through the API.
pub struct TaskResource {
    client: Arc<dyn AirplaneApi>,
}

impl TaskResource {
    pub fn new(client: Arc<dyn AirplaneApi>) -> Self {
        Self { client }
    }

    pub fn schema() -> Schema {
        let parameter = Block::new()
            .with_attribute("slug", Attribute::required_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "type",
                Attribute::required_string()
                    .with_description(format!("One of: {}.", parameter_types())),
            )
            .with_attribute("desc", Attribute::optional_string())
            .with_attribute(
                "component",
                Attribute::optional_string()
                    .with_description("UI component, e.g. editor-sql or textarea."),
            );

        Schema::v0()
            .with_description("An Airplane.dev task.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("revision", Attribute::computed_string())
            .with_attribute("last_updated", Attribute::computed_string())
            .with_attribute("slug", Attribute::required_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute("command", Attribute::required_string_list())
            .with_attribute("arguments", Attribute::required_string_list())
            .with_block("parameters", NestedBlock::list(parameter).required())
    }

    /// Schema validation plus a check that every known parameter type is one
    /// of [`ParameterType::ALL`].
    pub fn validate(config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validation::validate(&Self::schema(), config);

        let Some(parameters) = config.get("parameters").and_then(Value::as_array) else {
            return diagnostics;
        };
        for (i, param) in parameters.iter().enumerate() {
            let Some(kind) = param.get("type").and_then(Value::as_str) else {
                continue;
            };
            if is_unknown_json(&param["type"]) {
                continue;
            }
            if let Err(err) = kind.parse::<ParameterType>() {
                diagnostics.push(
                    Diagnostic::error("Invalid parameter type")
                        .with_detail(format!("{}; expected one of {}", err, parameter_types()))
                        .with_attribute(format!("parameters.{}.type", i)),
                );
            }
        }
        diagnostics
    }

    /// Plan a create, in-place update or destroy.
    pub fn plan(
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        if proposed_state.is_null() {
            return Ok(PlanResult::no_change(Value::Null));
        }
        let Value::Object(proposed) = proposed_state else {
            return Err(ProviderError::InvalidRequest(
                "proposed state must be an object".to_string(),
            ));
        };

        match prior_state.filter(|prior| !prior.is_null()) {
            None => {
                let mut planned = proposed.clone();
                for name in COMPUTED_ATTRIBUTES {
                    planned.insert(name.to_string(), Value::String(UNKNOWN_VALUE.to_string()));
                }
                let changes = USER_ATTRIBUTES
                    .iter()
                    .filter_map(|name| match proposed.get(*name) {
                        Some(value) if !value.is_null() => {
                            Some(AttributeChange::added(*name, value.clone()))
                        }
                        _ => None,
                    })
                    .collect();
                Ok(PlanResult::with_changes(Value::Object(planned), changes, false))
            }
            Some(prior) => {
                let mut planned = proposed.clone();
                for name in COMPUTED_ATTRIBUTES {
                    let carried = prior.get(name).cloned().unwrap_or(Value::Null);
                    planned.insert(name.to_string(), carried);
                }
                let changes: Vec<_> = USER_ATTRIBUTES
                    .iter()
                    .filter_map(|name| diff(&prior, &proposed, name))
                    .collect();
                Ok(PlanResult::with_changes(Value::Object(planned), changes, false))
            }
        }
    }

    /// Create the task and record its id, revision and creation time.
    pub async fn create(&self, planned_state: Value) -> Result<Value, ProviderError> {
        let mut task: TaskModel = serde_json::from_value(planned_state)?;
        let request = task.to_create_request()?;

        debug!(slug = %request.slug, parameters = request.parameters.len(), "Creating task");
        let created = self.client.create_task(&request).await.map_err(|err| {
            warn!(slug = %request.slug, error = %err, "Task creation failed");
            ProviderError::operation(
                "Error creating task",
                format!("Could not create task, unexpected error: {}", err),
            )
        })?;
        info!(task_id = %created.task_id, revision = %created.task_revision_id, "Task created");

        task.id = AttrValue::Known(created.task_id);
        task.revision = AttrValue::Known(created.task_revision_id);
        task.last_updated = AttrValue::Known(Utc::now().format(LAST_UPDATED_FORMAT).to_string());

        Ok(serde_json::to_value(task)?)
    }

    /// Tasks are not refreshed; the stored state is returned unchanged.
    pub async fn read(&self, current_state: Value) -> Result<Value, ProviderError> {
        Ok(current_state)
    }

    /// Tasks are not updated remotely; the prior state is kept.
    pub async fn update(
        &self,
        prior_state: Value,
        _planned_state: Value,
    ) -> Result<Value, ProviderError> {
        Ok(prior_state)
    }

    /// Tasks are not deleted remotely.
    pub async fn delete(&self, _current_state: Value) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn parameter_types() -> String {
    ParameterType::ALL.map(|kind| kind.as_str()).join(", ")
}

fn diff(prior: &Value, proposed: &Map<String, Value>, name: &str) -> Option<AttributeChange> {
    let before = prior.get(name).filter(|v| !v.is_null());
    let after = proposed.get(name).filter(|v| !v.is_null());
    if before == after {
        return None;
    }
    Some(AttributeChange::new(name, before.cloned(), after.cloned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::models::{CreateTaskResponse, Env};
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        requests: Mutex<Vec<CreateTaskRequest>>,
        fail_with: Option<&'static str>,
    }

    #[async_trait]
    impl AirplaneApi for RecordingApi {
        async fn get_env(&self, _slug: &str) -> Result<Env, ApiError> {
            unreachable!("task resource never reads environments")
        }

        async fn create_task(
            &self,
            request: &CreateTaskRequest,
        ) -> Result<CreateTaskResponse, ApiError> {
            self.requests.lock().unwrap().push(request.clone());
            match self.fail_with {
                Some(message) => Err(ApiError::Status {
                    status: StatusCode::BAD_REQUEST,
                    message: message.to_string(),
                }),
                None => Ok(CreateTaskResponse {
                    task_id: "tsk123".to_string(),
                    task_revision_id: "tkr456".to_string(),
                }),
            }
        }
    }

    fn task_config() -> Value {
        json!({
            "slug": "hello_world",
            "name": "Hello World",
            "description": "Says hello",
            "command": ["python", "main.py"],
            "arguments": ["{{params.user}}"],
            "parameters": [
                {"slug": "user", "name": "User", "type": "string", "desc": "Who to greet", "component": null},
                {"slug": "query", "name": "Query", "type": "string", "desc": null, "component": "editor-sql"},
                {"slug": "count", "name": "Count", "type": "integer", "desc": null, "component": null}
            ]
        })
    }

    fn planned_state() -> Value {
        let mut state = task_config();
        for name in COMPUTED_ATTRIBUTES {
            state[name] = json!(UNKNOWN_VALUE);
        }
        state
    }

    #[tokio::test]
    async fn test_create_sends_converted_parameters() {
        let api = Arc::new(RecordingApi::default());
        let resource = TaskResource::new(api.clone());

        let state = resource.create(planned_state()).await.unwrap();

        let requests = api.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.slug, "hello_world");
        assert_eq!(request.image.as_deref(), Some(""));
        assert_eq!(request.command, vec!["python", "main.py"]);
        assert_eq!(request.arguments, vec!["{{params.user}}"]);
        assert!(request.configs.is_empty());
        assert!(request.env_vars.is_empty());
        assert_eq!(request.timeout, 0);
        assert_eq!(request.parameters.len(), 3);

        let query = &request.parameters[1];
        assert_eq!(query.slug, "query");
        assert_eq!(query.name, "Query");
        assert_eq!(query.kind, ParameterType::String);
        assert_eq!(query.desc, "");
        assert_eq!(query.component, "editor-sql");
        assert_eq!(query.constraints, Constraints::default());
        assert_eq!(request.parameters[0].desc, "Who to greet");
        assert_eq!(request.parameters[2].kind, ParameterType::Integer);

        assert_eq!(state["id"], json!("tsk123"));
        assert_eq!(state["revision"], json!("tkr456"));
        assert_eq!(state["slug"], json!("hello_world"));
        assert_eq!(state["parameters"][0]["component"], Value::Null);
    }

    #[tokio::test]
    async fn test_create_records_last_updated() {
        let resource = TaskResource::new(Arc::new(RecordingApi::default()));
        let state = resource.create(planned_state()).await.unwrap();

        let stamp = state["last_updated"].as_str().unwrap();
        assert!(stamp.ends_with(" UTC"));
        assert!(NaiveDateTime::parse_from_str(stamp, LAST_UPDATED_FORMAT).is_ok());
    }

    #[tokio::test]
    async fn test_create_failure() {
        let api = Arc::new(RecordingApi {
            fail_with: Some("slug already exists"),
            ..Default::default()
        });
        let resource = TaskResource::new(api);

        let err = resource.create(planned_state()).await.unwrap_err();
        let diag = err.to_diagnostic();
        assert_eq!(diag.summary, "Error creating task");
        assert_eq!(
            diag.detail.as_deref(),
            Some("Could not create task, unexpected error: api: 400 Bad Request: slug already exists")
        );
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_parameter_type() {
        let api = Arc::new(RecordingApi::default());
        let resource = TaskResource::new(api.clone());
        let mut state = planned_state();
        state["parameters"][2]["type"] = json!("number");

        let err = resource.create(state).await.unwrap_err();
        assert!(err.to_string().contains("parameters.2.type"));
        assert!(api.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_update_delete_are_no_ops() {
        let api = Arc::new(RecordingApi::default());
        let resource = TaskResource::new(api.clone());
        let state = json!({"id": "tsk123", "slug": "hello_world"});

        assert_eq!(resource.read(state.clone()).await.unwrap(), state);
        assert_eq!(
            resource
                .update(state.clone(), json!({"id": "tsk123", "slug": "renamed"}))
                .await
                .unwrap(),
            state
        );
        resource.delete(state).await.unwrap();
        assert!(api.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_plan_create() {
        let plan = TaskResource::plan(None, task_config()).unwrap();

        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["id"], json!(UNKNOWN_VALUE));
        assert_eq!(plan.planned_state["revision"], json!(UNKNOWN_VALUE));
        assert_eq!(plan.planned_state["last_updated"], json!(UNKNOWN_VALUE));
        let paths: Vec<_> = plan.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, USER_ATTRIBUTES.to_vec());
    }

    #[test]
    fn test_plan_update_carries_computed_attributes() {
        let mut prior = task_config();
        prior["id"] = json!("tsk123");
        prior["revision"] = json!("tkr456");
        prior["last_updated"] = json!("Monday, 02-Jan-06 15:04:05 UTC");

        let mut proposed = task_config();
        proposed["name"] = json!("Hello Again");

        let plan = TaskResource::plan(Some(prior), proposed).unwrap();
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["id"], json!("tsk123"));
        assert_eq!(plan.planned_state["revision"], json!("tkr456"));
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, "name");
        assert_eq!(plan.changes[0].before, Some(json!("Hello World")));
        assert_eq!(plan.changes[0].after, Some(json!("Hello Again")));
    }

    #[test]
    fn test_plan_destroy() {
        let plan = TaskResource::plan(Some(task_config()), Value::Null).unwrap();
        assert!(plan.planned_state.is_null());
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(TaskResource::validate(&task_config()).is_empty());

        let mut config = task_config();
        config["parameters"][1]["type"] = json!("sql");
        config["parameters"][2]["type"] = json!(UNKNOWN_VALUE);
        let diagnostics = TaskResource::validate(&config);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Invalid parameter type");
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("parameters.1.type"));

        let diagnostics = TaskResource::validate(&json!({"slug": "x", "name": "y"}));
        let mut missing: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        missing.sort_unstable();
        assert_eq!(missing, vec!["arguments", "command", "parameters"]);
    }
}
