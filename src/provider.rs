//! The Airplane.dev provider: configuration and dispatch to the task
//! resource and the environment data source.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{AirplaneApi, ApiClient};
use crate::config::{self, ProviderConfigModel};
use crate::environment::{EnvironmentDataSource, ENVIRONMENT_DATA_SOURCE};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::task::{TaskResource, TASK_RESOURCE};
use crate::types::PlanResult;

/// Type name of the provider; every resource type is prefixed with it.
pub const PROVIDER_TYPE_NAME: &str = "airplanedev";

/// Registry address the provider is published under.
pub const REGISTRY_ADDRESS: &str = "registry.terraform.io/freimer/airplanedev";

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Serves the `airplanedev` provider.
///
/// The API client is created by `configure` and shared by every resource
/// and data source afterwards.
pub struct AirplaneProvider {
    client: RwLock<Option<Arc<dyn AirplaneApi>>>,
    env: EnvLookup,
}

impl AirplaneProvider {
    /// A provider reading its defaults from the process environment.
    pub fn new() -> Self {
        Self::with_env(|name| std::env::var(name).ok())
    }

    /// A provider reading its defaults through `lookup`.
    pub fn with_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            client: RwLock::new(None),
            env: Box::new(lookup),
        }
    }

    /// A provider that is already configured with `client`.
    pub fn with_client(client: Arc<dyn AirplaneApi>) -> Self {
        let provider = Self::new();
        Self {
            client: RwLock::new(Some(client)),
            ..provider
        }
    }

    async fn client(&self) -> Result<Arc<dyn AirplaneApi>, ProviderError> {
        self.client.read().await.clone().ok_or_else(|| {
            ProviderError::NotConfigured(
                "the Airplane.dev API client is created by ConfigureProvider".to_string(),
            )
        })
    }

    async fn task(&self, resource_type: &str) -> Result<TaskResource, ProviderError> {
        if resource_type != TASK_RESOURCE {
            return Err(ProviderError::UnknownResource(resource_type.to_string()));
        }
        Ok(TaskResource::new(self.client().await?))
    }
}

impl Default for AirplaneProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AirplaneProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirplaneProvider").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ProviderService for AirplaneProvider {
    fn type_name(&self) -> &str {
        PROVIDER_TYPE_NAME
    }

    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(config::provider_schema())
            .with_resource(TASK_RESOURCE, TaskResource::schema())
            .with_data_source(ENVIRONMENT_DATA_SOURCE, EnvironmentDataSource::schema())
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let model = ProviderConfigModel::from_config(&config)?;

        let settings = match config::resolve(&model, &*self.env) {
            Ok(settings) => settings,
            Err(diagnostics) => {
                warn!(problems = diagnostics.len(), "Provider configuration rejected");
                return Ok(diagnostics);
            }
        };

        let client = match ApiClient::new(&settings) {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "Unable to build API client");
                return Ok(vec![Diagnostic::error("Unable to Create Airplane.dev API Client")
                    .with_detail(format!(
                        "An unexpected error occurred when creating the Airplane.dev API client: {}",
                        err
                    ))]);
            }
        };

        info!(
            base = client.base(),
            team_id = %settings.team_id,
            "Configured Airplane.dev client"
        );
        *self.client.write().await = Some(Arc::new(client));
        Ok(vec![])
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match resource_type {
            TASK_RESOURCE => Ok(TaskResource::validate(&config)),
            other => Err(ProviderError::UnknownResource(other.to_string())),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        match resource_type {
            TASK_RESOURCE => TaskResource::plan(prior_state, proposed_state),
            other => Err(ProviderError::UnknownResource(other.to_string())),
        }
    }

    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.task(resource_type).await?.create(planned_state).await
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.task(resource_type).await?.read(current_state).await
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.task(resource_type)
            .await?
            .update(prior_state, planned_state)
            .await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.task(resource_type).await?.delete(current_state).await
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        if data_source_type != ENVIRONMENT_DATA_SOURCE {
            return Err(ProviderError::UnknownResource(data_source_type.to_string()));
        }
        debug!(data_source = data_source_type, "Reading data source");
        EnvironmentDataSource::new(self.client().await?).read(config).await
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        debug!("Dropping Airplane.dev client");
        self.client.write().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, API_KEY_HEADER, TEAM_ID_HEADER};
    use crate::config::{API_KEY_ENV, HOST_ENV, TEAM_ID_ENV};
    use crate::models::{CreateTaskRequest, CreateTaskResponse, Env};
    use crate::testing::{
        assert_error_contains, assert_error_on_attribute, assert_plan_changes_attribute,
        assert_plan_creates, ProviderTester, TestError,
    };
    use crate::value::UNKNOWN_VALUE;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn env_vars(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    struct StaticApi;

    #[async_trait::async_trait]
    impl AirplaneApi for StaticApi {
        async fn get_env(&self, slug: &str) -> Result<Env, ApiError> {
            Ok(Env {
                id: "env-static".to_string(),
                slug: slug.to_string(),
                name: "Static".to_string(),
                team_id: "team".to_string(),
                default: false,
                created_at: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
                created_by: None,
                updated_at: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
                updated_by: None,
                is_archived: false,
                archived_at: None,
            })
        }

        async fn create_task(
            &self,
            request: &CreateTaskRequest,
        ) -> Result<CreateTaskResponse, ApiError> {
            Ok(CreateTaskResponse {
                task_id: format!("tsk-{}", request.slug),
                task_revision_id: "rev-1".to_string(),
            })
        }
    }

    fn task_config() -> Value {
        json!({
            "slug": "hello",
            "name": "Hello",
            "description": null,
            "command": ["echo"],
            "arguments": ["hi"],
            "parameters": [
                {"slug": "who", "name": "Who", "type": "string", "desc": null, "component": null}
            ]
        })
    }

    #[test]
    fn test_metadata() {
        let tester = ProviderTester::new(AirplaneProvider::with_env(env_vars(&[])));
        assert_eq!(tester.provider().type_name(), PROVIDER_TYPE_NAME);
        assert_eq!(tester.resource_types(), vec![TASK_RESOURCE]);
        assert_eq!(tester.data_source_types(), vec![ENVIRONMENT_DATA_SOURCE]);
        assert!(tester.schema().provider.block.attributes["api_key"].flags.sensitive);
    }

    #[tokio::test]
    async fn test_operations_require_configuration() {
        let tester = ProviderTester::new(AirplaneProvider::with_env(env_vars(&[])));

        let err = tester.create(TASK_RESOURCE, task_config()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));

        let err = tester
            .read_data_source(ENVIRONMENT_DATA_SOURCE, json!({"slug": "prod"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_plan_does_not_need_client() {
        let tester = ProviderTester::new(AirplaneProvider::with_env(env_vars(&[])));
        let plan = tester.plan_create(TASK_RESOURCE, task_config()).await.unwrap();

        assert_plan_creates(&plan);
        assert_eq!(plan.planned_state["id"], json!(UNKNOWN_VALUE));
    }

    #[tokio::test]
    async fn test_unknown_types() {
        let tester = ProviderTester::new(AirplaneProvider::with_client(Arc::new(StaticApi)));

        assert!(matches!(
            tester.create("airplanedev_widget", json!({})).await,
            Err(ProviderError::UnknownResource(_))
        ));
        assert!(matches!(
            tester.read_data_source("airplanedev_widget", json!({})).await,
            Err(ProviderError::UnknownResource(_))
        ));
        assert!(matches!(
            tester.plan_create("airplanedev_widget", json!({})).await,
            Err(ProviderError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn test_configure_reports_missing_credentials() {
        let tester = ProviderTester::new(AirplaneProvider::with_env(env_vars(&[])));

        let err = tester.configure(json!({"host": null})).await.unwrap_err();
        let diagnostics = err.diagnostics();
        assert_error_on_attribute(&diagnostics, "api_key");
        assert_error_on_attribute(&diagnostics, "team_id");

        assert!(matches!(
            tester.read_data_source(ENVIRONMENT_DATA_SOURCE, json!({"slug": "prod"})).await,
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_configure_rejects_unknown_values() {
        let tester = ProviderTester::new(AirplaneProvider::with_env(env_vars(&[
            (API_KEY_ENV, "k"),
            (TEAM_ID_ENV, "t"),
        ])));

        let err = tester
            .configure(json!({"api_key": UNKNOWN_VALUE}))
            .await
            .unwrap_err();
        assert_error_contains(&err.diagnostics(), "Unknown Airplane.dev API Key");
    }

    #[tokio::test]
    async fn test_failed_configure_keeps_previous_client() {
        let tester = ProviderTester::new(AirplaneProvider::with_client(Arc::new(StaticApi)));

        let err = assert_err!(tester.configure(json!({"api_key": "", "team_id": ""})).await);
        assert!(matches!(err, TestError::Diagnostics(_)));

        let state = tester
            .read_data_source(ENVIRONMENT_DATA_SOURCE, json!({"slug": "prod"}))
            .await
            .unwrap();
        assert_eq!(state["id"], json!("env-static"));
    }

    #[tokio::test]
    async fn test_validate_task_parameter_type() {
        let tester = ProviderTester::new(AirplaneProvider::with_env(env_vars(&[])));
        let mut config = task_config();
        config["parameters"][0]["type"] = json!("number");

        let err = tester
            .validate_resource_config(TASK_RESOURCE, config)
            .await
            .unwrap_err();
        assert_error_on_attribute(&err.diagnostics(), "parameters.0.type");

        assert_ok!(tester.validate_resource_config(TASK_RESOURCE, task_config()).await);
    }

    #[tokio::test]
    async fn test_update_keeps_remote_task_untouched() {
        let tester = ProviderTester::new(AirplaneProvider::with_client(Arc::new(StaticApi)));
        let prior = tester.lifecycle_create(TASK_RESOURCE, task_config()).await.unwrap();

        let mut proposed = task_config();
        proposed["name"] = json!("Hello again");
        let plan = tester
            .plan_update(TASK_RESOURCE, prior.clone(), proposed)
            .await
            .unwrap();
        assert_plan_changes_attribute(&plan, "name");
        assert_eq!(plan.planned_state["id"], json!("tsk-hello"));

        let state = tester
            .update(TASK_RESOURCE, prior.clone(), plan.planned_state)
            .await
            .unwrap();
        assert_eq!(state, prior);
    }

    #[tokio::test]
    async fn test_schema_validation_of_config_documents() {
        let tester = ProviderTester::new(AirplaneProvider::with_env(env_vars(&[])));

        assert_ok!(tester.validate_provider_config(json!({"host": null})).await);
        let err = assert_err!(tester.validate_provider_config(json!({"host": 1})).await);
        assert_error_on_attribute(&err.diagnostics(), "host");

        let err = assert_err!(
            tester
                .validate_data_source_config(ENVIRONMENT_DATA_SOURCE, json!({}))
                .await
        );
        assert_error_on_attribute(&err.diagnostics(), "slug");
    }

    #[tokio::test]
    async fn test_stop_drops_client() {
        let tester = ProviderTester::new(AirplaneProvider::with_client(Arc::new(StaticApi)));
        tester.stop().await.unwrap();

        assert!(matches!(
            tester.read_data_source(ENVIRONMENT_DATA_SOURCE, json!({"slug": "prod"})).await,
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_against_mock_api() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v0/envs/get"))
            .and(query_param("slug", "prod"))
            .and(header(API_KEY_HEADER, "cfg-key"))
            .and(header(TEAM_ID_HEADER, "env-team"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "env123",
                "slug": "prod",
                "name": "Production",
                "teamID": "env-team",
                "default": true,
                "createdAt": "2022-01-02T03:04:05Z",
                "createdBy": "usr1",
                "updatedAt": "2022-01-02T03:04:05Z",
                "updatedBy": "usr1",
                "isArchived": false,
                "archivedAt": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v0/tasks/create"))
            .and(header(API_KEY_HEADER, "cfg-key"))
            .and(body_partial_json(json!({
                "slug": "hello",
                "command": ["echo"],
                "arguments": ["hi"],
                "parameters": [{"slug": "who", "type": "string"}]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"taskID": "tsk123", "taskRevisionID": "rev456"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        // Host comes from the environment, the key from configuration.
        let uri = server.uri();
        let tester = ProviderTester::new(AirplaneProvider::with_env(env_vars(&[
            (HOST_ENV, uri.as_str()),
            (API_KEY_ENV, "env-key"),
            (TEAM_ID_ENV, "env-team"),
        ])));
        tester
            .configure(json!({"host": null, "api_key": "cfg-key", "team_id": null}))
            .await
            .unwrap();

        let env = tester
            .read_data_source(ENVIRONMENT_DATA_SOURCE, json!({"slug": "prod"}))
            .await
            .unwrap();
        assert_eq!(env["id"], json!("env123"));
        assert_eq!(env["team_id"], json!("env-team"));
        assert_eq!(env["archived_at"], Value::Null);

        let state = tester
            .lifecycle_create(TASK_RESOURCE, task_config())
            .await
            .unwrap();
        assert_eq!(state["id"], json!("tsk123"));
        assert_eq!(state["revision"], json!("rev456"));
        assert_ne!(state["last_updated"], json!(UNKNOWN_VALUE));

        tester.lifecycle_delete(TASK_RESOURCE, state).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_failure_becomes_operation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/envs/get"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "env not found"})),
            )
            .mount(&server)
            .await;

        let tester = ProviderTester::new(AirplaneProvider::with_env(env_vars(&[])));
        tester
            .configure(json!({"host": server.uri(), "api_key": "k", "team_id": "t"}))
            .await
            .unwrap();

        let err = tester
            .read_data_source(ENVIRONMENT_DATA_SOURCE, json!({"slug": "missing"}))
            .await
            .unwrap_err();
        let diag = err.to_diagnostic();
        assert_eq!(diag.summary, "Unable to Read Airplane.dev Environment");
        assert_eq!(diag.detail.as_deref(), Some("api: 404 Not Found: env not found"));
    }
}
