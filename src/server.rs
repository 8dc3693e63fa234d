//! Server helpers for running the provider.
//!
//! This module provides the `ProviderService` trait the provider implements,
//! the gRPC adapter that exposes it over the plugin protocol, and the `serve`
//! function that starts the server and prints the handshake.
//!
//! # Signal Handling
//!
//! The server handles OS signals (SIGTERM, SIGINT) for graceful shutdown.
//! When a signal is received, the server:
//! 1. Stops accepting new connections
//! 2. Waits for in-flight requests to complete (with configurable timeout)
//! 3. Calls the provider's `stop()` method
//! 4. Exits cleanly

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated::{self, DynamicValue};
use crate::schema::{has_errors, Block, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{
    handshake_line, PlanResult, ProviderMetadata, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE,
};
use crate::validation::validate;

/// Trait the provider implements.
///
/// This is a higher-level API than the raw gRPC trait: documents arrive as
/// `serde_json::Value`, failures are returned as [`ProviderError`] and turned
/// into diagnostics by the server.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// The provider's type name.
    fn type_name(&self) -> &str;

    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata. By default, this is derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.keys().cloned().collect();
        let mut data_sources: Vec<String> = schema.data_sources.keys().cloned().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            type_name: self.type_name().to_string(),
            resources,
            data_sources,
            capabilities: Default::default(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&self.schema().provider, &config))
    }

    /// Configure the provider. Returns diagnostics (errors and warnings).
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = self.schema();
        let resource = schema
            .resources
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))?;
        Ok(validate(resource, &config))
    }

    /// Plan changes for a resource. `prior_state` is `None` when creating and
    /// `proposed_state` is null when destroying.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Read the current state of a resource.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = self.schema();
        let data_source = schema
            .data_sources
            .get(data_source_type)
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))?;
        Ok(validate(data_source, &config))
    }

    /// Read data from an external source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        _config: Value,
    ) -> Result<Value, ProviderError> {
        Err(ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

/// Wrapper that implements the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

fn decode_dynamic(value: Option<DynamicValue>) -> Result<Value, ProviderError> {
    match value {
        Some(value) if !value.json.is_empty() => Ok(serde_json::from_slice(&value.json)?),
        _ => Ok(Value::Null),
    }
}

fn encode_dynamic(value: &Value) -> Result<Option<DynamicValue>, ProviderError> {
    Ok(Some(DynamicValue {
        json: serde_json::to_vec(value)?,
    }))
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<generated::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| generated::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => generated::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => generated::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_diagnostics(err: &ProviderError) -> Vec<generated::Diagnostic> {
    diagnostics_to_proto(vec![err.to_diagnostic()])
}

fn schema_to_proto(schema: &Schema) -> generated::Schema {
    generated::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &Block) -> generated::Block {
    let mut attributes: Vec<_> = block
        .attributes
        .iter()
        .map(|(name, attr)| generated::Attribute {
            name: name.clone(),
            r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
            description: attr.description.clone().unwrap_or_default(),
            required: attr.flags.required,
            optional: attr.flags.optional,
            computed: attr.flags.computed,
            sensitive: attr.flags.sensitive,
        })
        .collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut block_types: Vec<_> = block
        .blocks
        .iter()
        .map(|(name, nested)| generated::NestedBlock {
            type_name: name.clone(),
            block: Some(block_to_proto(&nested.block)),
            nesting: generated::nested_block::NestingMode::List as i32,
            min_items: i64::from(nested.min_items),
            max_items: i64::from(nested.max_items),
        })
        .collect();
    block_types.sort_by(|a, b| a.type_name.cmp(&b.type_name));

    generated::Block {
        attributes,
        block_types,
        description: block.description.clone().unwrap_or_default(),
    }
}

fn log_diagnostics(operation: &str, type_name: &str, diagnostics: &[Diagnostic]) {
    if has_errors(diagnostics) {
        warn!(type_name, diagnostics = diagnostics.len(), "{} completed with errors", operation);
    } else {
        info!(type_name, "{} completed successfully", operation);
    }
}

impl<P: ProviderService> ProviderGrpcService<P> {
    async fn plan_change(
        &self,
        req: generated::PlanResourceChangeRequest,
    ) -> Result<generated::PlanResourceChangeResponse, ProviderError> {
        let prior = decode_dynamic(req.prior_state)?;
        let prior = (!prior.is_null()).then_some(prior);
        let proposed = decode_dynamic(req.proposed_new_state)?;
        let config = decode_dynamic(req.config)?;

        let result = self
            .provider
            .plan(&req.type_name, prior, proposed, config)
            .await?;
        info!(
            type_name = %req.type_name,
            changes = result.changes.len(),
            requires_replace = result.requires_replace,
            "PlanResourceChange completed"
        );

        Ok(generated::PlanResourceChangeResponse {
            planned_state: encode_dynamic(&result.planned_state)?,
            changes: result.changes.into_iter().map(Into::into).collect(),
            requires_replace: result.requires_replace,
            diagnostics: vec![],
        })
    }

    async fn apply_change(
        &self,
        req: generated::ApplyResourceChangeRequest,
    ) -> Result<Value, ProviderError> {
        let prior = decode_dynamic(req.prior_state)?;
        let planned = decode_dynamic(req.planned_state)?;

        match (prior.is_null(), planned.is_null()) {
            (true, false) => {
                info!(type_name = %req.type_name, "Create called");
                self.provider.create(&req.type_name, planned).await
            }
            (false, false) => {
                info!(type_name = %req.type_name, "Update called");
                self.provider.update(&req.type_name, prior, planned).await
            }
            (false, true) => {
                info!(type_name = %req.type_name, "Delete called");
                self.provider.delete(&req.type_name, prior).await?;
                Ok(Value::Null)
            }
            (true, true) => Err(ProviderError::InvalidRequest(
                "prior and planned state are both null".to_string(),
            )),
        }
    }
}

#[tonic::async_trait]
impl<P: ProviderService> generated::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<generated::GetMetadataRequest>,
    ) -> Result<tonic::Response<generated::GetMetadataResponse>, tonic::Status> {
        debug!("GetMetadata called");
        let metadata = self.provider.metadata();
        info!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata completed"
        );
        Ok(tonic::Response::new(generated::GetMetadataResponse {
            server_capabilities: Some(generated::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            diagnostics: vec![],
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            type_name: metadata.type_name,
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.get_provider_schema")]
    async fn get_provider_schema(
        &self,
        _request: tonic::Request<generated::GetProviderSchemaRequest>,
    ) -> Result<tonic::Response<generated::GetProviderSchemaResponse>, tonic::Status> {
        debug!("GetProviderSchema called");
        let schema = self.provider.schema();
        let capabilities = self.provider.metadata().capabilities;
        info!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetProviderSchema completed"
        );
        Ok(tonic::Response::new(generated::GetProviderSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resource_schemas: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            data_source_schemas: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
            server_capabilities: Some(generated::ServerCapabilities {
                plan_destroy: capabilities.plan_destroy,
            }),
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<generated::ValidateProviderConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateProviderConfigResponse>, tonic::Status> {
        debug!("ValidateProviderConfig called");
        let req = request.into_inner();

        let result = match decode_dynamic(req.config) {
            Ok(config) => self.provider.validate_provider_config(config).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                log_diagnostics("ValidateProviderConfig", "", &diagnostics);
                diagnostics_to_proto(diagnostics)
            }
            Err(e) => {
                error!(error = %e, "ValidateProviderConfig failed");
                error_to_diagnostics(&e)
            }
        };
        Ok(tonic::Response::new(
            generated::ValidateProviderConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.configure_provider")]
    async fn configure_provider(
        &self,
        request: tonic::Request<generated::ConfigureProviderRequest>,
    ) -> Result<tonic::Response<generated::ConfigureProviderResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(terraform_version = %req.terraform_version, "ConfigureProvider called");

        let result = match decode_dynamic(req.config) {
            Ok(config) => self.provider.configure(config).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                log_diagnostics("ConfigureProvider", "", &diagnostics);
                diagnostics_to_proto(diagnostics)
            }
            Err(e) => {
                error!(error = %e, "ConfigureProvider failed");
                error_to_diagnostics(&e)
            }
        };
        Ok(tonic::Response::new(generated::ConfigureProviderResponse {
            diagnostics,
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.stop_provider")]
    async fn stop_provider(
        &self,
        _request: tonic::Request<generated::StopProviderRequest>,
    ) -> Result<tonic::Response<generated::StopProviderResponse>, tonic::Status> {
        info!("StopProvider called");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "StopProvider failed");
                e.to_string()
            }
        };
        Ok(tonic::Response::new(generated::StopProviderResponse { error }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<generated::ValidateResourceConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateResourceConfigResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ValidateResourceConfig called");

        let result = match decode_dynamic(req.config) {
            Ok(config) => {
                self.provider
                    .validate_resource_config(&req.type_name, config)
                    .await
            }
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                log_diagnostics("ValidateResourceConfig", &req.type_name, &diagnostics);
                diagnostics_to_proto(diagnostics)
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "ValidateResourceConfig failed");
                error_to_diagnostics(&e)
            }
        };
        Ok(tonic::Response::new(
            generated::ValidateResourceConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.read_resource")]
    async fn read_resource(
        &self,
        request: tonic::Request<generated::ReadResourceRequest>,
    ) -> Result<tonic::Response<generated::ReadResourceResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ReadResource called");

        let result = match decode_dynamic(req.current_state) {
            Ok(state) => self.provider.read(&req.type_name, state).await,
            Err(e) => Err(e),
        };
        let response = match result.and_then(|state| encode_dynamic(&state)) {
            Ok(new_state) => {
                debug!(type_name = %req.type_name, "ReadResource completed successfully");
                generated::ReadResourceResponse {
                    new_state,
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "ReadResource failed");
                generated::ReadResourceResponse {
                    new_state: None,
                    diagnostics: error_to_diagnostics(&e),
                }
            }
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.plan_resource_change")]
    async fn plan_resource_change(
        &self,
        request: tonic::Request<generated::PlanResourceChangeRequest>,
    ) -> Result<tonic::Response<generated::PlanResourceChangeResponse>, tonic::Status> {
        let req = request.into_inner();
        let type_name = req.type_name.clone();
        debug!(type_name = %type_name, "PlanResourceChange called");

        let response = match self.plan_change(req).await {
            Ok(response) => response,
            Err(e) => {
                error!(type_name = %type_name, error = %e, "PlanResourceChange failed");
                generated::PlanResourceChangeResponse {
                    diagnostics: error_to_diagnostics(&e),
                    ..Default::default()
                }
            }
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.apply_resource_change")]
    async fn apply_resource_change(
        &self,
        request: tonic::Request<generated::ApplyResourceChangeRequest>,
    ) -> Result<tonic::Response<generated::ApplyResourceChangeResponse>, tonic::Status> {
        let req = request.into_inner();
        let type_name = req.type_name.clone();

        let result = self.apply_change(req).await;
        let response = match result.and_then(|state| encode_dynamic(&state)) {
            Ok(new_state) => {
                info!(type_name = %type_name, "ApplyResourceChange completed successfully");
                generated::ApplyResourceChangeResponse {
                    new_state,
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(type_name = %type_name, error = %e, "ApplyResourceChange failed");
                generated::ApplyResourceChangeResponse {
                    new_state: None,
                    diagnostics: error_to_diagnostics(&e),
                }
            }
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip(self, request), name = "grpc.validate_data_resource_config")]
    async fn validate_data_resource_config(
        &self,
        request: tonic::Request<generated::ValidateDataResourceConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateDataResourceConfigResponse>, tonic::Status>
    {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ValidateDataResourceConfig called");

        let result = match decode_dynamic(req.config) {
            Ok(config) => {
                self.provider
                    .validate_data_source_config(&req.type_name, config)
                    .await
            }
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(diagnostics) => {
                log_diagnostics("ValidateDataResourceConfig", &req.type_name, &diagnostics);
                diagnostics_to_proto(diagnostics)
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "ValidateDataResourceConfig failed");
                error_to_diagnostics(&e)
            }
        };
        Ok(tonic::Response::new(
            generated::ValidateDataResourceConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: tonic::Request<generated::ReadDataSourceRequest>,
    ) -> Result<tonic::Response<generated::ReadDataSourceResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ReadDataSource called");

        let result = match decode_dynamic(req.config) {
            Ok(config) => self.provider.read_data_source(&req.type_name, config).await,
            Err(e) => Err(e),
        };
        let response = match result.and_then(|state| encode_dynamic(&state)) {
            Ok(state) => {
                info!(type_name = %req.type_name, "ReadDataSource completed successfully");
                generated::ReadDataSourceResponse {
                    state,
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(type_name = %req.type_name, error = %e, "ReadDataSource failed");
                generated::ReadDataSourceResponse {
                    state: None,
                    diagnostics: error_to_diagnostics(&e),
                }
            }
        };
        Ok(tonic::Response::new(response))
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Timeout for graceful shutdown. After receiving a shutdown signal,
    /// the server will wait this long for in-flight requests to complete.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Returns `true` if `value` is the cookie the host sets in
/// [`MAGIC_COOKIE_KEY`].
pub fn magic_cookie_matches(value: Option<&str>) -> bool {
    value == Some(MAGIC_COOKIE_VALUE)
}

/// Returns `true` if this process was launched by the host.
pub fn launched_by_host() -> bool {
    magic_cookie_matches(std::env::var(MAGIC_COOKIE_KEY).ok().as_deref())
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for CTRL+C, shutdown only on host request");
        std::future::pending::<()>().await;
    }
    info!("Received CTRL+C, initiating graceful shutdown");
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// On Unix, this waits for SIGTERM or SIGINT.
/// Elsewhere, this waits for CTRL+C.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                    _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

/// Serve a provider implementation as a gRPC server.
///
/// This function:
/// 1. Binds an available port on 127.0.0.1
/// 2. Outputs the handshake line to stdout
/// 3. Serves gRPC until a shutdown signal (SIGTERM/SIGINT)
///
/// The handshake format is: `1|6|tcp|<address>|grpc`
///
/// For custom configuration, use [`serve_with_options`].
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), ProviderError> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_on_listener(provider, listener, options, wait_for_shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` completes.
async fn serve_on_listener<P, F>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
    shutdown: F,
) -> Result<(), ProviderError>
where
    P: ProviderService,
    F: std::future::Future<Output = ()> + Send,
{
    let addr = listener.local_addr()?;
    println!("{}", handshake_line(&addr));

    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let provider_for_shutdown = Arc::clone(&provider);

    let grpc_service = ProviderGrpcService { provider };
    let service = generated::provider_server::ProviderServer::new(grpc_service);

    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async move {
                shutdown.await;
                let _ = signalled_tx.send(());
            },
        );
    tokio::pin!(server);

    // The timeout only starts once shutdown has been requested.
    tokio::select! {
        result = &mut server => result?,
        _ = signalled_rx => {
            match tokio::time::timeout(options.shutdown_timeout, &mut server).await {
                Ok(Ok(())) => info!("Server shutdown complete"),
                Ok(Err(e)) => {
                    error!(error = %e, "Server error during shutdown");
                    return Err(e.into());
                }
                Err(_) => warn!(
                    timeout = ?options.shutdown_timeout,
                    "Shutdown timeout exceeded, forcing shutdown"
                ),
            }
        }
    }

    debug!("Calling provider stop()");
    if let Err(e) = provider_for_shutdown.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_server::Provider;
    use crate::schema::Attribute;
    use crate::types::AttributeChange;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct EchoProvider {
        stopped: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ProviderService for EchoProvider {
        fn type_name(&self) -> &str {
            "echo"
        }

        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new()
                .with_provider_config(
                    Schema::v0().with_attribute("token", Attribute::optional_string().sensitive()),
                )
                .with_resource(
                    "echo_item",
                    Schema::v0()
                        .with_attribute("name", Attribute::required_string())
                        .with_attribute("id", Attribute::computed_string()),
                )
                .with_data_source(
                    "echo_lookup",
                    Schema::v0().with_attribute("name", Attribute::required_string()),
                )
        }

        async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            if config.get("token").is_some_and(Value::is_string) {
                Ok(vec![])
            } else {
                Ok(vec![Diagnostic::error("Missing token").with_attribute("token")])
            }
        }

        async fn stop(&self) -> Result<(), ProviderError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn plan(
            &self,
            _resource_type: &str,
            prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            match prior_state {
                None => Ok(PlanResult::with_changes(
                    proposed_state.clone(),
                    vec![AttributeChange::added("name", proposed_state["name"].clone())],
                    false,
                )),
                Some(_) => Ok(PlanResult::no_change(proposed_state)),
            }
        }

        async fn create(
            &self,
            _resource_type: &str,
            planned_state: Value,
        ) -> Result<Value, ProviderError> {
            let mut state = planned_state;
            state["id"] = json!("created");
            Ok(state)
        }

        async fn read(
            &self,
            _resource_type: &str,
            current_state: Value,
        ) -> Result<Value, ProviderError> {
            Ok(current_state)
        }

        async fn update(
            &self,
            _resource_type: &str,
            _prior_state: Value,
            planned_state: Value,
        ) -> Result<Value, ProviderError> {
            let mut state = planned_state;
            state["id"] = json!("updated");
            Ok(state)
        }

        async fn delete(
            &self,
            _resource_type: &str,
            _current_state: Value,
        ) -> Result<(), ProviderError> {
            Err(ProviderError::operation("Error deleting item", "locked"))
        }

        async fn read_data_source(
            &self,
            _data_source_type: &str,
            config: Value,
        ) -> Result<Value, ProviderError> {
            Ok(json!({"name": config["name"], "found": true}))
        }
    }

    fn service() -> ProviderGrpcService<EchoProvider> {
        ProviderGrpcService {
            provider: Arc::new(EchoProvider::default()),
        }
    }

    fn dynamic(value: Value) -> Option<DynamicValue> {
        Some(DynamicValue {
            json: serde_json::to_vec(&value).unwrap(),
        })
    }

    fn json_of(value: Option<DynamicValue>) -> Value {
        serde_json::from_slice(&value.unwrap().json).unwrap()
    }

    #[tokio::test]
    async fn test_get_metadata() {
        let response = service()
            .get_metadata(tonic::Request::new(generated::GetMetadataRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.type_name, "echo");
        assert_eq!(response.resources, vec!["echo_item"]);
        assert_eq!(response.data_sources, vec!["echo_lookup"]);
    }

    #[tokio::test]
    async fn test_get_provider_schema() {
        let response = service()
            .get_provider_schema(tonic::Request::new(generated::GetProviderSchemaRequest {}))
            .await
            .unwrap()
            .into_inner();

        let provider = response.provider.unwrap().block.unwrap();
        assert_eq!(provider.attributes.len(), 1);
        assert!(provider.attributes[0].sensitive);

        let item = response.resource_schemas["echo_item"].block.clone().unwrap();
        let names: Vec<_> = item.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(item.attributes[1].r#type, b"\"string\"".to_vec());
        assert!(response.data_source_schemas.contains_key("echo_lookup"));
    }

    #[tokio::test]
    async fn test_configure_returns_diagnostics() {
        let svc = service();
        let response = svc
            .configure_provider(tonic::Request::new(generated::ConfigureProviderRequest {
                terraform_version: "1.5.0".to_string(),
                config: dynamic(json!({})),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(response.diagnostics[0].summary, "Missing token");
        assert_eq!(response.diagnostics[0].attribute, "token");
        assert_eq!(
            response.diagnostics[0].severity,
            generated::diagnostic::Severity::Error as i32
        );

        let response = svc
            .configure_provider(tonic::Request::new(generated::ConfigureProviderRequest {
                terraform_version: "1.5.0".to_string(),
                config: dynamic(json!({"token": "t"})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_becomes_diagnostic() {
        let response = service()
            .validate_provider_config(tonic::Request::new(
                generated::ValidateProviderConfigRequest {
                    config: Some(DynamicValue {
                        json: b"{not json".to_vec(),
                    }),
                },
            ))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.diagnostics.len(), 1);
        assert!(response.diagnostics[0].summary.starts_with("Serialization error"));
    }

    #[tokio::test]
    async fn test_validate_resource_config_uses_schema() {
        let svc = service();
        let response = svc
            .validate_resource_config(tonic::Request::new(
                generated::ValidateResourceConfigRequest {
                    type_name: "echo_item".to_string(),
                    config: dynamic(json!({})),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(response.diagnostics[0].attribute, "name");

        let response = svc
            .validate_resource_config(tonic::Request::new(
                generated::ValidateResourceConfigRequest {
                    type_name: "echo_unknown".to_string(),
                    config: dynamic(json!({})),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(response.diagnostics[0].summary.contains("Unknown resource type"));
    }

    #[tokio::test]
    async fn test_plan_create() {
        let response = service()
            .plan_resource_change(tonic::Request::new(generated::PlanResourceChangeRequest {
                type_name: "echo_item".to_string(),
                prior_state: dynamic(Value::Null),
                proposed_new_state: dynamic(json!({"name": "a"})),
                config: dynamic(json!({"name": "a"})),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.diagnostics.is_empty());
        assert_eq!(json_of(response.planned_state), json!({"name": "a"}));
        let change: AttributeChange = response.changes[0].clone().into();
        assert_eq!(change, AttributeChange::added("name", json!("a")));
    }

    #[tokio::test]
    async fn test_apply_dispatch() {
        let svc = service();

        let created = svc
            .apply_resource_change(tonic::Request::new(generated::ApplyResourceChangeRequest {
                type_name: "echo_item".to_string(),
                prior_state: None,
                planned_state: dynamic(json!({"name": "a"})),
                config: dynamic(json!({"name": "a"})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(json_of(created.new_state)["id"], json!("created"));

        let updated = svc
            .apply_resource_change(tonic::Request::new(generated::ApplyResourceChangeRequest {
                type_name: "echo_item".to_string(),
                prior_state: dynamic(json!({"name": "a", "id": "created"})),
                planned_state: dynamic(json!({"name": "b", "id": "created"})),
                config: dynamic(json!({"name": "b"})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(json_of(updated.new_state)["id"], json!("updated"));

        let deleted = svc
            .apply_resource_change(tonic::Request::new(generated::ApplyResourceChangeRequest {
                type_name: "echo_item".to_string(),
                prior_state: dynamic(json!({"name": "b", "id": "updated"})),
                planned_state: dynamic(Value::Null),
                config: None,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(deleted.new_state.is_none());
        assert_eq!(deleted.diagnostics[0].summary, "Error deleting item");
        assert_eq!(deleted.diagnostics[0].detail, "locked");
    }

    #[tokio::test]
    async fn test_read_data_source() {
        let response = service()
            .read_data_source(tonic::Request::new(generated::ReadDataSourceRequest {
                type_name: "echo_lookup".to_string(),
                config: dynamic(json!({"name": "x"})),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.diagnostics.is_empty());
        assert_eq!(json_of(response.state), json!({"name": "x", "found": true}));
    }

    #[tokio::test]
    async fn test_stop_provider() {
        let svc = service();
        let response = svc
            .stop_provider(tonic::Request::new(generated::StopProviderRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert!(response.error.is_empty());
        assert!(svc.provider.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_magic_cookie() {
        assert!(magic_cookie_matches(Some(MAGIC_COOKIE_VALUE)));
        assert!(!magic_cookie_matches(Some("nope")));
        assert!(!magic_cookie_matches(None));
    }

    #[tokio::test]
    async fn test_serve_returns_after_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let provider = EchoProvider::default();

        serve_on_listener(
            provider,
            listener,
            ServeOptions::new().with_shutdown_timeout(Duration::from_secs(1)),
            async {},
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_serve_options() {
        let options = ServeOptions::default();
        assert_eq!(options.shutdown_timeout, Duration::from_secs(30));

        let options = ServeOptions::new().with_shutdown_timeout(Duration::from_secs(5));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
    }
}
