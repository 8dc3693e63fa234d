//! Airplane.dev provider plugin
//!
//! This crate implements an infrastructure-as-code provider plugin that lets
//! configurations look up [Airplane.dev](https://airplane.dev) environments
//! and create Airplane.dev tasks.
//!
//! # Overview
//!
//! - **`airplanedev` provider**: API host, key and team id, each defaulting to
//!   an environment variable
//! - **`airplanedev_environment` data source**: reads an environment by slug
//! - **`airplanedev_task` resource**: creates a task with its parameters
//!
//! The crate is layered the same way the plugin is served:
//!
//! - [`api`] talks to the Airplane.dev REST API
//! - [`task`] and [`environment`] map between documents and API calls
//! - [`provider`] configures the client and dispatches by type name
//! - [`server`] exposes a [`ProviderService`] over gRPC
//!
//! # Quick Start
//!
//! ```ignore
//! use terraform_provider_airplanedev::{init_logging, serve, AirplaneProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(AirplaneProvider::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When the plugin starts via [`serve`], it binds a loopback port and writes a
//! single line to stdout:
//!
//! ```text
//! 1|6|tcp|127.0.0.1:50051|grpc
//! ```
//!
//! Format: `<core version>|<protocol version>|tcp|<address>|grpc`
//!
//! # Provider Protocol
//!
//! - **GetMetadata**: Returns the type name and resource/data source names
//! - **GetProviderSchema**: Returns schemas for provider config, resources and data sources
//! - **ValidateProviderConfig**: Validates provider configuration
//! - **ConfigureProvider**: Builds the API client
//! - **StopProvider**: Gracefully shuts down the provider
//! - **ValidateResourceConfig**: Validates resource configuration
//! - **PlanResourceChange**: Calculates required changes
//! - **ApplyResourceChange**: Creates, updates or deletes a resource
//! - **ReadResource**: Refreshes resource state
//! - **ValidateDataResourceConfig**: Validates data source configuration
//! - **ReadDataSource**: Reads data from the API

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod environment;
pub mod error;
pub mod logging;
pub mod models;
pub mod provider;
pub mod schema;
pub mod server;
pub mod task;
pub mod testing;
pub mod types;
pub mod validation;
pub mod value;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use api::{AirplaneApi, ApiClient, ApiError, ClientConfig};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{AirplaneProvider, PROVIDER_TYPE_NAME, REGISTRY_ADDRESS};
pub use schema::{Diagnostic, ProviderSchema};
pub use server::{launched_by_host, serve, serve_with_options, ProviderService, ServeOptions};
pub use types::{
    AttributeChange, PlanResult, ProviderMetadata, ServerCapabilities, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate};
pub use value::AttrValue;

// Re-export async_trait for convenience
pub use async_trait::async_trait;
