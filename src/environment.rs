//! The `airplanedev_environment` data source.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::AirplaneApi;
use crate::error::ProviderError;
use crate::models::Env;
use crate::schema::{Attribute, Schema};
use crate::value::AttrValue;

/// Type name of the data source.
pub const ENVIRONMENT_DATA_SOURCE: &str = "airplanedev_environment";

/// Layout of timestamps in state, e.g. `2022-01-02 03:04:05 +0000 UTC`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z UTC";

/// Rendered for an archived environment the API sent no timestamp for.
pub const ZERO_TIMESTAMP: &str = "0001-01-01 00:00:00 +0000 UTC";

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Configuration accepted by the data source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub slug: AttrValue<String>,
}

/// State produced by a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentModel {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub team_id: String,
    pub default: bool,
    pub created_at: String,
    pub created_by: String,
    pub updated_at: String,
    pub updated_by: String,
    pub is_archived: bool,
    /// Null unless `is_archived` is set.
    pub archived_at: Option<String>,
}

impl From<Env> for EnvironmentModel {
    fn from(env: Env) -> Self {
        let archived_at = match (env.is_archived, env.archived_at) {
            (false, _) => None,
            (true, Some(at)) => Some(timestamp(&at)),
            (true, None) => {
                warn!(slug = %env.slug, "Archived environment has no archive timestamp");
                Some(ZERO_TIMESTAMP.to_string())
            }
        };

        Self {
            id: env.id,
            slug: env.slug,
            name: env.name,
            team_id: env.team_id,
            default: env.default,
            created_at: timestamp(&env.created_at),
            created_by: env.created_by.unwrap_or_default(),
            updated_at: timestamp(&env.updated_at),
            updated_by: env.updated_by.unwrap_or_default(),
            is_archived: env.is_archived,
            archived_at,
        }
    }
}

/// Reads an environment by slug.
pub struct EnvironmentDataSource {
    client: Arc<dyn AirplaneApi>,
}

impl EnvironmentDataSource {
    pub fn new(client: Arc<dyn AirplaneApi>) -> Self {
        Self { client }
    }

    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Look up an Airplane.dev environment by slug.")
            .with_attribute(
                "slug",
                Attribute::required_string().with_description("Slug of the environment."),
            )
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::computed_string())
            .with_attribute("team_id", Attribute::computed_string())
            .with_attribute("default", Attribute::computed_bool())
            .with_attribute("created_at", Attribute::computed_string())
            .with_attribute("created_by", Attribute::computed_string())
            .with_attribute("updated_at", Attribute::computed_string())
            .with_attribute("updated_by", Attribute::computed_string())
            .with_attribute("is_archived", Attribute::computed_bool())
            .with_attribute(
                "archived_at",
                Attribute::computed_string()
                    .with_description("When the environment was archived; null if it is not."),
            )
    }

    /// Fetch the environment named by the configured slug.
    pub async fn read(&self, config: Value) -> Result<Value, ProviderError> {
        let config: EnvironmentConfig = serde_json::from_value(config)?;
        let slug = match config.slug {
            AttrValue::Known(slug) => slug,
            AttrValue::Unknown => {
                return Err(ProviderError::InvalidRequest(
                    "slug is not known yet".to_string(),
                ))
            }
            AttrValue::Null => {
                return Err(ProviderError::Validation("slug is required".to_string()))
            }
        };

        debug!(slug = %slug, "Reading environment");
        let env = self.client.get_env(&slug).await.map_err(|err| {
            warn!(slug = %slug, error = %err, "Environment lookup failed");
            ProviderError::operation("Unable to Read Airplane.dev Environment", err.to_string())
        })?;

        Ok(serde_json::to_value(EnvironmentModel::from(env))?)
    }
}
