//! Provider configuration: schema, model and resolution into a
//! [`ClientConfig`].
//!
//! Each setting starts from its environment variable and is overridden by an
//! explicitly set configuration value, even an empty one.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{self, ClientConfig};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::value::AttrValue;

/// Environment variable for the API host.
pub const HOST_ENV: &str = "AIRPLANEDEV_HOST";

/// Environment variable for the API key.
pub const API_KEY_ENV: &str = "AIRPLANEDEV_APIKEY";

/// Environment variable for the team id.
pub const TEAM_ID_ENV: &str = "AIRPLANEDEV_TEAMID";

/// Host used when neither configuration nor environment sets one.
pub const DEFAULT_HOST: &str = "api.airplane.dev";

/// The provider block as configured by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfigModel {
    #[serde(default)]
    pub host: AttrValue<String>,
    #[serde(default)]
    pub api_key: AttrValue<String>,
    #[serde(default)]
    pub team_id: AttrValue<String>,
}

impl ProviderConfigModel {
    /// Decode the configuration document sent by the host. A null document
    /// is an empty configuration.
    pub fn from_config(config: &Value) -> Result<Self, ProviderError> {
        if config.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(config.clone())?)
    }
}

/// Schema of the provider block.
pub fn provider_schema() -> Schema {
    Schema::v0()
        .with_description("Interact with Airplane.dev.")
        .with_attribute(
            "host",
            Attribute::optional_string().with_description(format!(
                "URI for the Airplane.dev API. May also be provided via the {} environment variable.",
                HOST_ENV
            )),
        )
        .with_attribute(
            "api_key",
            Attribute::optional_string()
                .sensitive()
                .with_description(format!(
                    "API key for the Airplane.dev API. May also be provided via the {} environment variable.",
                    API_KEY_ENV
                )),
        )
        .with_attribute(
            "team_id",
            Attribute::optional_string()
                .sensitive()
                .with_description(format!(
                    "Team ID for the Airplane.dev API. May also be provided via the {} environment variable.",
                    TEAM_ID_ENV
                )),
        )
}

struct Setting {
    attribute: &'static str,
    label: &'static str,
    env: &'static str,
}

const HOST: Setting = Setting {
    attribute: "host",
    label: "API Host",
    env: HOST_ENV,
};

const API_KEY: Setting = Setting {
    attribute: "api_key",
    label: "API Key",
    env: API_KEY_ENV,
};

const TEAM_ID: Setting = Setting {
    attribute: "team_id",
    label: "Team ID",
    env: TEAM_ID_ENV,
};

fn unknown_diagnostic(setting: &Setting) -> Diagnostic {
    Diagnostic::error(format!("Unknown Airplane.dev {}", setting.label))
        .with_detail(format!(
            "The provider cannot create the Airplane.dev API client as there is an unknown \
             configuration value for the Airplane.dev {}. Either target apply the source of \
             the value first, set the value statically in the configuration, or use the {} \
             environment variable.",
            setting.label, setting.env
        ))
        .with_attribute(setting.attribute)
}

fn missing_diagnostic(setting: &Setting) -> Diagnostic {
    Diagnostic::error(format!("Missing Airplane.dev {}", setting.label))
        .with_detail(format!(
            "The provider cannot create the Airplane.dev API client as there is a missing or \
             empty value for the Airplane.dev {}. Set the {} value in the configuration or use \
             the {} environment variable. If either is already set, ensure the value is not \
             empty.",
            setting.label, setting.attribute, setting.env
        ))
        .with_attribute(setting.attribute)
}

fn resolve_one(
    value: &AttrValue<String>,
    setting: &Setting,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> String {
    match value {
        AttrValue::Known(explicit) => explicit.clone(),
        _ => lookup(setting.env).unwrap_or_default(),
    }
}

/// Resolve the configuration into client settings.
///
/// `lookup` reads environment variables; the provider passes
/// `std::env::var(..).ok()`. On failure every problem is reported, each
/// scoped to its attribute.
pub fn resolve<F>(model: &ProviderConfigModel, lookup: F) -> Result<ClientConfig, Vec<Diagnostic>>
where
    F: Fn(&str) -> Option<String>,
{
    let fields = [
        (&model.host, &HOST),
        (&model.api_key, &API_KEY),
        (&model.team_id, &TEAM_ID),
    ];

    let unknown: Vec<Diagnostic> = fields
        .iter()
        .filter(|(value, _)| value.is_unknown())
        .map(|(_, setting)| unknown_diagnostic(setting))
        .collect();
    if !unknown.is_empty() {
        return Err(unknown);
    }

    let mut host = resolve_one(&model.host, &HOST, &lookup);
    let api_key = resolve_one(&model.api_key, &API_KEY, &lookup);
    let team_id = resolve_one(&model.team_id, &TEAM_ID, &lookup);

    let mut diagnostics = Vec::new();
    if api_key.is_empty() {
        diagnostics.push(missing_diagnostic(&API_KEY));
    }
    if team_id.is_empty() {
        diagnostics.push(missing_diagnostic(&TEAM_ID));
    }

    if host.trim().is_empty() {
        host = DEFAULT_HOST.to_string();
    }
    if let Err(err) = api::base_url(&host) {
        diagnostics.push(
            Diagnostic::error("Invalid Airplane.dev API Host")
                .with_detail(format!(
                    "The provider cannot create the Airplane.dev API client: {}. Set host to a \
                     host name, host:port or an http(s) URL.",
                    err
                ))
                .with_attribute(HOST.attribute),
        );
    }

    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    Ok(ClientConfig {
        host,
        api_key: SecretString::from(api_key),
        team_id,
    })
}
