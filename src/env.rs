//! Environment variable names read by [`Settings::from_env`].
//!
//! These are purely helpers; loggers and sinks only ever see a finished
//! [`Settings`] snapshot.
//!
//! [`Settings`]: crate::settings::Settings
//! [`Settings::from_env`]: crate::settings::Settings::from_env

/// Deployment environment: `test`, `dev` or `prod`.
pub const APP_ENV_ENV: &str = "APP_ENV";

/// Minimum level for new loggers, e.g. `INFO`.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Host name reported with every remote log item.
pub const HOSTNAME_ENV: &str = "HOSTNAME";

/// Logical service name reported with every remote log item.
pub const APP_NAME_ENV: &str = "APP_NAME";

/// Datadog site, e.g. `datadoghq.eu`.
pub const DD_SITE_ENV: &str = "DD_SITE";

/// Datadog API key.
pub const DD_API_KEY_ENV: &str = "DD_API_KEY";

/// Read an environment variable, treating empty values as unset.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}
