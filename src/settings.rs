use crate::env::{
    env_opt, APP_ENV_ENV, APP_NAME_ENV, DD_API_KEY_ENV, DD_SITE_ENV, HOSTNAME_ENV, LOG_LEVEL_ENV,
};
use crate::record::{Level, ParseLevelError};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;

/// Deployment environment the process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentKind {
    Test,
    Dev,
    Prod,
}

impl EnvironmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentKind::Test => "test",
            EnvironmentKind::Dev => "dev",
            EnvironmentKind::Prod => "prod",
        }
    }
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" | "testing" => Ok(EnvironmentKind::Test),
            "dev" | "development" => Ok(EnvironmentKind::Dev),
            "prod" | "production" => Ok(EnvironmentKind::Prod),
            _ => Err(SettingsError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Errors produced while building a [`Settings`] snapshot.
#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error(transparent)]
    InvalidLevel(#[from] ParseLevelError),

    #[error("hostname must not be localhost in prod")]
    LocalhostInProduction,
}

/// Datadog site and API key. Only exists when both halves are present.
#[derive(Clone)]
pub struct Credentials {
    site: SecretString,
    api_key: SecretString,
}

impl Credentials {
    pub fn new(site: impl Into<String>, api_key: impl Into<String>) -> Self {
        Credentials {
            site: SecretString::from(site.into()),
            api_key: SecretString::from(api_key.into()),
        }
    }

    pub fn site(&self) -> &str {
        self.site.expose_secret()
    }

    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials([REDACTED])")
    }
}

/// Read-only configuration snapshot consumed by the logger factory.
///
/// Built once per process (or once per test case) and shared behind an
/// `Arc`; nothing in this crate mutates it afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: EnvironmentKind,
    pub log_level: Level,
    pub hostname: String,
    pub app_name: String,
    pub dd_site: Option<SecretString>,
    pub dd_api_key: Option<SecretString>,
}

impl Settings {
    /// Defaults for the given environment: `DEBUG`, `localhost`, `sieve`,
    /// no credentials.
    pub fn new(environment: EnvironmentKind) -> Self {
        Settings {
            environment,
            log_level: Level::Debug,
            hostname: "localhost".to_string(),
            app_name: "sieve".to_string(),
            dd_site: None,
            dd_api_key: None,
        }
    }

    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_credentials(mut self, site: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.dd_site = Some(SecretString::from(site.into()));
        self.dd_api_key = Some(SecretString::from(api_key.into()));
        self
    }

    /// Load from the process environment. See [`crate::env`] for the
    /// variable names.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(env_opt)
    }

    /// Load from an arbitrary key lookup, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup(APP_ENV_ENV) {
            Some(value) => value.parse()?,
            None => EnvironmentKind::Dev,
        };

        let mut settings = Settings::new(environment);
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            settings.log_level = level.parse()?;
        }
        if let Some(hostname) = lookup(HOSTNAME_ENV) {
            settings.hostname = hostname;
        }
        if let Some(app_name) = lookup(APP_NAME_ENV) {
            settings.app_name = app_name;
        }
        settings.dd_site = lookup(DD_SITE_ENV).map(SecretString::from);
        settings.dd_api_key = lookup(DD_API_KEY_ENV).map(SecretString::from);

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.is_prod() && self.hostname == "localhost" {
            return Err(SettingsError::LocalhostInProduction);
        }
        Ok(())
    }

    pub fn is_test(&self) -> bool {
        self.environment == EnvironmentKind::Test
    }

    pub fn is_dev(&self) -> bool {
        self.environment == EnvironmentKind::Dev
    }

    pub fn is_prod(&self) -> bool {
        self.environment == EnvironmentKind::Prod
    }

    /// Both credentials, or `None` if either is missing or empty.
    pub fn credentials(&self) -> Option<Credentials> {
        let site = self.dd_site.as_ref()?.expose_secret();
        let api_key = self.dd_api_key.as_ref()?.expose_secret();
        if site.is_empty() || api_key.is_empty() {
            return None;
        }
        Some(Credentials::new(site, api_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.environment, EnvironmentKind::Dev);
        assert_eq!(settings.log_level, Level::Debug);
        assert_eq!(settings.hostname, "localhost");
        assert_eq!(settings.app_name, "sieve");
        assert!(settings.credentials().is_none());
        assert!(settings.is_dev());
    }

    #[test]
    fn prod_settings_from_lookup() {
        let settings = Settings::from_lookup(lookup(&[
            ("APP_ENV", "production"),
            ("LOG_LEVEL", "INFO"),
            ("HOSTNAME", "prod_host"),
            ("APP_NAME", "prod_service"),
            ("DD_SITE", "prod.datadog.site"),
            ("DD_API_KEY", "prod_api_key"),
        ]))
        .unwrap();

        assert!(settings.is_prod());
        assert_eq!(settings.log_level, Level::Info);
        let credentials = settings.credentials().unwrap();
        assert_eq!(credentials.site(), "prod.datadog.site");
        assert_eq!(credentials.api_key(), "prod_api_key");
    }

    #[test]
    fn prod_rejects_localhost() {
        let err = Settings::from_lookup(lookup(&[("APP_ENV", "prod")])).unwrap_err();
        assert!(matches!(err, SettingsError::LocalhostInProduction));
    }

    #[test]
    fn half_a_credential_pair_is_no_credentials() {
        let mut settings = Settings::new(EnvironmentKind::Dev).with_credentials("site", "key");
        settings.dd_api_key = None;
        assert!(settings.credentials().is_none());
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let settings = Settings::new(EnvironmentKind::Dev).with_credentials("dev.site", "dev_api_key");
        let debug = format!("{:?} {:?}", settings, settings.credentials());
        assert!(!debug.contains("dev_api_key"), "secret leaked: {debug}");
    }

    #[test]
    fn unknown_environment_is_an_error() {
        assert!("staging".parse::<EnvironmentKind>().is_err());
        assert_eq!("testing".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::Test);
    }
}
