use crate::layer::RoutingLayer;
use crate::logger::LoggerFactory;
use crate::settings::SettingsError;
use std::sync::Arc;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("failed to set global subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Install a [`RoutingLayer`] over `factory` as the global `tracing`
/// subscriber.
///
/// **Effects**
///
/// Every `tracing` event in the process is routed to the logger named by
/// its target, built on first use with the factory's sink-selection
/// policy. Fails if a global subscriber is already set.
pub fn install(factory: Arc<LoggerFactory>) -> Result<(), InitError> {
    let subscriber = Registry::default().with(RoutingLayer::new(factory));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Load settings from the environment, build a factory and install it.
///
/// Keep the returned factory alive for the life of the process and call
/// [`LoggerFactory::shutdown`] before exit so pending remote items are
/// delivered.
pub fn init_from_env() -> Result<Arc<LoggerFactory>, InitError> {
    let factory = Arc::new(LoggerFactory::from_env()?);
    install(Arc::clone(&factory))?;
    Ok(factory)
}
