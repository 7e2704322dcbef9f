//! Process-wide remote telemetry client and the sink that ships to it.
//!
//! [`RemoteClient`] is the single owner of the transport handle. It is
//! created by the logger factory, shared by `Arc` with every
//! [`RemoteSink`], and walks `Uninitialized -> Ready -> Closed` exactly
//! once. The transport itself is opaque: anything implementing
//! [`RemoteTransport`] and constructed through a [`TransportFactory`].

use crate::format::{Formatter, StructuredFormatter};
use crate::record::LogRecord;
use crate::settings::{Credentials, Settings};
use crate::sink::{LogSink, SinkError, SinkKind};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

/// One entry of a Datadog HTTP logs submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpLogItem {
    /// Structured payload produced by [`StructuredFormatter`].
    pub message: String,
    pub hostname: String,
    pub service: String,
    pub ddsource: String,
    pub ddtags: String,
}

/// Errors raised by a transport while constructing or submitting.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("submission queue is full")]
    QueueFull,

    #[error("http request failed: {0}")]
    Http(String),

    #[error("intake rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to serialize batch: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to start transport: {0}")]
    Startup(String),

    #[error("datadog feature is not enabled")]
    DatadogFeatureDisabled,
}

/// Why the remote client could not be handed out.
///
/// `TestEnvironment` and `MissingCredentials` are the expected absence
/// cases; `NotReady` and `Closed` mean a sink reached for the client
/// outside its lifetime.
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("remote client unavailable: disabled in the test environment")]
    TestEnvironment,

    #[error("remote client unavailable: DD_SITE and DD_API_KEY are both required")]
    MissingCredentials,

    #[error("remote client unavailable: not initialized")]
    NotReady,

    #[error("remote client unavailable: already closed")]
    Closed,

    #[error("remote client unavailable: {0}")]
    Construction(#[source] TransportError),
}

impl ConfigurationError {
    /// True for lifecycle misuse rather than missing configuration.
    pub fn is_misuse(&self) -> bool {
        matches!(self, ConfigurationError::NotReady | ConfigurationError::Closed)
    }
}

/// Opaque network client for the telemetry intake.
pub trait RemoteTransport: Send + Sync {
    /// Hand one item to the transport. Delivery happens in the background;
    /// an error here means the item was not accepted at all.
    fn submit(&self, item: HttpLogItem) -> Result<(), TransportError>;

    /// Deliver whatever is still pending and release the transport.
    /// Called exactly once by [`RemoteClient::close`].
    fn close(&self);
}

pub trait TransportFactory: Send + Sync {
    fn construct(&self, credentials: &Credentials) -> Result<RemoteClientHandle, TransportError>;
}

pub type RemoteClientHandle = Arc<dyn RemoteTransport>;

/// Observable lifecycle state of a [`RemoteClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    Closed,
}

enum ClientState {
    Uninitialized,
    Ready(RemoteClientHandle),
    Closed,
}

/// Lazily constructed, at-most-once remote client.
pub struct RemoteClient {
    factory: Arc<dyn TransportFactory>,
    state: Mutex<ClientState>,
}

impl RemoteClient {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        RemoteClient {
            factory,
            state: Mutex::new(ClientState::Uninitialized),
        }
    }

    /// Return the shared handle, constructing it on first use.
    ///
    /// **Parameters**
    /// - `settings`: snapshot whose environment and credentials gate
    ///   construction.
    ///
    /// **Returns**
    /// - The one handle this client ever creates; every successful caller
    ///   receives a clone of the same `Arc`.
    /// - `Err(TestEnvironment | MissingCredentials)` when the snapshot does
    ///   not allow a remote client, `Err(Closed)` after [`close`], or
    ///   `Err(Construction(..))` if the factory failed (a later call may
    ///   retry construction).
    ///
    /// [`close`]: RemoteClient::close
    pub fn acquire(&self, settings: &Settings) -> Result<RemoteClientHandle, ConfigurationError> {
        if settings.is_test() {
            return Err(ConfigurationError::TestEnvironment);
        }
        let credentials = settings.credentials().ok_or(ConfigurationError::MissingCredentials)?;

        // Held across construction so concurrent first callers wait for
        // the one handle instead of building their own.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            ClientState::Ready(handle) => return Ok(Arc::clone(handle)),
            ClientState::Closed => return Err(ConfigurationError::Closed),
            ClientState::Uninitialized => {}
        }

        let handle = self
            .factory
            .construct(&credentials)
            .map_err(ConfigurationError::Construction)?;
        *state = ClientState::Ready(Arc::clone(&handle));
        Ok(handle)
    }

    /// The existing handle, without ever constructing one.
    pub fn handle(&self) -> Result<RemoteClientHandle, ConfigurationError> {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            ClientState::Ready(handle) => Ok(Arc::clone(handle)),
            ClientState::Uninitialized => Err(ConfigurationError::NotReady),
            ClientState::Closed => Err(ConfigurationError::Closed),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            ClientState::Uninitialized => Lifecycle::Uninitialized,
            ClientState::Ready(_) => Lifecycle::Ready,
            ClientState::Closed => Lifecycle::Closed,
        }
    }

    /// Move to `Closed`, flushing and closing the transport if one was
    /// created. Returns `true` only for the call that closed a live
    /// transport.
    pub fn close(&self) -> bool {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, ClientState::Closed)
        };
        match previous {
            ClientState::Ready(handle) => {
                handle.close();
                true
            }
            ClientState::Uninitialized | ClientState::Closed => false,
        }
    }
}

/// Sink that formats records as structured JSON and submits them through
/// the shared [`RemoteClient`].
pub struct RemoteSink {
    client: Arc<RemoteClient>,
    formatter: Box<dyn Formatter>,
    hostname: String,
    service: String,
    ddtags: String,
}

impl RemoteSink {
    pub fn new(client: Arc<RemoteClient>, settings: &Settings) -> Self {
        RemoteSink {
            client,
            formatter: Box::new(StructuredFormatter),
            hostname: settings.hostname.clone(),
            service: settings.app_name.clone(),
            ddtags: format!("env:{}", settings.environment),
        }
    }

    pub fn with_formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }
}

impl LogSink for RemoteSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Remote
    }

    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        let message = self.formatter.format(record);
        let handle = self.client.handle()?;
        handle.submit(HttpLogItem {
            message,
            hostname: self.hostname.clone(),
            service: self.service.clone(),
            ddsource: "rust".to_string(),
            ddtags: self.ddtags.clone(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;
    use crate::settings::EnvironmentKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        items: Mutex<Vec<HttpLogItem>>,
        closes: AtomicUsize,
    }

    impl RemoteTransport for Recording {
        fn submit(&self, item: HttpLogItem) -> Result<(), TransportError> {
            self.items.lock().unwrap().push(item);
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        constructed: AtomicUsize,
        last: Mutex<Option<Arc<Recording>>>,
    }

    impl TransportFactory for CountingFactory {
        fn construct(&self, _credentials: &Credentials) -> Result<RemoteClientHandle, TransportError> {
            // Widen the race window for concurrent first callers.
            std::thread::sleep(Duration::from_millis(20));
            self.constructed.fetch_add(1, Ordering::SeqCst);
            let transport = Arc::new(Recording::default());
            *self.last.lock().unwrap() = Some(Arc::clone(&transport));
            Ok(transport as RemoteClientHandle)
        }
    }

    struct FailingFactory;

    impl TransportFactory for FailingFactory {
        fn construct(&self, _credentials: &Credentials) -> Result<RemoteClientHandle, TransportError> {
            Err(TransportError::Startup("no runtime".into()))
        }
    }

    fn dev_with_credentials() -> Settings {
        Settings::new(EnvironmentKind::Dev)
            .with_hostname("dev_host")
            .with_app_name("dev_service")
            .with_credentials("dev.datadog.site", "dev_api_key")
    }

    #[test]
    fn acquire_refuses_test_environment_and_missing_credentials() {
        let client = RemoteClient::new(Arc::new(CountingFactory::default()));

        let test_env = Settings::new(EnvironmentKind::Test).with_credentials("site", "key");
        assert!(matches!(client.acquire(&test_env), Err(ConfigurationError::TestEnvironment)));

        let no_credentials = Settings::new(EnvironmentKind::Prod).with_hostname("prod_host");
        let err = client.acquire(&no_credentials).err().unwrap();
        assert!(matches!(err, ConfigurationError::MissingCredentials));
        assert!(!err.is_misuse());
        assert!(err.to_string().starts_with("remote client unavailable"));
        assert_eq!(client.lifecycle(), Lifecycle::Uninitialized);
    }

    #[test]
    fn concurrent_acquire_constructs_exactly_once() {
        let factory = Arc::new(CountingFactory::default());
        let client = RemoteClient::new(factory.clone());
        let with_credentials = dev_with_credentials();
        let without_credentials = Settings::new(EnvironmentKind::Dev);

        let threads = 16;
        let barrier = Barrier::new(threads);
        let handles: Vec<Option<RemoteClientHandle>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..threads)
                .map(|i| {
                    let settings = if i % 2 == 0 { &without_credentials } else { &with_credentials };
                    let client = &client;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        client.acquire(settings).ok()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
        let acquired: Vec<_> = handles.into_iter().flatten().collect();
        assert_eq!(acquired.len(), threads / 2);
        for handle in &acquired {
            assert!(Arc::ptr_eq(handle, &acquired[0]));
        }
    }

    #[test]
    fn construction_failure_is_reported_and_retryable() {
        let client = RemoteClient::new(Arc::new(FailingFactory));
        let err = client.acquire(&dev_with_credentials()).err().unwrap();
        assert!(matches!(err, ConfigurationError::Construction(TransportError::Startup(_))));
        assert_eq!(client.lifecycle(), Lifecycle::Uninitialized);
    }

    #[test]
    fn close_runs_once_and_is_terminal() {
        let factory = Arc::new(CountingFactory::default());
        let client = RemoteClient::new(factory.clone());
        client.acquire(&dev_with_credentials()).unwrap();
        assert_eq!(client.lifecycle(), Lifecycle::Ready);

        assert!(client.close());
        assert!(!client.close());
        let transport = factory.last.lock().unwrap().clone().unwrap();
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);

        let err = client.acquire(&dev_with_credentials()).err().unwrap();
        assert!(matches!(err, ConfigurationError::Closed));
        assert!(err.is_misuse());
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remote_sink_submits_structured_payload() {
        let factory = Arc::new(CountingFactory::default());
        let client = Arc::new(RemoteClient::new(factory.clone()));
        let settings = dev_with_credentials();
        client.acquire(&settings).unwrap();

        let sink = RemoteSink::new(Arc::clone(&client), &settings);
        sink.emit(&LogRecord::new("svc.worker", Level::Info, "shipped")).unwrap();

        let transport = factory.last.lock().unwrap().clone().unwrap();
        let items = transport.items.lock().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].hostname, "dev_host");
        assert_eq!(items[0].service, "dev_service");
        assert_eq!(items[0].ddsource, "rust");
        assert_eq!(items[0].ddtags, "env:dev");
        let payload: serde_json::Value = serde_json::from_str(&items[0].message).unwrap();
        assert_eq!(payload["message"], "shipped");
        assert_eq!(payload["logger"]["name"], "svc.worker");
    }

    #[test]
    fn remote_sink_fails_loudly_once_client_is_gone() {
        let client = Arc::new(RemoteClient::new(Arc::new(CountingFactory::default())));
        let settings = dev_with_credentials();
        let sink = RemoteSink::new(Arc::clone(&client), &settings);
        let record = LogRecord::new("svc", Level::Error, "lost");

        assert!(matches!(
            sink.emit(&record),
            Err(SinkError::Configuration(ConfigurationError::NotReady))
        ));

        client.acquire(&settings).unwrap();
        client.close();
        assert!(matches!(
            sink.emit(&record),
            Err(SinkError::Configuration(ConfigurationError::Closed))
        ));
    }
}
