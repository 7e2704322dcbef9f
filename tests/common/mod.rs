#![allow(dead_code)]

use sieve_telemetry::console::CaptureWriter;
use sieve_telemetry::remote::{HttpLogItem, RemoteClientHandle, RemoteTransport, TransportError, TransportFactory};
use sieve_telemetry::settings::{Credentials, EnvironmentKind, Settings};
use sieve_telemetry::LoggerFactory;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct RecordingTransport {
    pub items: Mutex<Vec<HttpLogItem>>,
    pub closes: AtomicUsize,
}

impl RecordingTransport {
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .map(|item| serde_json::from_str(&item.message).unwrap())
            .collect()
    }
}

impl RemoteTransport for RecordingTransport {
    fn submit(&self, item: HttpLogItem) -> Result<(), TransportError> {
        self.items.lock().unwrap().push(item);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one shared [`RecordingTransport`] and counts constructions.
#[derive(Default)]
pub struct RecordingFactory {
    pub transport: Arc<RecordingTransport>,
    pub constructed: AtomicUsize,
}

impl TransportFactory for RecordingFactory {
    fn construct(&self, _credentials: &Credentials) -> Result<RemoteClientHandle, TransportError> {
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.transport) as RemoteClientHandle)
    }
}

pub fn test_settings() -> Settings {
    Settings::new(EnvironmentKind::Test)
        .with_hostname("localhost")
        .with_app_name("test_service")
        .with_credentials("test.datadog.site", "test_api_key")
}

pub fn dev_settings() -> Settings {
    Settings::new(EnvironmentKind::Dev)
        .with_hostname("dev_host")
        .with_app_name("dev_service")
        .with_credentials("dev.datadog.site", "dev_api_key")
}

pub fn prod_settings() -> Settings {
    Settings::new(EnvironmentKind::Prod)
        .with_log_level(sieve_telemetry::Level::Info)
        .with_hostname("prod_host")
        .with_app_name("prod_service")
        .with_credentials("prod.datadog.site", "prod_api_key")
}

pub struct Harness {
    pub factory: LoggerFactory,
    pub console: CaptureWriter,
    pub remote: Arc<RecordingFactory>,
    pub dir: tempfile::TempDir,
}

pub fn harness(settings: Settings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let console = CaptureWriter::new();
    let remote = Arc::new(RecordingFactory::default());
    let factory = LoggerFactory::builder(settings)
        .console_writer(console.clone())
        .log_dir(dir.path().join("logs"))
        .transport_factory(remote.clone())
        .build();
    Harness {
        factory,
        console,
        remote,
        dir,
    }
}

pub fn log_file(dir: &Path) -> std::path::PathBuf {
    dir.join("logs").join("debug.log")
}
