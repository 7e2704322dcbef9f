use crate::remote::{HttpLogItem, RemoteClientHandle, RemoteTransport, TransportError, TransportFactory};
use crate::settings::Credentials;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

/// Asynchronous destination for batches of [`HttpLogItem`]s.
///
/// Called only from the transport's worker thread, never from the thread
/// that emitted the record.
#[async_trait]
pub trait LogIntake: Send + Sync {
    /// Deliver one batch.
    ///
    /// **Returns**
    /// - `Ok(())` if the intake accepted the whole batch.
    /// - `Err(..)` on network failure or a non-success status; the worker
    ///   retries with backoff up to [`TransportConfig::max_attempts`].
    async fn send(&self, batch: &[HttpLogItem]) -> Result<(), TransportError>;
}

/// Name of the thread that delivers batches to the intake.
pub const WORKER_THREAD_NAME: &str = "datadog-logs";

/// `https://http-intake.logs.<site>/api/v2/logs`
pub fn intake_endpoint(site: &str) -> String {
    let site = site
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!("https://http-intake.logs.{}/api/v2/logs", site)
}

/// Datadog HTTP logs intake over `reqwest`.
#[cfg(feature = "datadog")]
#[derive(Clone)]
pub struct DatadogIntake {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[cfg(feature = "datadog")]
impl DatadogIntake {
    pub fn new(credentials: &Credentials) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Startup(e.to_string()))?;
        Ok(DatadogIntake {
            client,
            endpoint: intake_endpoint(credentials.site()),
            api_key: credentials.api_key().to_string(),
        })
    }
}

#[cfg(feature = "datadog")]
#[async_trait]
impl LogIntake for DatadogIntake {
    async fn send(&self, batch: &[HttpLogItem]) -> Result<(), TransportError> {
        let body = serde_json::to_vec(batch)?;
        let resp = self
            .client
            .post(&self.endpoint)
            .header("DD-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(TransportError::Rejected { status, body })
        }
    }
}

/// Buffering and retry settings for [`DatadogTransport`].
///
/// **Fields**
/// - `channel_buffer`: items queued before `submit` reports `QueueFull`.
/// - `batch_size`: items per intake request.
/// - `flush_interval`: longest time a partial batch waits.
/// - `max_attempts`: deliveries tried per batch before it is dropped.
/// - `initial_backoff` / `max_backoff`: exponential retry delay bounds.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            batch_size: 128,
            flush_interval: Duration::from_secs(1),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    // Enforce minimal thresholds to avoid degenerate configs.
    fn normalized(mut self) -> Self {
        self.channel_buffer = self.channel_buffer.max(16);
        self.batch_size = self.batch_size.max(1);
        self.flush_interval = self.flush_interval.max(Duration::from_millis(10));
        self.max_attempts = self.max_attempts.max(1);
        self
    }
}

/// Remote transport that queues items on a bounded channel and delivers
/// them in batches from a dedicated worker thread.
///
/// The worker owns a current-thread Tokio runtime, so the transport works
/// the same whether or not the emitting code runs inside a runtime.
pub struct DatadogTransport {
    sender: Mutex<Option<mpsc::Sender<HttpLogItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DatadogTransport {
    pub fn spawn(intake: Arc<dyn LogIntake>, config: TransportConfig) -> Result<Self, TransportError> {
        let config = config.normalized();
        let (tx, rx) = mpsc::channel::<HttpLogItem>(config.channel_buffer);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::Startup(e.to_string()))?;

        let worker = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(run_worker(rx, intake, config)))
            .map_err(|e| TransportError::Startup(e.to_string()))?;

        Ok(DatadogTransport {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl RemoteTransport for DatadogTransport {
    fn submit(&self, item: HttpLogItem) -> Result<(), TransportError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = sender.as_ref().ok_or(TransportError::Closed)?;
        sender.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn close(&self) {
        // Dropping the sender lets the worker drain the queue and exit.
        drop(self.sender.lock().unwrap_or_else(PoisonError::into_inner).take());
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                eprintln!("datadog log worker panicked during shutdown");
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<HttpLogItem>,
    intake: Arc<dyn LogIntake>,
    config: TransportConfig,
) {
    let mut batch = Vec::with_capacity(config.batch_size);
    // Fixed cadence: arrivals must not push the flush of a partial batch out.
    let mut ticker = interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(item) => {
                    batch.push(item);
                    if batch.len() >= config.batch_size {
                        if let Err(e) = send_batch(&*intake, &mut batch, &config).await {
                            eprintln!("error sending log batch: {}", e);
                        }
                    }
                }
                None => {
                    if !batch.is_empty() {
                        if let Err(e) = send_batch(&*intake, &mut batch, &config).await {
                            eprintln!("error flushing log batch on close: {}", e);
                        }
                    }
                    break;
                }
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    if let Err(e) = send_batch(&*intake, &mut batch, &config).await {
                        eprintln!("error flushing log batch: {}", e);
                    }
                }
            }
        }
    }
}

/// Deliver `batch`, retrying with exponential backoff. The batch is
/// cleared whether or not delivery eventually succeeds.
async fn send_batch(
    intake: &dyn LogIntake,
    batch: &mut Vec<HttpLogItem>,
    config: &TransportConfig,
) -> Result<(), TransportError> {
    let mut backoff = config.initial_backoff;
    let mut attempt = 1;

    loop {
        match intake.send(&batch[..]).await {
            Ok(()) => {
                batch.clear();
                return Ok(());
            }
            Err(e) if attempt >= config.max_attempts => {
                eprintln!("dropping {} log items after {} attempts", batch.len(), attempt);
                batch.clear();
                return Err(e);
            }
            Err(e) => {
                eprintln!("log submission failed ({}), retrying in {:?}", e, backoff);
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
                attempt += 1;
            }
        }
    }
}

/// Builds a [`DatadogTransport`] talking to the real intake.
#[derive(Clone, Debug, Default)]
pub struct DatadogTransportFactory {
    pub config: TransportConfig,
}

impl TransportFactory for DatadogTransportFactory {
    fn construct(&self, credentials: &Credentials) -> Result<RemoteClientHandle, TransportError> {
        #[cfg(feature = "datadog")]
        {
            let intake = Arc::new(DatadogIntake::new(credentials)?);
            let transport = DatadogTransport::spawn(intake, self.config.clone())?;
            Ok(Arc::new(transport) as RemoteClientHandle)
        }

        #[cfg(not(feature = "datadog"))]
        {
            let _ = credentials;
            Err(TransportError::DatadogFeatureDisabled)
        }
    }
}
