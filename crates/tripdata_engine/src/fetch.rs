use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pipeline_logging::{pipeline_error, pipeline_info, pipeline_warn};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tripdata_core::retry::step;
use tripdata_core::{
    FetchConfig, JitterRange, PartitionKey, RetryEvent, RetryPolicy, RetryState,
    DEFAULT_USER_AGENT,
};
use url::Url;

use crate::{FailureKind, FetchError, FetchFailure, FetchJob, FetchedFile};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Maximum silence between two body chunks; large files may take far
    /// longer than this overall.
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchSettings {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            user_agent: config.user_agent.clone(),
        }
    }
}

impl FetchJob {
    pub fn for_partition(
        key: PartitionKey,
        base_url: &Url,
        extension: &str,
        dest_dir: &Path,
    ) -> Result<Self, FetchError> {
        let url = key
            .remote_url(base_url, extension)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        Ok(Self {
            key,
            url,
            dest_dir: dest_dir.to_path_buf(),
            file_name: key.file_name(extension),
        })
    }
}

/// A single download attempt.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, job: &FetchJob) -> Result<FetchedFile, FetchError>;
}

/// Waits between attempts. Swapped for a recording fake in tests.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent)
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, job: &FetchJob) -> Result<FetchedFile, FetchError> {
        let response = self
            .client
            .get(job.url.clone())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        // The temp file is removed on drop, so a failed stream leaves nothing
        // behind under the partition's name.
        let partial = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&job.dest_dir)
            .map_err(local_io)?;
        let mut file = tokio::fs::File::from_std(partial.as_file().try_clone().map_err(local_io)?);

        let mut byte_len: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            file.write_all(&chunk).await.map_err(local_io)?;
            byte_len += chunk.len() as u64;
        }
        file.flush().await.map_err(local_io)?;
        file.sync_all().await.map_err(local_io)?;
        drop(file);

        let target = job.dest_dir.join(&job.file_name);
        if target.exists() {
            fs::remove_file(&target).map_err(local_io)?;
        }
        partial
            .persist(&target)
            .map_err(|err| local_io(err.error))?;

        Ok(FetchedFile {
            key: job.key,
            path: target,
            byte_len,
            attempts: 1,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

fn local_io(err: io::Error) -> FetchError {
    FetchError::new(FailureKind::LocalIo, err.to_string())
}

/// Runs a [`Fetcher`] under a bounded retry budget.
///
/// One delay is drawn from the jitter range per `fetch` call and reused for
/// every wait of that call.
#[derive(Clone)]
pub struct RetryingFetcher {
    fetcher: Arc<dyn Fetcher>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    jitter: JitterRange,
}

impl RetryingFetcher {
    pub fn new(fetcher: Arc<dyn Fetcher>, policy: RetryPolicy, jitter: JitterRange) -> Self {
        Self {
            fetcher,
            sleeper: Arc::new(TokioSleeper),
            policy,
            jitter,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn fetch(
        &self,
        job: &FetchJob,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile, FetchFailure> {
        let backoff = self.jitter.draw(&mut rand::thread_rng());
        let mut state = self.policy.start();
        let mut last_error: Option<FetchError> = None;

        while !state.is_terminal() {
            state = match state {
                RetryState::Attempting { attempt } => {
                    if cancel.is_cancelled() {
                        return Err(FetchFailure::Cancelled {
                            attempts: attempt - 1,
                        });
                    }
                    pipeline_info!("Attempt {} to download {}", attempt, job.url);
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(FetchFailure::Cancelled { attempts: attempt });
                        }
                        outcome = self.fetcher.fetch(job) => outcome,
                    };
                    match outcome {
                        Ok(mut file) => {
                            let done =
                                step(state, RetryEvent::AttemptSucceeded, &self.policy, &backoff);
                            file.attempts = done.attempts();
                            pipeline_info!(
                                "Downloaded {} to {:?} ({} bytes)",
                                job.key,
                                file.path,
                                file.byte_len
                            );
                            return Ok(file);
                        }
                        Err(err) => {
                            pipeline_warn!(
                                "Download attempt {} for {} failed: {}",
                                attempt,
                                job.key,
                                err
                            );
                            let retryable = err.kind.is_retryable();
                            last_error = Some(err);
                            step(
                                state,
                                RetryEvent::AttemptFailed { retryable },
                                &self.policy,
                                &backoff,
                            )
                        }
                    }
                }
                RetryState::Waiting { attempt, delay } => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(FetchFailure::Cancelled { attempts: attempt });
                        }
                        _ = self.sleeper.sleep(delay) => {}
                    }
                    step(state, RetryEvent::WaitElapsed, &self.policy, &backoff)
                }
                terminal => terminal,
            };
        }

        let attempts = state.attempts();
        pipeline_error!("All {} download attempt(s) for {} failed", attempts, job.url);
        Err(FetchFailure::Exhausted {
            attempts,
            last_error: last_error
                .unwrap_or_else(|| FetchError::new(FailureKind::Network, "no attempt completed")),
        })
    }
}
