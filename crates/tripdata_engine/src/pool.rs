use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures_util::StreamExt;
use pipeline_logging::pipeline_debug;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::fetch::RetryingFetcher;
use crate::persist::remove_partition_file;
use crate::{FetchEvent, FetchFailure, FetchJob};

/// A delivered event plus the slot its file occupies on disk.
type Delivery = (FetchEvent, Option<OwnedSemaphorePermit>);

/// Bounded pool of concurrent fetches on a dedicated runtime thread.
///
/// Results come back in job order. A fetch holds one of `concurrency` slots
/// from its first attempt until the consumer asks for the event after it, so
/// at most `concurrency` partition files exist at once, counting in-flight
/// downloads and the file the consumer is loading.
pub struct FetchPool {
    event_rx: mpsc::Receiver<Delivery>,
    held: Option<OwnedSemaphorePermit>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl FetchPool {
    pub fn spawn(
        fetcher: RetryingFetcher,
        jobs: Vec<FetchJob>,
        concurrency: usize,
    ) -> Result<Self, io::Error> {
        let concurrency = concurrency.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let slots = Arc::new(Semaphore::new(concurrency));
        let (event_tx, event_rx) = mpsc::channel::<Delivery>(1);
        let cancel = CancellationToken::new();
        let pool_cancel = cancel.clone();

        let worker = thread::Builder::new()
            .name("fetch-pool".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let mut results = futures_util::stream::iter(jobs)
                        .map(|job| {
                            let fetcher = fetcher.clone();
                            let token = pool_cancel.child_token();
                            let slots = Arc::clone(&slots);
                            async move {
                                let slot = tokio::select! {
                                    biased;
                                    _ = token.cancelled() => None,
                                    slot = slots.acquire_owned() => slot.ok(),
                                };
                                let Some(slot) = slot else {
                                    let result = Err(FetchFailure::Cancelled { attempts: 0 });
                                    return (FetchEvent { key: job.key, result }, None);
                                };
                                let result = fetcher.fetch(&job, &token).await;
                                // Failures leave no file behind.
                                let slot = result.is_ok().then_some(slot);
                                (FetchEvent { key: job.key, result }, slot)
                            }
                        })
                        .buffered(concurrency);
                    while let Some(delivery) = results.next().await {
                        let sent = event_tx.send(delivery).await;
                        if let Err(mpsc::error::SendError((event, _))) = sent {
                            // Receiver gone: nobody will consume this file.
                            if let Ok(file) = event.result {
                                remove_partition_file(&file.path);
                            }
                            pool_cancel.cancel();
                            break;
                        }
                    }
                    pipeline_debug!("Fetch pool drained");
                });
            })?;

        Ok(Self {
            event_rx,
            held: None,
            cancel,
            worker: Some(worker),
        })
    }

    /// Next result in job order; `None` once every job has reported.
    /// Blocks the calling thread, which must not be a runtime worker.
    ///
    /// Calling this again tells the pool the previous file has been consumed
    /// and frees its slot for another download.
    pub fn recv(&mut self) -> Option<FetchEvent> {
        self.held = None;
        let (event, slot) = self.event_rx.blocking_recv()?;
        self.held = slot;
        Some(event)
    }

    /// Cancels every outstanding fetch, including ones waiting out a backoff.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Iterator for FetchPool {
    type Item = FetchEvent;

    fn next(&mut self) -> Option<FetchEvent> {
        self.recv()
    }
}

impl Drop for FetchPool {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.held = None;
        // Delete anything fetched but never consumed.
        while let Some((event, _)) = self.event_rx.blocking_recv() {
            if let Ok(file) = event.result {
                remove_partition_file(&file.path);
            }
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
