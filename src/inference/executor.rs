//! `InferenceExecutor`: admission control plus blocking execution of jobs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::JobError;
use crate::config::ExecutorConfig;
use crate::imaging::{ImagePipeline, StylizedImage};
use crate::style::{ModelCache, StyleId};

/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct InferenceExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    pipeline: ImagePipeline,
    cache: Arc<ModelCache>,
    permits: Arc<Semaphore>,
    workers: usize,
    queue_timeout: Duration,
    in_flight: AtomicUsize,
}

impl std::fmt::Debug for InferenceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceExecutor")
            .field("workers", &self.inner.workers)
            .field("queue_timeout", &self.inner.queue_timeout)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Decrements the in-flight gauge when a job's blocking closure ends,
/// including by unwinding.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InferenceExecutor {
    pub fn new(
        pipeline: ImagePipeline,
        cache: Arc<ModelCache>,
        workers: usize,
        queue_timeout: Duration,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            inner: Arc::new(Inner {
                pipeline,
                cache,
                permits: Arc::new(Semaphore::new(workers)),
                workers,
                queue_timeout,
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn from_config(
        pipeline: ImagePipeline,
        cache: Arc<ModelCache>,
        config: &ExecutorConfig,
    ) -> Self {
        Self::new(
            pipeline,
            cache,
            config.worker_count(),
            config.queue_timeout(),
        )
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Jobs currently holding a worker.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// The pipeline jobs run through, shared with callers that need to
    /// validate photos up front.
    pub fn pipeline(&self) -> &ImagePipeline {
        &self.inner.pipeline
    }

    /// Wait for a worker, then stylize `photo` with `style`.
    ///
    /// Dropping the returned future before a worker is granted withdraws
    /// the job.  Once granted, the blocking work runs to completion and
    /// holds its worker until it does, even if the caller goes away.
    pub async fn execute(&self, style: StyleId, photo: Vec<u8>) -> Result<StylizedImage, JobError> {
        let queued = Instant::now();
        let acquire = Arc::clone(&self.inner.permits).acquire_owned();
        let permit = match tokio::time::timeout(self.inner.queue_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(JobError::ShuttingDown),
            Err(_elapsed) => {
                log::warn!(
                    "executor: {style} timed out after {} ms in queue",
                    queued.elapsed().as_millis()
                );
                return Err(JobError::QueueTimeout(self.inner.queue_timeout));
            }
        };
        let waited = queued.elapsed();

        let inner = Arc::clone(&self.inner);
        let job = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _gauge = InFlight::enter(&inner.in_flight);
            inner.run(style, &photo, waited)
        });

        match job.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                log::error!("executor: job for {style} panicked");
                Err(JobError::Internal("inference job panicked".into()))
            }
            Err(e) => Err(JobError::Internal(e.to_string())),
        }
    }

    /// Run [`execute`](Self::execute) on its own task.
    pub fn submit(
        &self,
        style: StyleId,
        photo: Vec<u8>,
    ) -> JoinHandle<Result<StylizedImage, JobError>> {
        let this = self.clone();
        tokio::spawn(async move { this.execute(style, photo).await })
    }

    /// Stop admitting jobs.  Jobs already running finish; queued ones fail
    /// with [`JobError::ShuttingDown`].
    pub fn close(&self) {
        self.inner.permits.close();
        log::info!("executor: closed");
    }
}

impl Inner {
    fn run(&self, style: StyleId, photo: &[u8], waited: Duration) -> Result<StylizedImage, JobError> {
        let started = Instant::now();

        let input = self.pipeline.preprocess(photo)?;
        let network = self.cache.get(style)?;
        let output = network.stylize(&input)?;
        drop(input);
        drop(network);

        let image = self.pipeline.postprocess(&output)?;
        log::info!(
            "executor: {style} {}x{} done in {} ms (queued {} ms)",
            image.width,
            image.height,
            started.elapsed().as_millis(),
            waited.as_millis()
        );
        Ok(image)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
