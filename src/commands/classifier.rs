use crate::error::{ClassifierError, Result};
use crate::models::classify_types::{ClassifierState, ModelStatus, Verdict};
use crate::models::image_types::RawImage;
use crate::services::classifier::pipeline::ClassificationPipeline;
use crate::services::classifier::runtime::ModelRuntime;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Host-facing handle that runs classifications off the UI thread.
///
/// Results land in a single slot the presenter watches via [`subscribe`](Self::subscribe).
/// A newer request supersedes an older one: if an older request finishes
/// late, its verdict goes back to its caller but is not published.
pub struct ClassifierService<R: ModelRuntime> {
    pipeline: Arc<Mutex<ClassificationPipeline<R>>>,
    state: Arc<watch::Sender<ClassifierState>>,
    generation: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
    last_status: Arc<Mutex<ModelStatus>>,
}

impl<R: ModelRuntime> Clone for ClassifierService<R> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            state: self.state.clone(),
            generation: self.generation.clone(),
            in_flight: self.in_flight.clone(),
            last_status: self.last_status.clone(),
        }
    }
}

impl<R: ModelRuntime + 'static> ClassifierService<R> {
    pub fn new(pipeline: ClassificationPipeline<R>) -> Self {
        let (state, _) = watch::channel(ClassifierState::Idle);
        let status = pipeline.status();
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_status: Arc::new(Mutex::new(status)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ClassifierState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> ClassifierState {
        self.state.borrow().clone()
    }

    /// Resets the slot, e.g. when the user picks a new image. Pending results are discarded.
    pub fn clear(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        publish_if_current(
            &self.state,
            &self.generation,
            generation,
            ClassifierState::Idle,
        );
    }

    pub fn status(&self) -> ModelStatus {
        let mut status = lock(&self.last_status).clone();
        status.processing = self.in_flight.load(Ordering::SeqCst) > 0;
        status
    }

    /// Stages and loads the model on a blocking worker.
    pub async fn warm_up(&self) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let last_status = self.last_status.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&pipeline);
            let result = guard.warm_up();
            *lock(&last_status) = guard.status();
            result
        })
        .await
        .map_err(|e| ClassifierError::inference(format!("model loading task failed: {}", e)))?
    }

    /// Classifies `image` on a blocking worker and publishes the verdict.
    ///
    /// The request runs to completion even if this future is dropped, so the
    /// slot never stays stuck in `Processing`.
    pub async fn classify(&self, image: RawImage) -> Verdict {
        self.submit(image).await.unwrap_or_else(|e| {
            log::warn!("Classification task failed: {}", e);
            Verdict::from(&ClassifierError::inference(format!(
                "classification task failed: {}",
                e
            )))
        })
    }

    /// Starts a classification and returns a handle to its verdict.
    ///
    /// Dropping or aborting the handle does not cancel the request.
    pub fn submit(&self, image: RawImage) -> JoinHandle<Verdict> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        publish_if_current(
            &self.state,
            &self.generation,
            generation,
            ClassifierState::Processing,
        );
        let in_flight = InFlight::start(self.in_flight.clone());

        let pipeline = self.pipeline.clone();
        let last_status = self.last_status.clone();
        let state = self.state.clone();
        let current = self.generation.clone();
        tokio::task::spawn_blocking(move || {
            let evaluated = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut guard = lock(&pipeline);
                let verdict = guard.evaluate(&image);
                *lock(&last_status) = guard.status();
                verdict
            }));
            let verdict = evaluated.unwrap_or_else(|_| {
                log::warn!("Classification request {} panicked", generation);
                Verdict::from(&ClassifierError::inference("classification panicked"))
            });
            drop(in_flight);

            let ready = ClassifierState::Ready(verdict.clone());
            if !publish_if_current(&state, &current, generation, ready) {
                log::debug!("Dropping verdict of superseded request {}", generation);
            }
            verdict
        })
    }
}

/// Writes `next` into the slot only while `generation` is the newest request.
///
/// The check runs under the channel's lock, so it is ordered against every
/// other write to the slot.
fn publish_if_current(
    state: &watch::Sender<ClassifierState>,
    current: &AtomicU64,
    generation: u64,
    next: ClassifierState,
) -> bool {
    state.send_if_modified(|slot| {
        if current.load(Ordering::SeqCst) != generation {
            return false;
        }
        *slot = next;
        true
    })
}

/// Counts a request as in flight until dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn start(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// A panicked request leaves the pipeline usable, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_request_cannot_overwrite_slot() {
        let (state, _rx) = watch::channel(ClassifierState::Idle);
        let current = AtomicU64::new(2);

        // Request 1 was superseded before it got to announce itself.
        assert!(!publish_if_current(
            &state,
            &current,
            1,
            ClassifierState::Processing
        ));
        assert_eq!(*state.borrow(), ClassifierState::Idle);

        assert!(publish_if_current(
            &state,
            &current,
            2,
            ClassifierState::Processing
        ));
        assert_eq!(*state.borrow(), ClassifierState::Processing);
    }

    #[test]
    fn in_flight_guard_releases_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = InFlight::start(counter.clone());
        let second = InFlight::start(counter.clone());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        drop(first);
        drop(second);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
