use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

type EvictFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Cancellable idle timer around an eviction action.
///
/// Arming schedules a deadline task; when it elapses the task only enqueues
/// the arm's generation onto a worker owned by this evictor, and the worker
/// runs the eviction. Deadlines superseded by a later `arm` or `cancel` are
/// dropped by the worker, so each arm fires at most once.
pub struct IdleEvictor {
    name: String,
    timeout: Duration,
    state: Arc<Mutex<TimerState>>,
    deadlines: mpsc::UnboundedSender<u64>,
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    pending: Option<JoinHandle<()>>,
    /// Calls currently holding the backend busy
    active: usize,
}

impl TimerState {
    fn disarm(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.generation += 1;
    }
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IdleEvictor {
    /// Create an evictor. Must be called from within a tokio runtime.
    pub fn new<F, Fut>(name: impl Into<String>, timeout: Duration, evict: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let evict: EvictFn = Arc::new(move || evict().boxed());
        let state = Arc::new(Mutex::new(TimerState::default()));
        let (deadlines, mut expired) = mpsc::unbounded_channel::<u64>();

        let worker_state = state.clone();
        let worker_name = name.clone();
        tokio::spawn(async move {
            while let Some(generation) = expired.recv().await {
                {
                    let mut state = lock(&worker_state);
                    if state.generation != generation {
                        debug!(backend = %worker_name, "Dropping superseded idle deadline");
                        continue;
                    }
                    state.pending = None;
                }
                info!(backend = %worker_name, "Idle timeout elapsed, evicting");
                evict().await;
            }
        });

        Self {
            name,
            timeout,
            state,
            deadlines,
        }
    }

    /// Schedule eviction after the timeout, replacing any pending schedule
    pub fn arm(&self) {
        let mut state = lock(&self.state);
        self.arm_locked(&mut state);
    }

    fn arm_locked(&self, state: &mut TimerState) {
        state.disarm();
        let generation = state.generation;
        let deadlines = self.deadlines.clone();
        let timeout = self.timeout;
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = deadlines.send(generation);
        }));
        debug!(backend = %self.name, timeout_secs = timeout.as_secs(), "Idle timer armed");
    }

    /// Prevent a pending eviction. No-op when nothing is armed.
    pub fn cancel(&self) {
        lock(&self.state).disarm();
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.state)
            .pending
            .as_ref()
            .is_some_and(|pending| !pending.is_finished())
    }

    /// Mark the backend busy for the lifetime of the returned guard.
    ///
    /// The timer is cancelled on entry and re-armed when the last
    /// outstanding hold is released.
    pub fn hold(&self) -> IdleHold<'_> {
        let mut state = lock(&self.state);
        state.active += 1;
        state.disarm();
        IdleHold { evictor: self }
    }
}

impl Drop for IdleEvictor {
    fn drop(&mut self) {
        // Aborting the deadline task drops its sender; the worker exits once
        // every sender is gone.
        lock(&self.state).disarm();
    }
}

/// Busy marker returned by [`IdleEvictor::hold`]
pub struct IdleHold<'a> {
    evictor: &'a IdleEvictor,
}

impl Drop for IdleHold<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.evictor.state);
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            self.evictor.arm_locked(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_evictor(timeout: Duration) -> (IdleEvictor, Arc<AtomicUsize>) {
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = evictions.clone();
        let evictor = IdleEvictor::new("test", timeout, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (evictor, evictions)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_timeout() {
        let (evictor, evictions) = counting_evictor(Duration::from_secs(60));

        evictor.arm();
        assert!(evictor.is_armed());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
        assert!(!evictor.is_armed());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_schedule() {
        let (evictor, evictions) = counting_evictor(Duration::from_secs(60));

        evictor.arm();
        tokio::time::sleep(Duration::from_secs(30)).await;
        evictor.arm();

        // The first deadline has passed but was superseded
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_eviction() {
        let (evictor, evictions) = counting_evictor(Duration::from_secs(10));

        // Cancelling while disarmed is a no-op
        evictor.cancel();
        assert!(!evictor.is_armed());

        evictor.arm();
        evictor.cancel();
        assert!(!evictor.is_armed());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_rearms_after_last_release() {
        let (evictor, evictions) = counting_evictor(Duration::from_secs(10));

        evictor.arm();
        let first = evictor.hold();
        assert!(!evictor.is_armed());

        let second = evictor.hold();
        drop(first);
        assert!(!evictor.is_armed());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 0);

        drop(second);
        assert!(evictor.is_armed());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
    }
}
