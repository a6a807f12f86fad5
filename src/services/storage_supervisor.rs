use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    dao::{storage::StorageError, store::SharedStore},
    state::SharedState,
};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const RECOVERY_ATTEMPTS: u32 = 3;

/// Doubling delay between connection attempts, capped at ten seconds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    current: Duration,
}

impl Backoff {
    pub(crate) const INITIAL: Duration = Duration::from_secs(1);
    pub(crate) const MAX: Duration = Duration::from_secs(10);

    pub(crate) fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Delay to wait now; the following call returns twice as much.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::MAX);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

/// Keeps a shared store installed in `state`.
///
/// While no store answers, the application reports degraded health and every
/// session shows its sync error until its own subscriptions come back.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SharedStore>, StorageError>> + Send,
{
    let mut backoff = Backoff::new();

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(error = %err, retry_in = ?delay, "shared store unreachable");
                sleep(delay).await;
                continue;
            }
        };

        state.set_store(store.clone()).await;
        info!(sessions = state.sessions().len(), "shared store installed");
        backoff.reset();

        monitor(&state, store.as_ref()).await;

        warn!("shared store lost; connecting from scratch");
        sleep(backoff.next_delay()).await;
    }
}

/// Poll the installed store until it stops answering and cannot be revived.
async fn monitor(state: &SharedState, store: &dyn SharedStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("shared store answering again");
                    state.update_degraded(false).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "shared store health check failed");
                state.update_degraded(true).await;
                if !recover(store).await {
                    return;
                }
                state.update_degraded(false).await;
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn recover(store: &dyn SharedStore) -> bool {
    let mut backoff = Backoff::new();
    for attempt in 1..=RECOVERY_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "shared store reconnected");
                return true;
            }
            Err(err) => {
                debug!(attempt, error = %err, "shared store reconnect failed");
                sleep(backoff.next_delay()).await;
            }
        }
    }
    warn!(attempts = RECOVERY_ATTEMPTS, "giving up on the current store handle");
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{content::StaticContentLoader, store::memory::MemoryStore},
        state::AppState,
    };

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Backoff::INITIAL);
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_until_the_store_answers_again() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(StaticContentLoader::empty()),
        );
        let store = MemoryStore::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let connect = {
            let store = store.clone();
            let attempts = attempts.clone();
            move || -> BoxFuture<'static, Result<Arc<dyn SharedStore>, StorageError>> {
                let store = store.clone();
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if attempt == 0 {
                        Err(StorageError::unavailable(
                            "first attempt refused".into(),
                            std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                        ))
                    } else {
                        Ok(Arc::new(store) as Arc<dyn SharedStore>)
                    }
                })
            }
        };

        assert!(state.is_degraded());
        let supervisor = tokio::spawn(run(state.clone(), connect));
        let mut degraded = state.degraded_watcher();

        degraded.wait_for(|flag| !*flag).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        store.set_available(false);
        degraded.wait_for(|flag| *flag).await.unwrap();

        store.set_available(true);
        degraded.wait_for(|flag| !*flag).await.unwrap();
        assert!(state.store().await.is_some());

        supervisor.abort();
    }
}
