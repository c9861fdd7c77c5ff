// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Lifecycle of the context that owns the cache and plays sounds.
//!
//! The context is created lazily and at most once at a time. Creation can
//! report success before the context is able to receive messages, so
//! delivery retries a bounded number of times.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::messages::HostMessage;

mod local;

pub use local::{HostContext, LocalLauncher, PlayOutcome};

/// How many times a message is sent before giving up.
pub const DELIVERY_ATTEMPTS: usize = 5;

/// The pause between delivery attempts.
pub const DELIVERY_BACKOFF: Duration = Duration::from_millis(100);

/// Error types for talking to the host context.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("Host context is not receiving messages yet")]
    NotReady,

    #[error("Host context has closed")]
    Closed,

    #[error("Host context already exists")]
    AlreadyExists,

    #[error("Unable to create host context: {0}")]
    Create(String),

    #[error("Host context creation task failed: {0}")]
    TaskFailed(String),
}

/// Error types for message delivery.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Unable to create host context: {0}")]
    Create(#[source] HostError),

    #[error("Delivery failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: usize,
        #[source]
        source: HostError,
    },
}

/// Creates and talks to a host context.
pub trait HostLauncher: Send + Sync + 'static {
    /// Returns true if a context exists, regardless of who created it.
    fn has_context(&self) -> impl Future<Output = bool> + Send;

    /// Creates the context. May return before the context can receive messages.
    fn create(&self) -> impl Future<Output = Result<(), HostError>> + Send;

    /// Sends one message to the context.
    fn send(&self, message: HostMessage) -> impl Future<Output = Result<(), HostError>> + Send;
}

/// The externally visible state of the lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostStatus {
    Absent,
    Creating,
    Ready,
}

type SharedCreation = Shared<BoxFuture<'static, Result<(), HostError>>>;

enum LifecycleState {
    Absent,
    Creating(SharedCreation),
    Ready,
}

struct Inner<L> {
    launcher: L,
    state: Mutex<LifecycleState>,
}

/// Makes sure exactly one host context exists and delivers messages to it.
pub struct HostLifecycle<L: HostLauncher> {
    inner: Arc<Inner<L>>,
}

impl<L: HostLauncher> Clone for HostLifecycle<L> {
    fn clone(&self) -> Self {
        HostLifecycle {
            inner: self.inner.clone(),
        }
    }
}

impl<L: HostLauncher> HostLifecycle<L> {
    pub fn new(launcher: L) -> HostLifecycle<L> {
        HostLifecycle {
            inner: Arc::new(Inner {
                launcher,
                state: Mutex::new(LifecycleState::Absent),
            }),
        }
    }

    pub fn launcher(&self) -> &L {
        &self.inner.launcher
    }

    pub fn status(&self) -> HostStatus {
        match &*self.inner.state.lock() {
            LifecycleState::Absent => HostStatus::Absent,
            LifecycleState::Creating(_) => HostStatus::Creating,
            LifecycleState::Ready => HostStatus::Ready,
        }
    }

    /// Makes sure the context exists. Concurrent callers share one creation,
    /// and all of them see its outcome.
    pub async fn ensure(&self) -> Result<(), HostError> {
        let creation = {
            let mut state = self.inner.state.lock();
            match &*state {
                LifecycleState::Ready => return Ok(()),
                LifecycleState::Creating(creation) => creation.clone(),
                LifecycleState::Absent => {
                    let creation = self.inner.start_creation();
                    *state = LifecycleState::Creating(creation.clone());
                    creation
                }
            }
        };
        creation.await
    }

    /// Sends a message to the context, creating it first if needed. Failed
    /// sends are retried up to [`DELIVERY_ATTEMPTS`] times, [`DELIVERY_BACKOFF`]
    /// apart.
    pub async fn deliver(&self, message: HostMessage) -> Result<(), DeliveryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.ensure().await {
                Ok(()) => self.inner.launcher.send(message.clone()).await,
                Err(e) if attempt == 1 => return Err(DeliveryError::Create(e)),
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if err == HostError::Closed {
                self.invalidate();
            }
            if attempt >= DELIVERY_ATTEMPTS {
                error!(attempts = attempt, err = %err, "Delivery failed.");
                return Err(DeliveryError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            debug!(attempt, err = %err, "Delivery failed, retrying.");
            tokio::time::sleep(DELIVERY_BACKOFF).await;
        }
    }

    /// Forgets a context that turned out to be gone, so the next ensure
    /// creates a new one.
    fn invalidate(&self) {
        let mut state = self.inner.state.lock();
        if matches!(*state, LifecycleState::Ready) {
            info!("Host context went away.");
            *state = LifecycleState::Absent;
        }
    }
}

impl<L: HostLauncher> Inner<L> {
    /// Spawns the creation. The task settles the state itself so the outcome
    /// lands even if every caller stops waiting.
    fn start_creation(self: &Arc<Self>) -> SharedCreation {
        let task = {
            let inner = self.clone();
            tokio::spawn(async move {
                let result = inner.create().await;
                *inner.state.lock() = match result {
                    Ok(()) => LifecycleState::Ready,
                    Err(_) => LifecycleState::Absent,
                };
                result
            })
        };

        let inner = self.clone();
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(err = %e, "Host context creation task failed.");
                    *inner.state.lock() = LifecycleState::Absent;
                    Err(HostError::TaskFailed(e.to_string()))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn create(&self) -> Result<(), HostError> {
        if self.launcher.has_context().await {
            debug!("Adopting existing host context.");
            return Ok(());
        }

        info!("Creating host context.");
        match self.launcher.create().await {
            Ok(()) => {
                info!("Host context created.");
                Ok(())
            }
            Err(HostError::AlreadyExists) => {
                debug!("Host context appeared during creation.");
                Ok(())
            }
            Err(e) => {
                error!(err = %e, "Unable to create host context.");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::Semaphore;

    use super::*;

    #[derive(Default)]
    struct FakeLauncher {
        exists: AtomicBool,
        creates: AtomicUsize,
        sends: AtomicUsize,
        create_gate: Option<Arc<Semaphore>>,
        create_results: Mutex<VecDeque<Result<(), HostError>>>,
        send_results: Mutex<VecDeque<Result<(), HostError>>>,
    }

    impl FakeLauncher {
        fn failing_sends(count: usize, err: HostError) -> FakeLauncher {
            let launcher = FakeLauncher::default();
            launcher
                .send_results
                .lock()
                .extend(std::iter::repeat(Err(err)).take(count));
            launcher
        }

        fn creates(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
        }

        fn sends(&self) -> usize {
            self.sends.load(Ordering::SeqCst)
        }
    }

    impl HostLauncher for FakeLauncher {
        async fn has_context(&self) -> bool {
            self.exists.load(Ordering::SeqCst)
        }

        async fn create(&self) -> Result<(), HostError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.create_gate {
                gate.acquire().await.unwrap().forget();
            }
            let result = self.create_results.lock().pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.exists.store(true, Ordering::SeqCst);
            }
            result
        }

        async fn send(&self, _message: HostMessage) -> Result<(), HostError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            self.send_results.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn play() -> HostMessage {
        HostMessage::PlayAudio {
            id: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_once() {
        let gate = Arc::new(Semaphore::new(0));
        let lifecycle = HostLifecycle::new(FakeLauncher {
            create_gate: Some(gate.clone()),
            ..Default::default()
        });

        let (first, second, third, _) = tokio::join!(
            lifecycle.ensure(),
            lifecycle.ensure(),
            lifecycle.ensure(),
            async {
                assert_eq!(lifecycle.status(), HostStatus::Creating);
                gate.add_permits(1);
            }
        );

        assert_eq!(first, Ok(()));
        assert_eq!(second, Ok(()));
        assert_eq!(third, Ok(()));
        assert_eq!(lifecycle.launcher().creates(), 1);
        assert_eq!(lifecycle.status(), HostStatus::Ready);

        lifecycle.ensure().await.unwrap();
        assert_eq!(lifecycle.launcher().creates(), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_returns_to_absent() {
        let launcher = FakeLauncher::default();
        launcher
            .create_results
            .lock()
            .push_back(Err(HostError::Create("no audio".to_string())));
        let lifecycle = HostLifecycle::new(launcher);

        let (first, second) = tokio::join!(lifecycle.ensure(), lifecycle.ensure());
        assert_eq!(first, Err(HostError::Create("no audio".to_string())));
        assert_eq!(second, first);
        assert_eq!(lifecycle.status(), HostStatus::Absent);
        assert_eq!(lifecycle.launcher().creates(), 1);

        lifecycle.ensure().await.unwrap();
        assert_eq!(lifecycle.status(), HostStatus::Ready);
        assert_eq!(lifecycle.launcher().creates(), 2);
    }

    #[tokio::test]
    async fn test_existing_context_adopted() {
        let launcher = FakeLauncher::default();
        launcher.exists.store(true, Ordering::SeqCst);
        let lifecycle = HostLifecycle::new(launcher);

        lifecycle.ensure().await.unwrap();
        assert_eq!(lifecycle.status(), HostStatus::Ready);
        assert_eq!(lifecycle.launcher().creates(), 0);
    }

    #[tokio::test]
    async fn test_already_exists_counts_as_created() {
        let launcher = FakeLauncher::default();
        launcher
            .create_results
            .lock()
            .push_back(Err(HostError::AlreadyExists));
        let lifecycle = HostLifecycle::new(launcher);

        lifecycle.ensure().await.unwrap();
        assert_eq!(lifecycle.status(), HostStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_succeeds_on_last_attempt() {
        let lifecycle = HostLifecycle::new(FakeLauncher::failing_sends(4, HostError::NotReady));

        let start = tokio::time::Instant::now();
        lifecycle.deliver(play()).await.unwrap();

        assert_eq!(lifecycle.launcher().sends(), 5);
        let elapsed = start.elapsed();
        assert!(elapsed >= DELIVERY_BACKOFF * 4);
        assert!(elapsed < DELIVERY_BACKOFF * 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_short_circuits() {
        let lifecycle = HostLifecycle::new(FakeLauncher::failing_sends(1, HostError::NotReady));
        lifecycle.deliver(play()).await.unwrap();
        assert_eq!(lifecycle.launcher().sends(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_exhausted() {
        let lifecycle = HostLifecycle::new(FakeLauncher::failing_sends(10, HostError::NotReady));

        match lifecycle.deliver(play()).await {
            Err(DeliveryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, DELIVERY_ATTEMPTS);
                assert_eq!(source, HostError::NotReady);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(lifecycle.launcher().sends(), 5);
    }

    #[tokio::test]
    async fn test_delivery_creation_failure() {
        let launcher = FakeLauncher::default();
        launcher
            .create_results
            .lock()
            .push_back(Err(HostError::Create("no audio".to_string())));
        let lifecycle = HostLifecycle::new(launcher);

        assert!(matches!(
            lifecycle.deliver(play()).await,
            Err(DeliveryError::Create(_))
        ));
        assert_eq!(lifecycle.launcher().sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_context_is_recreated() {
        let lifecycle = HostLifecycle::new(FakeLauncher::failing_sends(1, HostError::Closed));
        lifecycle.ensure().await.unwrap();
        lifecycle.launcher().exists.store(false, Ordering::SeqCst);

        lifecycle.deliver(play()).await.unwrap();
        assert_eq!(lifecycle.launcher().creates(), 2);
        assert_eq!(lifecycle.launcher().sends(), 2);
    }
}
