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
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, warn, Instrument, Level};

use super::{HostError, HostLauncher};
use crate::audio::AudioOutput;
use crate::cache::ResourceCache;
use crate::messages::HostMessage;
use crate::playback::PlaybackEngine;
use crate::store::SoundStore;

/// Messages the context can hold before senders wait.
pub const HOST_QUEUE_SIZE: usize = 16;

/// The result of a play request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayOutcome {
    /// A session with the given id started.
    Started(u64),

    /// The sound couldn't be loaded or played. Nothing is audible.
    NotAvailable,
}

/// The context that owns the cache and the playback engine.
pub struct HostContext<S: SoundStore, O: AudioOutput> {
    cache: ResourceCache<S>,
    engine: PlaybackEngine<O>,
}

impl<S: SoundStore, O: AudioOutput> HostContext<S, O> {
    pub fn new(cache: ResourceCache<S>, engine: PlaybackEngine<O>) -> HostContext<S, O> {
        HostContext { cache, engine }
    }

    pub fn cache(&self) -> &ResourceCache<S> {
        &self.cache
    }

    pub fn engine(&self) -> &PlaybackEngine<O> {
        &self.engine
    }

    /// Handles one message. Failures are logged, never returned: a sound that
    /// can't play stays silent.
    pub async fn handle(&self, message: HostMessage) {
        match message {
            HostMessage::UpdateCache { active_ids } => self.update_cache(&active_ids).await,
            HostMessage::PlayAudio { id } => {
                self.play(&id).await;
            }
        }
    }

    /// Reconciles the cache against the given active set.
    pub async fn update_cache(&self, active_ids: &[String]) {
        if let Err(e) = self.cache.reconcile(active_ids).await {
            error!(err = %e, "Unable to update sound cache.");
        }
    }

    /// Plays the given sound, loading it first if it isn't cached.
    pub async fn play(&self, id: &str) -> PlayOutcome {
        let entry = match self.cache.resolve_for_play(id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(id, "Sound not available.");
                return PlayOutcome::NotAvailable;
            }
            Err(e) => {
                error!(id, err = %e, "Unable to load sound.");
                return PlayOutcome::NotAvailable;
            }
        };

        match self.engine.play(&entry) {
            Ok(session) => PlayOutcome::Started(session),
            Err(e) => {
                error!(id, err = %e, "Unable to play sound.");
                PlayOutcome::NotAvailable
            }
        }
    }
}

type ContextFactory<S, O> = dyn Fn() -> HostContext<S, O> + Send + Sync;

/// Runs the host context as a task in this process.
///
/// The task only accepts messages once it's running, so a send right after
/// create can fail with [`HostError::NotReady`].
pub struct LocalLauncher<S: SoundStore, O: AudioOutput> {
    factory: Box<ContextFactory<S, O>>,
    sender: Arc<Mutex<Option<mpsc::Sender<HostMessage>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    startup_delay: Duration,
    created: AtomicUsize,
}

impl<S: SoundStore, O: AudioOutput> LocalLauncher<S, O> {
    /// Creates a launcher. The factory builds a fresh context on every creation.
    pub fn new<F>(factory: F) -> LocalLauncher<S, O>
    where
        F: Fn() -> HostContext<S, O> + Send + Sync + 'static,
    {
        LocalLauncher {
            factory: Box::new(factory),
            sender: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
            startup_delay: Duration::ZERO,
            created: AtomicUsize::new(0),
        }
    }

    /// Delays the point at which a new context starts accepting messages.
    pub fn with_startup_delay(mut self, startup_delay: Duration) -> LocalLauncher<S, O> {
        self.startup_delay = startup_delay;
        self
    }

    /// Number of contexts created so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Shuts the running context down, if any.
    pub fn close(&self) {
        self.sender.lock().take();
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Host context closed.");
        }
    }

    fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn run(
        context: Arc<HostContext<S, O>>,
        sender_slot: Arc<Mutex<Option<mpsc::Sender<HostMessage>>>>,
        startup_delay: Duration,
    ) {
        if !startup_delay.is_zero() {
            tokio::time::sleep(startup_delay).await;
        }

        let (tx, mut rx) = mpsc::channel(HOST_QUEUE_SIZE);
        *sender_slot.lock() = Some(tx);
        info!("Host context running.");

        // Messages are handled independently; a slow load doesn't hold up a
        // later play.
        while let Some(message) = rx.recv().await {
            debug!(message = ?message, "Received message.");
            let context = context.clone();
            tokio::spawn(async move { context.handle(message).await });
        }
    }
}

impl<S: SoundStore, O: AudioOutput> HostLauncher for LocalLauncher<S, O> {
    async fn has_context(&self) -> bool {
        self.is_running()
    }

    async fn create(&self) -> Result<(), HostError> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(HostError::AlreadyExists);
        }

        self.sender.lock().take();
        let context = Arc::new((self.factory)());
        let span = span!(Level::INFO, "host context");
        *task = Some(tokio::spawn(
            Self::run(context, self.sender.clone(), self.startup_delay).instrument(span),
        ));
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn send(&self, message: HostMessage) -> Result<(), HostError> {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => sender.send(message).await.map_err(|_| HostError::Closed),
            None if self.is_running() => Err(HostError::NotReady),
            None => Err(HostError::Closed),
        }
    }
}

impl<S: SoundStore, O: AudioOutput> Drop for LocalLauncher<S, O> {
    fn drop(&mut self) {
        self.close();
    }
}
