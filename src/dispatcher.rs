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
use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, warn, Instrument, Level};

use crate::config::{ConfigError, SettingsStore};
use crate::host::{DeliveryError, HostLauncher, HostLifecycle};
use crate::messages::{HostMessage, TriggerMessage};

/// Error types for the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unable to read settings: {0}")]
    Settings(#[from] ConfigError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Turns trigger messages into host messages.
pub struct Dispatcher<L: HostLauncher, C: SettingsStore> {
    lifecycle: HostLifecycle<L>,
    settings: Arc<C>,
}

impl<L: HostLauncher, C: SettingsStore> Clone for Dispatcher<L, C> {
    fn clone(&self) -> Self {
        Dispatcher {
            lifecycle: self.lifecycle.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<L: HostLauncher, C: SettingsStore> Dispatcher<L, C> {
    pub fn new(lifecycle: HostLifecycle<L>, settings: Arc<C>) -> Dispatcher<L, C> {
        Dispatcher {
            lifecycle,
            settings,
        }
    }

    pub fn lifecycle(&self) -> &HostLifecycle<L> {
        &self.lifecycle
    }

    /// Handles one trigger message.
    pub async fn handle(&self, message: TriggerMessage) -> Result<(), DispatchError> {
        match message {
            TriggerMessage::TriggerPlay => self.trigger_play().await,
            TriggerMessage::SoundUpdated => self.sound_updated().await,
        }
    }

    /// Asks the host to play a random sound from the active set. Does nothing
    /// while triggers are disabled.
    pub async fn trigger_play(&self) -> Result<(), DispatchError> {
        let settings = self.settings.load().await?;
        if !settings.is_enabled() {
            debug!("Triggers disabled, ignoring play.");
            return Ok(());
        }

        let id = settings.active_ids().choose().to_string();
        debug!(id = id.as_str(), "Requesting play.");
        self.lifecycle.deliver(HostMessage::PlayAudio { id }).await?;
        Ok(())
    }

    /// Tells the host to reconcile its cache against the current active set.
    pub async fn sound_updated(&self) -> Result<(), DispatchError> {
        let settings = self.settings.load().await?;
        let active_ids = settings.active_ids().ids().to_vec();
        self.lifecycle
            .deliver(HostMessage::UpdateCache { active_ids })
            .await?;
        Ok(())
    }

    /// Pre-loads the active sounds. Failure is logged; the next trigger tries
    /// again.
    pub async fn warm_up(&self) {
        if let Err(e) = self.sound_updated().await {
            warn!(err = %e, "Unable to warm up sound cache.");
        }
    }

    /// Warms up the cache, then handles trigger messages until the channel
    /// closes. Each message is handled on its own task.
    pub fn spawn(self, mut events_rx: Receiver<TriggerMessage>) -> JoinHandle<()> {
        let span = span!(Level::INFO, "dispatcher");
        tokio::spawn(
            async move {
                {
                    let dispatcher = self.clone();
                    tokio::spawn(async move { dispatcher.warm_up().await }.in_current_span());
                }

                info!("Dispatcher started.");
                while let Some(message) = events_rx.recv().await {
                    debug!(message = ?message, "Received trigger.");
                    let dispatcher = self.clone();
                    tokio::spawn(
                        async move {
                            if let Err(e) = dispatcher.handle(message).await {
                                error!(err = %e, "Unable to dispatch trigger.");
                            }
                        }
                        .in_current_span(),
                    );
                }
                info!("Dispatcher closing.");
            }
            .instrument(span),
        )
    }
}
