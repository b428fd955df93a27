//! Per-tab polling for views that show one live table at a time.
//!
//! Switching tabs never reconfigures a running instance: the old tab's
//! instance is stopped and a fresh one is created for the new tab.

use std::fmt;

use tracing::debug;

use crate::config::PollingConfig;
use crate::error::Result;
use crate::scheduler::{PollingInstance, PollingService};

/// Owns at most one active [`PollingInstance`], keyed by tab.
pub struct TabPoller<K, T> {
    service: PollingService,
    active: Option<(K, PollingInstance<T>)>,
}

impl<K, T> TabPoller<K, T>
where
    K: PartialEq + fmt::Debug,
    T: Send + Sync + 'static,
{
    pub fn new(service: PollingService) -> Self {
        Self {
            service,
            active: None,
        }
    }

    /// Make `key` the active tab.
    ///
    /// Re-selecting the active tab keeps its running instance. Otherwise the
    /// previous instance is stopped before the new one is created.
    ///
    /// # Errors
    /// Configuration errors from [`PollingService::create_polling`]. The
    /// previous tab is already stopped when this fails.
    pub fn switch(&mut self, key: K, config: PollingConfig<T>) -> Result<&PollingInstance<T>> {
        match self.active.take() {
            Some((current, instance)) if current == key => {
                return Ok(&self.active.insert((current, instance)).1);
            }
            Some((old, instance)) => {
                instance.stop();
                debug!(from = ?old, to = ?key, "switching polling tab");
            }
            None => {}
        }
        let instance = self.service.create_polling(config)?;
        Ok(&self.active.insert((key, instance)).1)
    }
}

impl<K, T> TabPoller<K, T> {
    pub fn active_key(&self) -> Option<&K> {
        self.active.as_ref().map(|(k, _)| k)
    }

    pub fn active(&self) -> Option<&PollingInstance<T>> {
        self.active.as_ref().map(|(_, instance)| instance)
    }

    /// Stop and release the active tab, returning its key.
    pub fn stop(&mut self) -> Option<K> {
        self.active.take().map(|(key, instance)| {
            instance.stop();
            key
        })
    }
}
