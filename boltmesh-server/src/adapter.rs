//! Named listener registry.
//!
//! [`ListenerAdapter`] owns every running listener by name and applies
//! configuration changes to them. Changing a listener's bind address
//! restarts it; every other change is applied in place and reaches new
//! connections only.

use crate::config::{ListenerConfig, TlsConfig};
use crate::error::ServerError;
use crate::listener::ActiveListener;
use dashmap::DashMap;
use std::sync::Arc;

/// Registry of running listeners keyed by name.
#[derive(Debug, Default)]
pub struct ListenerAdapter {
    listeners: DashMap<String, Arc<ActiveListener>>,
}

impl ListenerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a listener, or updates the one already registered under the
    /// same name.
    pub async fn add_or_update_listener(
        &self,
        config: ListenerConfig,
    ) -> Result<Arc<ActiveListener>, ServerError> {
        config.validate()?;

        // clone out so no map guard is held across an await
        let existing = self.find_listener(&config.name);
        if let Some(existing) = existing {
            if existing.config().bind_addr == config.bind_addr {
                existing.update(config)?;
                return Ok(existing);
            }
            tracing::info!(
                "[{}] bind address changed to {}, restarting",
                config.name,
                config.bind_addr
            );
            if let Some((_, old)) = self.listeners.remove(existing.name()) {
                old.stop().await;
            }
            let replacement = ActiveListener::start(config).await?;
            self.register(replacement.clone()).await;
            return Ok(replacement);
        }

        let listener = ActiveListener::start(config).await?;
        self.register(listener.clone()).await;
        Ok(listener)
    }

    async fn register(&self, listener: Arc<ActiveListener>) {
        let name = listener.name().to_string();
        if let Some(previous) = self.listeners.insert(name, listener) {
            previous.stop().await;
        }
    }

    /// Stops and removes the named listener.
    pub async fn delete_listener(&self, name: &str) -> Result<(), ServerError> {
        let (_, listener) = self
            .listeners
            .remove(name)
            .ok_or_else(|| ServerError::ListenerNotFound(name.to_string()))?;
        listener.stop().await;
        tracing::info!("[{}] listener removed", name);
        Ok(())
    }

    /// Replaces the named listener's TLS settings.
    pub fn update_listener_tls(&self, name: &str, tls: TlsConfig) -> Result<(), ServerError> {
        let listener = self
            .find_listener(name)
            .ok_or_else(|| ServerError::ListenerNotFound(name.to_string()))?;
        listener.update_tls(tls)
    }

    pub fn find_listener(&self, name: &str) -> Option<Arc<ActiveListener>> {
        self.listeners.get(name).map(|entry| entry.value().clone())
    }

    /// Names of all registered listeners, sorted.
    pub fn listener_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Stops every listener.
    pub async fn shutdown(&self) {
        let names = self.listener_names();
        for name in names {
            if let Some((_, listener)) = self.listeners.remove(&name) {
                listener.stop().await;
            }
        }
        tracing::info!("all listeners stopped");
    }
}
