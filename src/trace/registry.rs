// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Table of live traces.
//!
//! A registry creates managers over one shared driver, records a
//! [`TraceInfo`] for each, and hands them back by ID. Registries are plain
//! values; a process may hold as many as it likes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::TraceConfig;
use crate::driver::{open_driver, TraceDriver};
use crate::error::{Result, TraceError};
use crate::types::{now_secs, TraceInfo, TraceOption, TraceStatus};

use super::hub::HubConfig;
use super::id::{IdGenerator, NanoIdGenerator};
use super::manager::{ManagerOptions, TraceManager};

pub struct TraceRegistry {
    driver: Arc<dyn TraceDriver>,
    ids: Arc<dyn IdGenerator>,
    hub: HubConfig,
    managers: RwLock<HashMap<String, TraceManager>>,
    /// Serializes creation so the duplicate check and the insert agree.
    create_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for TraceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRegistry")
            .field("driver", &self.driver.name())
            .field("loaded", &self.loaded_ids())
            .finish()
    }
}

impl TraceRegistry {
    pub fn new(driver: Arc<dyn TraceDriver>) -> Self {
        Self::with_options(driver, ManagerOptions::default())
    }

    pub fn with_options(driver: Arc<dyn TraceDriver>, options: ManagerOptions) -> Self {
        Self {
            driver,
            ids: options.ids,
            hub: options.hub,
            managers: RwLock::new(HashMap::new()),
            create_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Open the configured driver and use the configured hub settings.
    pub fn from_config(config: &TraceConfig) -> Result<Self> {
        let driver = open_driver(config)
            .map_err(|e| TraceError::persistence("failed to open driver", e))?;
        Ok(Self::with_options(
            driver,
            ManagerOptions {
                ids: Arc::new(NanoIdGenerator::new()),
                hub: config.hub_config(),
            },
        ))
    }

    pub fn driver(&self) -> &Arc<dyn TraceDriver> {
        &self.driver
    }

    /// Start a new trace that can never be cancelled.
    pub async fn create(&self, option: TraceOption) -> Result<(String, TraceManager)> {
        let (_tx, rx) = watch::channel(false);
        self.create_cancellable(option, rx).await
    }

    /// Start a new trace bound to a cancellation signal.
    #[instrument(skip_all, fields(trace_id))]
    pub async fn create_cancellable(
        &self,
        option: TraceOption,
        cancel: watch::Receiver<bool>,
    ) -> Result<(String, TraceManager)> {
        let _gate = self.create_gate.lock().await;

        let trace_id = match option.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.ids.trace_id(),
        };
        tracing::Span::current().record("trace_id", trace_id.as_str());

        if self.is_loaded(&trace_id) {
            return Err(TraceError::Validation(format!(
                "trace already loaded: {}",
                trace_id
            )));
        }
        let existing = self
            .driver
            .load_trace_info(&trace_id)
            .await
            .map_err(|e| TraceError::persistence("failed to check trace info", e))?;
        if existing.is_some() {
            return Err(TraceError::Validation(format!(
                "trace already exists: {}",
                trace_id
            )));
        }

        let manager = TraceManager::builder(trace_id.as_str(), self.driver.clone())
            .cancel(cancel)
            .id_generator(self.ids.clone())
            .hub_config(self.hub)
            .build()
            .await?;

        let now = now_secs();
        let info = TraceInfo {
            id: trace_id.clone(),
            driver: self.driver.name().to_string(),
            status: TraceStatus::Running,
            root_id: Some(manager.root_node().id),
            created_at: now,
            updated_at: now,
            created_by: option.created_by,
            team_id: option.team_id,
            tenant_id: option.tenant_id,
            metadata: option.metadata,
        };
        if let Err(e) = self.driver.save_trace_info(&info).await {
            // Drop the root so the ID can be created again
            if let Err(cleanup) = self.driver.delete_trace(&trace_id).await {
                warn!(trace_id = %trace_id, error = %cleanup, "failed to roll back trace");
            }
            return Err(TraceError::persistence("failed to save trace info", e));
        }

        self.write_managers().insert(trace_id.clone(), manager.clone());
        info!(trace_id = %trace_id, driver = self.driver.name(), "trace created");

        Ok((trace_id, manager))
    }

    pub fn get(&self, id: &str) -> Option<TraceManager> {
        self.read_managers().get(id).cloned()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.read_managers().contains_key(id)
    }

    /// IDs of live managers, sorted.
    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_managers().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Record the final status of a trace. `Completed` also marks the live
    /// manager complete, publishing its `complete` event.
    #[instrument(skip(self))]
    pub async fn finish(&self, id: &str, status: TraceStatus) -> Result<()> {
        if status == TraceStatus::Completed {
            if let Some(manager) = self.get(id) {
                manager.mark_complete();
            }
        }

        let mut info = self
            .load_info(id)
            .await?
            .ok_or_else(|| TraceError::trace_not_found(id))?;
        info.status = status;
        info.updated_at = now_secs();
        self.driver
            .save_trace_info(&info)
            .await
            .map_err(|e| TraceError::persistence("failed to update trace info", e))?;

        debug!(trace_id = %id, status = %status, "trace finished");
        Ok(())
    }

    /// Forget a live manager. Persisted data stays.
    pub fn release(&self, id: &str) -> bool {
        self.write_managers().remove(id).is_some()
    }

    /// Release the manager and remove everything the driver holds for it.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.release(id);
        self.driver
            .delete_trace(id)
            .await
            .map_err(|e| TraceError::persistence("failed to delete trace", e))?;
        info!(trace_id = %id, "trace deleted");
        Ok(())
    }

    pub async fn load_info(&self, id: &str) -> Result<Option<TraceInfo>> {
        self.driver
            .load_trace_info(id)
            .await
            .map_err(|e| TraceError::persistence("failed to load trace info", e))
    }

    fn read_managers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, TraceManager>> {
        self.managers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_managers(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, TraceManager>> {
        self.managers.write().unwrap_or_else(|e| e.into_inner())
    }
}
