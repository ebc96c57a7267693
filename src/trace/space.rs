// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Memory spaces: trace-scoped key/value scratch stores.
//!
//! The manager caches space metadata only. Entries are always read and
//! written through the driver.

#[cfg(feature = "telemetry")]
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{Result, TraceError};
use crate::types::{now_secs, TraceSpace, TraceSpaceData, TraceSpaceOption};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::manager::TraceManager;
use super::update::{MemoryAddData, MemoryDeleteData, SpaceDeletedData, UpdateData};

impl TraceManager {
    /// Create, persist and cache a new space.
    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id))]
    pub async fn create_space(&self, option: TraceSpaceOption) -> Result<TraceSpace> {
        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;

        let now = now_secs();
        let space = TraceSpace::new(self.inner.ids.node_id(), option, now);
        self.inner
            .driver
            .save_space(&self.inner.trace_id, &space)
            .await
            .map_err(|e| TraceError::persistence("failed to save space", e))?;

        self.state().spaces.insert(space.id.clone(), space.clone());
        self.publish(
            self.update(now, UpdateData::SpaceCreated(space.clone()))
                .for_space(space.id.as_str()),
        );
        debug!(space_id = %space.id, label = %space.option.label, "space created");

        Ok(space)
    }

    /// A space by ID: cache first, then the driver.
    pub async fn get_space(&self, id: &str) -> Result<TraceSpace> {
        let cached = self.state().spaces.get(id).cloned();
        if let Some(space) = cached {
            return Ok(space);
        }

        // A concurrent delete_space must not be undone by a stale load
        let _gate = self.inner.op_gate.lock().await;
        self.load_space_cached(id).await
    }

    /// Cache lookup then driver load. Callers hold the op gate.
    async fn load_space_cached(&self, id: &str) -> Result<TraceSpace> {
        let cached = self.state().spaces.get(id).cloned();
        if let Some(space) = cached {
            return Ok(space);
        }

        let loaded = self
            .inner
            .driver
            .load_space(&self.inner.trace_id, id)
            .await
            .map_err(|e| TraceError::persistence("failed to load space", e))?;

        match loaded {
            Some(space) => {
                self.state().spaces.insert(space.id.clone(), space.clone());
                Ok(space)
            }
            None => Err(TraceError::space_not_found(id)),
        }
    }

    /// Whether a space exists. Driver errors read as absent.
    pub async fn has_space(&self, id: &str) -> bool {
        if self.state().spaces.contains_key(id) {
            return true;
        }
        matches!(
            self.inner.driver.load_space(&self.inner.trace_id, id).await,
            Ok(Some(_))
        )
    }

    /// Delete a space and its entries.
    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id, space_id = %id))]
    pub async fn delete_space(&self, id: &str) -> Result<()> {
        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;

        self.inner
            .driver
            .delete_space(&self.inner.trace_id, id)
            .await
            .map_err(|e| TraceError::persistence("failed to delete space", e))?;
        self.state().spaces.remove(id);

        let now = now_secs();
        self.publish(
            self.update(
                now,
                UpdateData::SpaceDeleted(SpaceDeletedData {
                    space_id: id.to_string(),
                }),
            )
            .for_space(id),
        );
        debug!(space_id = %id, "space deleted");

        Ok(())
    }

    /// Every space of the trace. The driver is authoritative; if listing
    /// fails the cached spaces are returned instead.
    pub async fn list_spaces(&self) -> Vec<TraceSpace> {
        let ids = match self.inner.driver.list_spaces(&self.inner.trace_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(trace_id = %self.inner.trace_id, error = %e, "listing spaces failed, using cache");
                let mut cached: Vec<TraceSpace> = self.state().spaces.values().cloned().collect();
                cached.sort_by(|a, b| a.id.cmp(&b.id));
                return cached;
            }
        };

        let mut spaces = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(space) = self.get_space(&id).await {
                spaces.push(space);
            }
        }
        spaces
    }

    /// Write one entry and publish `memory_add`. The space must exist.
    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id, space_id = %space_id, key = %key))]
    pub async fn set_space_value(&self, space_id: &str, key: &str, value: Value) -> Result<()> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;

        let mut space = match self.load_space_cached(space_id).await {
            Ok(space) => space,
            Err(e) if e.is_not_found() => {
                return Err(TraceError::Validation(format!("space not found: {}", space_id)))
            }
            Err(e) => return Err(e),
        };

        let trace_id = self.inner.trace_id.as_str();
        self.inner
            .driver
            .set_space_key(trace_id, space_id, key, &value)
            .await
            .map_err(|e| TraceError::persistence("failed to set space value", e))?;

        let now = now_secs();
        space.updated_at = now;
        self.inner
            .driver
            .save_space(trace_id, &space)
            .await
            .map_err(|e| TraceError::persistence("failed to update space", e))?;
        self.state().spaces.insert(space.id.clone(), space.clone());

        self.publish(
            self.update(now, UpdateData::MemoryAdd(MemoryAddData::new(&space, key, value, now)))
                .for_space(space_id),
        );

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.manager.set_space_value", start.elapsed());

        Ok(())
    }

    pub async fn get_space_value(&self, space_id: &str, key: &str) -> Result<Option<Value>> {
        self.inner
            .driver
            .get_space_key(&self.inner.trace_id, space_id, key)
            .await
            .map_err(|e| TraceError::persistence("failed to get space value", e))
    }

    pub async fn has_space_value(&self, space_id: &str, key: &str) -> Result<bool> {
        self.inner
            .driver
            .has_space_key(&self.inner.trace_id, space_id, key)
            .await
            .map_err(|e| TraceError::persistence("failed to check space value", e))
    }

    /// Remove one entry and publish `memory_delete`.
    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id, space_id = %space_id, key = %key))]
    pub async fn delete_space_value(&self, space_id: &str, key: &str) -> Result<()> {
        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;

        self.inner
            .driver
            .delete_space_key(&self.inner.trace_id, space_id, key)
            .await
            .map_err(|e| TraceError::persistence("failed to delete space value", e))?;

        self.publish(
            self.update(
                now_secs(),
                UpdateData::MemoryDelete(MemoryDeleteData::key(space_id, key)),
            )
            .for_space(space_id),
        );
        Ok(())
    }

    /// Remove every entry and publish `memory_delete` with `cleared: true`.
    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id, space_id = %space_id))]
    pub async fn clear_space_values(&self, space_id: &str) -> Result<()> {
        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;

        self.inner
            .driver
            .clear_space_keys(&self.inner.trace_id, space_id)
            .await
            .map_err(|e| TraceError::persistence("failed to clear space", e))?;

        self.publish(
            self.update(now_secs(), UpdateData::MemoryDelete(MemoryDeleteData::all(space_id)))
                .for_space(space_id),
        );
        Ok(())
    }

    /// Keys of a space, sorted.
    pub async fn list_space_keys(&self, space_id: &str) -> Result<Vec<String>> {
        let mut keys = self
            .inner
            .driver
            .list_space_keys(&self.inner.trace_id, space_id)
            .await
            .map_err(|e| TraceError::persistence("failed to list space keys", e))?;
        keys.sort();
        Ok(keys)
    }

    /// A space together with all of its entries.
    pub async fn space_data(&self, space_id: &str) -> Result<TraceSpaceData> {
        let space = self.get_space(space_id).await?;
        let mut data = std::collections::BTreeMap::new();
        for key in self.list_space_keys(space_id).await? {
            if let Some(value) = self.get_space_value(space_id, &key).await? {
                data.insert(key, value);
            }
        }
        Ok(TraceSpaceData { space, data })
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::{MemoryDriver, TraceDriver};
    use crate::error::{DriverResult, TraceError};
    use crate::trace::update::{UpdateData, UpdateType};
    use crate::trace::TraceManager;
    use crate::types::{TraceInfo, TraceLog, TraceNode, TraceSpace, TraceSpaceOption};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    async fn manager() -> (TraceManager, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::new());
        let manager = TraceManager::detached("t", driver.clone()).await.unwrap();
        (manager, driver)
    }

    #[tokio::test]
    async fn test_space_round_trip() {
        let (manager, _) = manager().await;
        let space = manager
            .create_space(TraceSpaceOption::labeled("Context").with_type("context"))
            .await
            .unwrap();

        manager
            .set_space_value(&space.id, "user", json!({"name": "ada"}))
            .await
            .unwrap();
        assert_eq!(
            manager.get_space_value(&space.id, "user").await.unwrap(),
            Some(json!({"name": "ada"}))
        );
        assert!(manager.has_space_value(&space.id, "user").await.unwrap());
        assert!(manager.get_space_value(&space.id, "other").await.unwrap().is_none());

        let update = manager.events().pop().unwrap();
        assert_eq!(update.update_type, UpdateType::MemoryAdd);
        assert_eq!(update.space_id.as_deref(), Some(space.id.as_str()));
        match update.data {
            UpdateData::MemoryAdd(data) => {
                assert_eq!(data.space_type, "context");
                assert_eq!(data.item.id, "user");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_value_requires_space() {
        let (manager, _) = manager().await;
        let err = manager
            .set_space_value("missing", "k", json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_set_value_bumps_updated_at() {
        let (manager, driver) = manager().await;
        let space = manager.create_space(TraceSpaceOption::default()).await.unwrap();
        manager.set_space_value(&space.id, "k", json!(1)).await.unwrap();

        let stored = driver.load_space("t", &space.id).await.unwrap().unwrap();
        assert!(stored.updated_at >= space.updated_at);
        assert_eq!(manager.get_space(&space.id).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_delete_and_clear_values() {
        let (manager, _) = manager().await;
        let space = manager.create_space(TraceSpaceOption::default()).await.unwrap();
        for key in ["b", "a", "c"] {
            manager.set_space_value(&space.id, key, json!(key)).await.unwrap();
        }
        assert_eq!(manager.list_space_keys(&space.id).await.unwrap(), vec!["a", "b", "c"]);

        manager.delete_space_value(&space.id, "b").await.unwrap();
        assert_eq!(manager.list_space_keys(&space.id).await.unwrap(), vec!["a", "c"]);

        manager.clear_space_values(&space.id).await.unwrap();
        assert!(manager.list_space_keys(&space.id).await.unwrap().is_empty());
        assert!(manager.has_space(&space.id).await);

        let deletes: Vec<_> = manager
            .events()
            .into_iter()
            .filter(|u| u.update_type == UpdateType::MemoryDelete)
            .collect();
        assert_eq!(deletes.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_space_evicts_cache() {
        let (manager, _) = manager().await;
        let space = manager.create_space(TraceSpaceOption::default()).await.unwrap();
        manager.set_space_value(&space.id, "k", json!(1)).await.unwrap();

        manager.delete_space(&space.id).await.unwrap();
        assert!(!manager.has_space(&space.id).await);
        assert!(manager.get_space(&space.id).await.unwrap_err().is_not_found());
        assert!(manager.get_space_value(&space.id, "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_space_loads_from_driver() {
        let (manager, driver) = manager().await;
        let stored = TraceSpace::new("s1", TraceSpaceOption::labeled("Shared"), 1);
        driver.save_space("t", &stored).await.unwrap();

        let loaded = manager.get_space("s1").await.unwrap();
        assert_eq!(loaded, stored);
        assert!(manager.has_space("s1").await);
        assert_eq!(manager.list_spaces().await.len(), 1);
    }

    /// Delegates to a memory driver; the first `load_space` reads, then
    /// parks until released.
    #[derive(Default)]
    struct PausingDriver {
        inner: MemoryDriver,
        paused: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TraceDriver for PausingDriver {
        fn name(&self) -> &'static str {
            "pausing"
        }

        async fn save_node(&self, trace_id: &str, node: &TraceNode) -> DriverResult<()> {
            self.inner.save_node(trace_id, node).await
        }

        async fn load_node(&self, trace_id: &str, node_id: &str) -> DriverResult<Option<TraceNode>> {
            self.inner.load_node(trace_id, node_id).await
        }

        async fn load_nodes(&self, trace_id: &str) -> DriverResult<Vec<TraceNode>> {
            self.inner.load_nodes(trace_id).await
        }

        async fn save_space(&self, trace_id: &str, space: &TraceSpace) -> DriverResult<()> {
            self.inner.save_space(trace_id, space).await
        }

        async fn load_space(&self, trace_id: &str, space_id: &str) -> DriverResult<Option<TraceSpace>> {
            let loaded = self.inner.load_space(trace_id, space_id).await;
            if !self.paused.swap(true, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            loaded
        }

        async fn delete_space(&self, trace_id: &str, space_id: &str) -> DriverResult<()> {
            self.inner.delete_space(trace_id, space_id).await
        }

        async fn list_spaces(&self, trace_id: &str) -> DriverResult<Vec<String>> {
            self.inner.list_spaces(trace_id).await
        }

        async fn set_space_key(
            &self,
            trace_id: &str,
            space_id: &str,
            key: &str,
            value: &Value,
        ) -> DriverResult<()> {
            self.inner.set_space_key(trace_id, space_id, key, value).await
        }

        async fn get_space_key(
            &self,
            trace_id: &str,
            space_id: &str,
            key: &str,
        ) -> DriverResult<Option<Value>> {
            self.inner.get_space_key(trace_id, space_id, key).await
        }

        async fn has_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<bool> {
            self.inner.has_space_key(trace_id, space_id, key).await
        }

        async fn delete_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<()> {
            self.inner.delete_space_key(trace_id, space_id, key).await
        }

        async fn clear_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<()> {
            self.inner.clear_space_keys(trace_id, space_id).await
        }

        async fn list_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<Vec<String>> {
            self.inner.list_space_keys(trace_id, space_id).await
        }

        async fn save_log(&self, trace_id: &str, log: &TraceLog) -> DriverResult<()> {
            self.inner.save_log(trace_id, log).await
        }

        async fn load_logs(&self, trace_id: &str, node_id: Option<&str>) -> DriverResult<Vec<TraceLog>> {
            self.inner.load_logs(trace_id, node_id).await
        }

        async fn save_trace_info(&self, info: &TraceInfo) -> DriverResult<()> {
            self.inner.save_trace_info(info).await
        }

        async fn load_trace_info(&self, trace_id: &str) -> DriverResult<Option<TraceInfo>> {
            self.inner.load_trace_info(trace_id).await
        }

        async fn delete_trace(&self, trace_id: &str) -> DriverResult<()> {
            self.inner.delete_trace(trace_id).await
        }

        async fn close(&self) -> DriverResult<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_delete_during_load_stays_deleted() {
        let driver = Arc::new(PausingDriver::default());
        let stored = TraceSpace::new("s1", TraceSpaceOption::labeled("Shared"), 1);
        driver.inner.save_space("t", &stored).await.unwrap();
        let manager = TraceManager::detached("t", driver.clone()).await.unwrap();

        let getter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_space("s1").await })
        };
        driver.entered.notified().await;

        let deleter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.delete_space("s1").await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        driver.release.notify_one();

        assert_eq!(getter.await.unwrap().unwrap(), stored);
        deleter.await.unwrap().unwrap();

        assert!(!manager.has_space("s1").await);
        assert!(manager.get_space("s1").await.unwrap_err().is_not_found());
        assert!(driver.inner.load_space("t", "s1").await.unwrap().is_none());
        assert!(manager.list_spaces().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_spaces_falls_back_to_cache() {
        let (manager, driver) = manager().await;
        manager.create_space(TraceSpaceOption::labeled("A")).await.unwrap();
        driver.close().await.unwrap();

        let spaces = manager.list_spaces().await;
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].option.label, "A");
    }

    #[tokio::test]
    async fn test_space_data() {
        let (manager, _) = manager().await;
        let space = manager.create_space(TraceSpaceOption::labeled("KB")).await.unwrap();
        manager.set_space_value(&space.id, "x", json!(1)).await.unwrap();
        manager.set_space_value(&space.id, "y", json!(2)).await.unwrap();

        let data = manager.space_data(&space.id).await.unwrap();
        assert_eq!(data.space.option.label, "KB");
        assert_eq!(data.data.len(), 2);
        assert_eq!(data.data["y"], json!(2));
    }
}
