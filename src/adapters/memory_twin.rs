//! In-process twin store.
//!
//! Holds one desired/reported pair per registered device.  The desired
//! half carries an etag that moves on every desired write, so conditional
//! updates behave like the hosted registry's.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use serde_json::Value;

use crate::app::ports::{DesiredSnapshot, Properties, TwinStore};
use crate::error::TwinError;

#[derive(Debug, Default, Clone)]
struct Twin {
    desired: Properties,
    reported: Properties,
    etag: u64,
}

/// Twin registry kept in memory.
#[derive(Debug, Default)]
pub struct MemoryTwinStore {
    twins: Mutex<HashMap<String, Twin>>,
}

impl MemoryTwinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty twin for `device_id`.  No-op if it exists.
    pub fn register(&self, device_id: &str) {
        self.lock().entry(device_id.to_string()).or_default();
    }

    /// Whether `device_id` has a twin.
    pub fn contains(&self, device_id: &str) -> bool {
        self.lock().contains_key(device_id)
    }

    /// Copy of the reported half, for inspection.
    pub fn reported(&self, device_id: &str) -> Option<Properties> {
        self.lock().get(device_id).map(|t| t.reported.clone())
    }

    /// Operator-style desired write: unconditional, bumps the etag.
    pub fn set_desired(&self, device_id: &str, key: &str, value: impl Into<Value>) {
        let mut twins = self.lock();
        let twin = twins.entry(device_id.to_string()).or_default();
        twin.desired.insert(key.to_string(), value.into());
        twin.etag += 1;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Twin>> {
        self.twins.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TwinStore for MemoryTwinStore {
    async fn desired(&self, device_id: &str) -> Result<DesiredSnapshot, TwinError> {
        let twins = self.lock();
        let twin = twins
            .get(device_id)
            .ok_or_else(|| TwinError::UnknownDevice(device_id.to_string()))?;
        Ok(DesiredSnapshot {
            properties: twin.desired.clone(),
            etag: twin.etag,
        })
    }

    async fn update_desired(
        &self,
        device_id: &str,
        patch: Properties,
        if_match: Option<u64>,
    ) -> Result<(), TwinError> {
        let mut twins = self.lock();
        let twin = twins
            .get_mut(device_id)
            .ok_or_else(|| TwinError::UnknownDevice(device_id.to_string()))?;
        if let Some(expected) = if_match {
            if expected != twin.etag {
                return Err(TwinError::Conflict {
                    expected,
                    actual: twin.etag,
                });
            }
        }
        twin.desired.extend(patch);
        twin.etag += 1;
        debug!("twin {}: desired etag now {}", device_id, twin.etag);
        Ok(())
    }

    async fn update_reported(&self, device_id: &str, patch: Properties) -> Result<(), TwinError> {
        let mut twins = self.lock();
        let twin = twins
            .get_mut(device_id)
            .ok_or_else(|| TwinError::UnknownDevice(device_id.to_string()))?;
        twin.reported.extend(patch);
        Ok(())
    }

    async fn query_reported(&self, key: &str, value: &Value) -> Result<Vec<String>, TwinError> {
        let twins = self.lock();
        let mut ids: Vec<String> = twins
            .iter()
            .filter(|(_, t)| t.reported.get(key) == Some(value))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
