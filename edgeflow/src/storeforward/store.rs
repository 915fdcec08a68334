//! Store client capability and the in-memory store.

use super::StoredObject;
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of [`StoreClient::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReceipt {
    /// Id of the stored object.
    pub id: String,
    /// False when an object with the same id was already stored.
    pub inserted: bool,
}

/// Durable storage for objects awaiting retry.
#[async_trait]
pub trait StoreClient: Send + Sync + Debug {
    /// Persists a new object.
    ///
    /// An object whose id is already stored is left untouched; the receipt
    /// carries the same id with `inserted` unset.
    async fn store(&self, object: StoredObject) -> Result<StoreReceipt, StoreError>;

    /// Returns every object owned by `app_service_key`, oldest first.
    async fn retrieve_from_store(
        &self,
        app_service_key: &str,
    ) -> Result<Vec<StoredObject>, StoreError>;

    /// Replaces a stored object. Never creates one.
    async fn update(&self, object: StoredObject) -> Result<(), StoreError>;

    /// Removes a stored object.
    async fn remove_from_store(&self, object: &StoredObject) -> Result<(), StoreError>;

    /// Releases the underlying storage.
    async fn disconnect(&self) -> Result<(), StoreError>;
}

/// A non-durable store for tests and services that accept losing pending
/// retries on restart.
#[derive(Debug, Default)]
pub struct InMemoryStoreClient {
    objects: DashMap<String, StoredObject>,
    disconnected: AtomicBool,
}

impl InMemoryStoreClient {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn check_connected(&self) -> Result<(), StoreError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreClient for InMemoryStoreClient {
    async fn store(&self, mut object: StoredObject) -> Result<StoreReceipt, StoreError> {
        self.check_connected()?;
        object.validate_contract(false)?;
        let id = object.id.clone();
        let inserted = match self.objects.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(object);
                true
            }
        };
        Ok(StoreReceipt { id, inserted })
    }

    async fn retrieve_from_store(
        &self,
        app_service_key: &str,
    ) -> Result<Vec<StoredObject>, StoreError> {
        self.check_connected()?;
        if app_service_key.is_empty() {
            return Err(StoreError::Contract("no app service key provided".into()));
        }
        let mut objects: Vec<StoredObject> = self
            .objects
            .iter()
            .filter(|entry| entry.app_service_key == app_service_key)
            .map(|entry| entry.value().clone())
            .collect();
        objects.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(objects)
    }

    async fn update(&self, mut object: StoredObject) -> Result<(), StoreError> {
        self.check_connected()?;
        object.validate_contract(true)?;
        match self.objects.get_mut(&object.id) {
            Some(mut slot) => {
                *slot = object;
                Ok(())
            }
            None => Err(StoreError::NotFound(object.id)),
        }
    }

    async fn remove_from_store(&self, object: &StoredObject) -> Result<(), StoreError> {
        self.check_connected()?;
        if object.id.is_empty() {
            return Err(StoreError::Contract("ID cannot be empty".into()));
        }
        self.objects
            .remove(&object.id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(object.id.clone()))
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
