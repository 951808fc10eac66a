use async_trait::async_trait;
use parking_lot::RwLock;

use super::StateStore;
use crate::error::Result;
use crate::state::{admit, StateDocument};

/// Volatile single-document store. Not shared across processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: RwLock<Option<StateDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(doc: StateDocument) -> Self {
        Self {
            doc: RwLock::new(Some(doc)),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn name(&self) -> &'static str {
        "volatile"
    }

    async fn get_state(&self) -> Result<Option<StateDocument>> {
        Ok(self.doc.read().clone())
    }

    async fn save_state(&self, doc: &StateDocument) -> Result<StateDocument> {
        let mut stored = self.doc.write();
        if let Some(current) = stored.as_ref() {
            if !admit(doc, Some(current)).is_accepted() {
                return Ok(current.clone());
            }
        }
        *stored = Some(doc.clone());
        Ok(doc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ControlMode;

    #[tokio::test]
    async fn starts_empty() {
        let store = MemoryStore::new();
        assert!(store.get_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_of_get_is_a_no_op() {
        let mut doc = StateDocument::default();
        doc.control_mode = ControlMode::Semi;
        doc.last_updated = 42;
        let store = MemoryStore::with_state(doc.clone());

        let current = store.get_state().await.unwrap().unwrap();
        store.save_state(&current).await.unwrap();

        assert_eq!(store.get_state().await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn older_write_keeps_newer_document() {
        let mut newer = StateDocument::default();
        newer.control_mode = ControlMode::Manual;
        newer.last_updated = 2_000;
        let store = MemoryStore::with_state(newer.clone());

        let mut older = StateDocument::default();
        older.control_mode = ControlMode::Semi;
        older.last_updated = 1_500;

        assert_eq!(store.save_state(&older).await.unwrap(), newer);
        assert_eq!(store.get_state().await.unwrap(), Some(newer));
    }
}
