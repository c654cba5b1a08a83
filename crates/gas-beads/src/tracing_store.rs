//! Wraps any `BeadStore` with `tracing` spans, mirroring
//! `gas_events::TracingRecorder` and the teacher's `TracingEventStore`.

use async_trait::async_trait;
use gas_core::Result;

use crate::store::BeadStore;
use crate::types::{Bead, BeadPatch, Formula, NewBead};

pub struct TracingBeadStore<B: BeadStore> {
    inner: B,
}

impl<B: BeadStore> TracingBeadStore<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<B: BeadStore> BeadStore for TracingBeadStore<B> {
    async fn create(&self, input: NewBead) -> Result<Bead> {
        tracing::debug!(title = %input.title, "creating bead");
        let result = self.inner.create(input).await;
        if let Ok(ref bead) = result {
            tracing::trace!(id = %bead.id, "bead created");
        }
        result
    }

    async fn get(&self, id: &str) -> Result<Bead> {
        self.inner.get(id).await
    }

    async fn update(&self, id: &str, patch: BeadPatch) -> Result<Bead> {
        tracing::debug!(id = %id, "updating bead");
        self.inner.update(id, patch).await
    }

    async fn close(&self, id: &str) -> Result<Bead> {
        tracing::debug!(id = %id, "closing bead");
        self.inner.close(id).await
    }

    async fn claim(&self, id: &str, assignee: &str) -> Result<Bead> {
        tracing::debug!(id = %id, assignee = %assignee, "claiming bead");
        let result = self.inner.claim(id, assignee).await;
        if let Err(ref err) = result {
            if err.is_already_claimed() {
                tracing::trace!(id = %id, assignee = %assignee, "claim conflict");
            }
        }
        result
    }

    async fn claimed(&self, assignee: &str) -> Result<Bead> {
        self.inner.claimed(assignee).await
    }

    async fn list(&self) -> Result<Vec<Bead>> {
        self.inner.list().await
    }

    async fn ready(&self) -> Result<Vec<Bead>> {
        self.inner.ready().await
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<Bead>> {
        self.inner.children(parent_id).await
    }

    async fn list_by_label(&self, label: &str, limit: usize) -> Result<Vec<Bead>> {
        self.inner.list_by_label(label, limit).await
    }

    async fn set_metadata(&self, id: &str, key: &str, value: &str) -> Result<Bead> {
        tracing::debug!(id = %id, key = %key, "setting bead metadata");
        self.inner.set_metadata(id, key, value).await
    }

    async fn mol_cook(&self, formula: &Formula, title: Option<&str>, vars: &[(String, String)]) -> Result<String> {
        tracing::debug!(formula = %formula.name, "cooking molecule");
        let result = self.inner.mol_cook(formula, title, vars).await;
        if let Ok(ref id) = result {
            tracing::trace!(root_id = %id, "molecule cooked");
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryBeadStore;

    #[tokio::test]
    async fn delegates_create_and_get() {
        let store = TracingBeadStore::new(MemoryBeadStore::new());
        let bead = store.create(NewBead::new("a")).await.unwrap();
        assert_eq!(store.get(&bead.id).await.unwrap().id, bead.id);
    }

    #[tokio::test]
    async fn delegates_claim_conflict() {
        let store = TracingBeadStore::new(MemoryBeadStore::new());
        let bead = store.create(NewBead::new("a")).await.unwrap();
        store.claim(&bead.id, "alice").await.unwrap();
        let err = store.claim(&bead.id, "bob").await.unwrap_err();
        assert!(err.is_already_claimed());
    }
}
