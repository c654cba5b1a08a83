//! In-memory bead store: a flat map guarded by one mutex, sequential
//! `gc-N` ids, creation-order iteration (spec.md §4.1, "In-process
//! providers ... return List, Ready, and Children in creation order").

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use gas_core::{Error, Result, SeqIdGen};
use tokio::sync::Mutex;

use crate::store::BeadStore;
use crate::types::{Bead, BeadPatch, BeadStatus, NewBead, TYPE_TASK};

const BEAD_KIND: &str = "bead";

struct State {
    beads: HashMap<String, Bead>,
    /// Creation order, independent of `HashMap` iteration order.
    order: Vec<String>,
}

/// In-memory `BeadStore`.
pub struct MemoryBeadStore {
    state: Mutex<State>,
    ids: SeqIdGen,
}

impl Default for MemoryBeadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBeadStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                beads: HashMap::new(),
                order: Vec::new(),
            }),
            ids: SeqIdGen::new("gc"),
        }
    }
}

#[async_trait]
impl BeadStore for MemoryBeadStore {
    async fn create(&self, input: NewBead) -> Result<Bead> {
        let mut state = self.state.lock().await;
        let id = self.ids.next();
        let bead = Bead {
            id: id.clone(),
            title: input.title,
            status: BeadStatus::Open,
            kind: input.kind.unwrap_or_else(|| TYPE_TASK.to_string()),
            created_at: Utc::now(),
            assignee: None,
            parent_id: input.parent_id,
            step_ref: input.step_ref,
            needs: input.needs,
            description: input.description,
            labels: input.labels,
        };
        state.order.push(id.clone());
        state.beads.insert(id, bead.clone());
        Ok(bead)
    }

    async fn get(&self, id: &str) -> Result<Bead> {
        let state = self.state.lock().await;
        state
            .beads
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))
    }

    async fn update(&self, id: &str, patch: BeadPatch) -> Result<Bead> {
        let mut state = self.state.lock().await;
        let bead = state
            .beads
            .get_mut(id)
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))?;
        patch.apply(bead);
        Ok(bead.clone())
    }

    async fn close(&self, id: &str) -> Result<Bead> {
        let mut state = self.state.lock().await;
        let bead = state
            .beads
            .get_mut(id)
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))?;
        bead.status = BeadStatus::Closed;
        Ok(bead.clone())
    }

    async fn claim(&self, id: &str, assignee: &str) -> Result<Bead> {
        let mut state = self.state.lock().await;
        let bead = state
            .beads
            .get_mut(id)
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))?;
        if !bead.is_claimable_by(assignee) {
            return Err(Error::already_claimed(
                id,
                bead.assignee.clone().unwrap_or_default(),
            ));
        }
        bead.status = BeadStatus::InProgress;
        bead.assignee = Some(assignee.to_string());
        Ok(bead.clone())
    }

    async fn claimed(&self, assignee: &str) -> Result<Bead> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.beads.get(id))
            .find(|b| b.status == BeadStatus::InProgress && b.assignee.as_deref() == Some(assignee))
            .cloned()
            .ok_or_else(|| Error::not_found(BEAD_KIND, assignee))
    }

    async fn list(&self) -> Result<Vec<Bead>> {
        let state = self.state.lock().await;
        Ok(state.order.iter().filter_map(|id| state.beads.get(id)).cloned().collect())
    }

    async fn ready(&self) -> Result<Vec<Bead>> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.beads.get(id))
            .filter(|b| b.status == BeadStatus::Open)
            .cloned()
            .collect())
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<Bead>> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.beads.get(id))
            .filter(|b| b.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn list_by_label(&self, label: &str, limit: usize) -> Result<Vec<Bead>> {
        let state = self.state.lock().await;
        let mut matches: Vec<Bead> = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.beads.get(id))
            .filter(|b| b.labels.contains(label))
            .cloned()
            .collect();
        if limit > 0 {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn set_metadata(&self, id: &str, key: &str, value: &str) -> Result<Bead> {
        let mut state = self.state.lock().await;
        let bead = state
            .beads
            .get_mut(id)
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))?;
        let prefix = format!("meta:{key}=");
        bead.labels.retain(|l| !l.starts_with(&prefix));
        bead.labels.insert(format!("{prefix}{value}"));
        Ok(bead.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Formula, FormulaStep};

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let store = MemoryBeadStore::new();
        let a = store.create(NewBead::new("a")).await.unwrap();
        let b = store.create(NewBead::new("b")).await.unwrap();
        assert_eq!(a.id, "gc-1");
        assert_eq!(b.id, "gc-2");
        assert_eq!(a.status, BeadStatus::Open);
        assert_eq!(a.kind, TYPE_TASK);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryBeadStore::new();
        let err = store.get("gc-999").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = MemoryBeadStore::new();
        let bead = store.create(NewBead::new("a")).await.unwrap();
        store.close(&bead.id).await.unwrap();
        let again = store.close(&bead.id).await.unwrap();
        assert_eq!(again.status, BeadStatus::Closed);
    }

    #[tokio::test]
    async fn closed_bead_absent_from_ready() {
        let store = MemoryBeadStore::new();
        let bead = store.create(NewBead::new("a")).await.unwrap();
        store.close(&bead.id).await.unwrap();
        assert!(store.ready().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_race_exactly_one_winner() {
        let store = MemoryBeadStore::new();
        let bead = store.create(NewBead::new("a")).await.unwrap();
        let first = store.claim(&bead.id, "alice").await;
        let second = store.claim(&bead.id, "bob").await;
        assert!(first.is_ok());
        assert!(second.unwrap_err().is_already_claimed());
        let current = store.get(&bead.id).await.unwrap();
        assert_eq!(current.assignee.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn reclaim_same_assignee_is_noop() {
        let store = MemoryBeadStore::new();
        let bead = store.create(NewBead::new("a")).await.unwrap();
        store.claim(&bead.id, "alice").await.unwrap();
        let again = store.claim(&bead.id, "alice").await.unwrap();
        assert_eq!(again.assignee.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn claimed_returns_not_found_when_none() {
        let store = MemoryBeadStore::new();
        let err = store.claimed("alice").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn claimed_not_found_after_close() {
        let store = MemoryBeadStore::new();
        let bead = store.create(NewBead::new("a")).await.unwrap();
        store.claim(&bead.id, "alice").await.unwrap();
        store.close(&bead.id).await.unwrap();
        let err = store.claimed("alice").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn children_filters_by_parent() {
        let store = MemoryBeadStore::new();
        let root = store.create(NewBead::new("root")).await.unwrap();
        let other = store.create(NewBead::new("other-root")).await.unwrap();
        store
            .create(NewBead::new("child1").with_parent_id(&root.id))
            .await
            .unwrap();
        store
            .create(NewBead::new("child2").with_parent_id(&root.id))
            .await
            .unwrap();
        store
            .create(NewBead::new("unrelated").with_parent_id(&other.id))
            .await
            .unwrap();
        let children = store.children(&root.id).await.unwrap();
        assert_eq!(children.len(), 2);
    }

    #[tokio::test]
    async fn list_by_label_newest_first_and_capped() {
        let store = MemoryBeadStore::new();
        for i in 0..3 {
            store
                .create(NewBead::new(format!("b{i}")).with_label("pool:workers"))
                .await
                .unwrap();
        }
        let all = store.list_by_label("pool:workers", 0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].title, "b2");

        let capped = store.list_by_label("pool:workers", 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn set_metadata_replaces_existing_key() {
        let store = MemoryBeadStore::new();
        let bead = store.create(NewBead::new("a")).await.unwrap();
        store.set_metadata(&bead.id, "pool", "workers").await.unwrap();
        let updated = store.set_metadata(&bead.id, "pool", "mayors").await.unwrap();
        let meta: Vec<_> = updated.metadata().collect();
        assert_eq!(meta, vec![("pool", "mayors")]);
    }

    #[tokio::test]
    async fn mol_cook_builds_molecule_and_children_in_order() {
        let store = MemoryBeadStore::new();
        let formula = Formula::new(
            "deploy",
            vec![
                FormulaStep {
                    id: "build".into(),
                    description: "build {{env}}".into(),
                    needs: vec![],
                },
                FormulaStep {
                    id: "test".into(),
                    description: "test {{env}}".into(),
                    needs: vec!["build".into()],
                },
                FormulaStep {
                    id: "ship".into(),
                    description: "ship {{env}}".into(),
                    needs: vec!["test".into()],
                },
            ],
        );
        let root_id = store
            .mol_cook(&formula, Some("Deploy v2"), &[("env".to_string(), "prod".to_string())])
            .await
            .unwrap();

        let root = store.get(&root_id).await.unwrap();
        assert_eq!(root.kind, "molecule");
        assert_eq!(root.step_ref.as_deref(), Some("deploy"));
        assert_eq!(root.title, "Deploy v2");

        let children = store.children(&root_id).await.unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].step_ref.as_deref(), Some("build"));
        assert_eq!(children[1].needs, vec!["build".to_string()]);
        assert_eq!(children[2].needs, vec!["test".to_string()]);
        assert_eq!(children[0].description.as_deref(), Some("build prod"));
    }

    #[tokio::test]
    async fn mol_cook_defaults_title_to_formula_name() {
        let store = MemoryBeadStore::new();
        let formula = Formula::new("deploy", vec![]);
        let root_id = store.mol_cook(&formula, None, &[]).await.unwrap();
        let root = store.get(&root_id).await.unwrap();
        assert_eq!(root.title, "deploy");
    }
}
