//! The `BeadStore` contract (spec.md §4.1).

use async_trait::async_trait;
use gas_core::Result;

use crate::types::{substitute_vars, Bead, BeadPatch, Formula, NewBead, TYPE_MOLECULE};

/// A bead store: create, mutate, and query beads. All operations either
/// return a value or a `gas_core::Error` (`NotFound`/`AlreadyClaimed` are
/// the kinds callers are expected to branch on).
#[async_trait]
pub trait BeadStore: Send + Sync {
    async fn create(&self, input: NewBead) -> Result<Bead>;

    async fn get(&self, id: &str) -> Result<Bead>;

    async fn update(&self, id: &str, patch: BeadPatch) -> Result<Bead>;

    /// Set status to `closed`. Idempotent.
    async fn close(&self, id: &str) -> Result<Bead>;

    /// Atomically claim a bead for `assignee`. Same-assignee re-claim is a
    /// no-op; a conflicting claim returns `Error::AlreadyClaimed`.
    async fn claim(&self, id: &str, assignee: &str) -> Result<Bead>;

    /// The bead currently claimed by `assignee`, or `Error::NotFound`.
    async fn claimed(&self, assignee: &str) -> Result<Bead>;

    async fn list(&self) -> Result<Vec<Bead>>;

    /// All beads with `status = open`.
    async fn ready(&self) -> Result<Vec<Bead>>;

    async fn children(&self, parent_id: &str) -> Result<Vec<Bead>>;

    /// Beads whose labels contain `label`, capped at `limit` when
    /// `limit > 0`.
    async fn list_by_label(&self, label: &str, limit: usize) -> Result<Vec<Bead>>;

    /// Associate a `meta:k=v` label with the bead, replacing any existing
    /// `meta:k=` entry.
    async fn set_metadata(&self, id: &str, key: &str, value: &str) -> Result<Bead>;

    /// Instantiate `formula` into a root `molecule` bead plus one child per
    /// step, substituting `{{key}}` in step descriptions from `vars`.
    /// Returns the root bead's id.
    ///
    /// Composed in-process from repeated `create` calls, exactly as spec.md
    /// §4.1 describes for the exec provider ("Formulas may be composed
    /// in-process ... when a resolver is supplied by the host") — every
    /// provider gets this behavior for free and none needs a dedicated wire
    /// operation for it.
    async fn mol_cook(
        &self,
        formula: &Formula,
        title: Option<&str>,
        vars: &[(String, String)],
    ) -> Result<String> {
        let root = self
            .create(
                NewBead::new(title.unwrap_or(&formula.name))
                    .with_kind(TYPE_MOLECULE)
                    .with_ref(&formula.name),
            )
            .await?;

        for step in &formula.steps {
            let description = substitute_vars(&step.description, vars);
            self.create(
                NewBead::new(&step.id)
                    .with_parent_id(&root.id)
                    .with_ref(&step.id)
                    .with_needs(step.needs.clone())
                    .with_description(description),
            )
            .await?;
        }

        Ok(root.id)
    }
}
