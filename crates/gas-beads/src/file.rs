//! Single-file JSON bead store. Every mutation writes a fresh tempfile and
//! renames it over the target (spec.md §4.1, "File provider"): the rename
//! is atomic, so a reader never observes a half-written document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use gas_core::{Error, Result, SeqIdGen};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::BeadStore;
use crate::types::{Bead, BeadPatch, BeadStatus, NewBead, TYPE_TASK};

const BEAD_KIND: &str = "bead";

/// On-disk schema (spec.md §6): `{ "seq": <int>, "beads": [...] }`. `seq` is
/// the highest id number handed out so far; it is recomputed from `beads`
/// on load rather than trusted blindly, so a hand-edited file with beads
/// removed doesn't wedge id allocation.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    seq: u64,
    beads: Vec<Bead>,
}

struct State {
    doc: Document,
}

/// File-backed `BeadStore`. Reads load the file once at open; in-memory
/// state is the source of truth thereafter, and every mutation is flushed
/// back to disk before returning (spec.md §3, "flushed to durable storage
/// on every mutation by file-backed providers").
pub struct FileBeadStore {
    path: PathBuf,
    state: Mutex<State>,
    ids: SeqIdGen,
}

impl FileBeadStore {
    /// Open (creating if absent) the store at `path`. The parent directory
    /// is created if missing (spec.md §6, "Parent directory is created if
    /// missing").
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| Error::directory_creation_failed(dir, e))?;
            }
        }
        let doc = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::file_read_failed(path.clone(), e))?;
            if contents.trim().is_empty() {
                Document::default()
            } else {
                serde_json::from_str(&contents).map_err(Error::json_parse_failed)?
            }
        } else {
            Document::default()
        };
        let ids = SeqIdGen::seeded("gc", doc.beads.iter().map(|b| b.id.as_str()));
        let seq = doc.seq.max(ids.peek_next().saturating_sub(1));
        Ok(Self {
            path,
            state: Mutex::new(State { doc: Document { seq, ..doc } }),
            ids,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, doc: &Document) -> Result<()> {
        let json = serde_json::to_string_pretty(doc).map_err(Error::json_parse_failed)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::file_write_failed(self.path.clone(), e))?;
        use std::io::Write as _;
        tmp.write_all(json.as_bytes())
            .map_err(|e| Error::file_write_failed(self.path.clone(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::file_write_failed(self.path.clone(), e.error))?;
        Ok(())
    }
}

#[async_trait]
impl BeadStore for FileBeadStore {
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
        state.doc.beads.push(bead.clone());
        state.doc.seq += 1;
        self.persist(&state.doc)?;
        Ok(bead)
    }

    async fn get(&self, id: &str) -> Result<Bead> {
        let state = self.state.lock().await;
        state
            .doc
            .beads
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))
    }

    async fn update(&self, id: &str, patch: BeadPatch) -> Result<Bead> {
        let mut state = self.state.lock().await;
        let bead = state
            .doc
            .beads
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))?;
        patch.apply(bead);
        let result = bead.clone();
        self.persist(&state.doc)?;
        Ok(result)
    }

    async fn close(&self, id: &str) -> Result<Bead> {
        let mut state = self.state.lock().await;
        let bead = state
            .doc
            .beads
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))?;
        bead.status = BeadStatus::Closed;
        let result = bead.clone();
        self.persist(&state.doc)?;
        Ok(result)
    }

    async fn claim(&self, id: &str, assignee: &str) -> Result<Bead> {
        let mut state = self.state.lock().await;
        let bead = state
            .doc
            .beads
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))?;
        if !bead.is_claimable_by(assignee) {
            return Err(Error::already_claimed(id, bead.assignee.clone().unwrap_or_default()));
        }
        bead.status = BeadStatus::InProgress;
        bead.assignee = Some(assignee.to_string());
        let result = bead.clone();
        self.persist(&state.doc)?;
        Ok(result)
    }

    async fn claimed(&self, assignee: &str) -> Result<Bead> {
        let state = self.state.lock().await;
        state
            .doc
            .beads
            .iter()
            .find(|b| b.status == BeadStatus::InProgress && b.assignee.as_deref() == Some(assignee))
            .cloned()
            .ok_or_else(|| Error::not_found(BEAD_KIND, assignee))
    }

    async fn list(&self) -> Result<Vec<Bead>> {
        let state = self.state.lock().await;
        Ok(state.doc.beads.clone())
    }

    async fn ready(&self) -> Result<Vec<Bead>> {
        let state = self.state.lock().await;
        Ok(state
            .doc
            .beads
            .iter()
            .filter(|b| b.status == BeadStatus::Open)
            .cloned()
            .collect())
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<Bead>> {
        let state = self.state.lock().await;
        Ok(state
            .doc
            .beads
            .iter()
            .filter(|b| b.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn list_by_label(&self, label: &str, limit: usize) -> Result<Vec<Bead>> {
        let state = self.state.lock().await;
        let mut matches: Vec<Bead> = state
            .doc
            .beads
            .iter()
            .rev()
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
            .doc
            .beads
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| Error::not_found(BEAD_KIND, id))?;
        let prefix = format!("meta:{key}=");
        bead.labels.retain(|l| !l.starts_with(&prefix));
        bead.labels.insert(format!("{prefix}{value}"));
        let result = bead.clone();
        self.persist(&state.doc)?;
        Ok(result)
    }
}
