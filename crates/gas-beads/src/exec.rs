//! Exec bead store: delegates every operation to a child process speaking
//! the line protocol of spec.md §6, "Exec bead provider protocol".
//!
//! `<script> <op> [args...]`, with a JSON body on stdin for operations that
//! carry one (`create`, `update`, `mol-cook`; `set-metadata` reads the raw
//! value, unwrapped). Exit 0 is success, 2 is "unknown operation" treated as
//! success with empty output, anything else is an error from trimmed stderr.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use gas_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::store::BeadStore;
use crate::types::{Bead, BeadPatch, Formula, NewBead};

/// Default per-call timeout (spec.md §4.1: "default 30 seconds").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// I/O grace window granted after a timeout fires, so pipes can drain
/// before the parent unblocks (spec.md §4.1).
pub const IO_GRACE: Duration = Duration::from_secs(2);

/// Delegates bead operations to a per-call child process: op name plus any
/// id/label/key arguments on argv, an optional JSON or raw-value body on
/// stdin, a JSON response on stdout.
pub struct ExecBeadStore {
    command: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ExecBeadStore {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Invoke `<command> <args...> <op> <op_args...>`, writing `body` (if
    /// any) to stdin and returning stdout bytes, or `None` for an
    /// unknown-operation exit code 2.
    async fn invoke(&self, op: &str, op_args: &[&str], body: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .arg(op)
            .args(op_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::transient(format!("failed to spawn bead exec: {e}")))?;

        if let Some(body) = body {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(body)
                    .await
                    .map_err(|e| Error::transient(format!("failed to write bead exec stdin: {e}")))?;
            }
        } else {
            child.stdin.take();
        }

        let wait = child.wait_with_output();
        let output = match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result.map_err(|e| Error::transient(format!("bead exec failed: {e}")))?,
            Err(_) => {
                tokio::time::sleep(IO_GRACE).await;
                return Err(Error::timeout(format!("beads.exec.{op}"), self.timeout));
            }
        };

        match output.status.code() {
            Some(0) => Ok(Some(output.stdout)),
            Some(2) => Ok(None),
            _ => Err(Error::transient(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }

    async fn call_for_bead(&self, op: &str, op_args: &[&str], body: Option<&[u8]>, not_found_key: &str) -> Result<Bead> {
        match self.invoke(op, op_args, body).await? {
            Some(stdout) if !stdout.is_empty() => {
                serde_json::from_slice(&stdout).map_err(Error::json_parse_failed)
            }
            _ => Err(Error::not_found("bead", not_found_key)),
        }
    }

    async fn call_for_list(&self, op: &str, op_args: &[&str]) -> Result<Vec<Bead>> {
        match self.invoke(op, op_args, None).await? {
            Some(stdout) if !stdout.is_empty() => {
                serde_json::from_slice(&stdout).map_err(Error::json_parse_failed)
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[derive(Serialize)]
struct CreateBody<'a> {
    title: &'a str,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    step_ref: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    needs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "std::collections::BTreeSet::is_empty")]
    labels: std::collections::BTreeSet<String>,
}

#[derive(Serialize)]
struct UpdateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<&'a std::collections::BTreeSet<String>>,
}

#[derive(Serialize)]
struct MolCookBody<'a> {
    formula: &'a Formula,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    vars: &'a [(String, String)],
}

#[derive(Deserialize)]
struct MolCookResponse {
    id: String,
}

#[async_trait]
impl BeadStore for ExecBeadStore {
    async fn create(&self, input: NewBead) -> Result<Bead> {
        let body = CreateBody {
            title: &input.title,
            kind: input.kind.as_deref(),
            parent_id: input.parent_id.as_deref(),
            step_ref: input.step_ref.as_deref(),
            needs: input.needs,
            description: input.description.as_deref(),
            labels: input.labels,
        };
        let json = serde_json::to_vec(&body).map_err(Error::json_parse_failed)?;
        self.call_for_bead("create", &[], Some(&json), "<new bead>").await
    }

    async fn get(&self, id: &str) -> Result<Bead> {
        self.call_for_bead("get", &[id], None, id).await
    }

    async fn update(&self, id: &str, patch: BeadPatch) -> Result<Bead> {
        let body = UpdateBody {
            title: patch.title.as_deref(),
            kind: patch.kind.as_deref(),
            description: patch.description.as_deref(),
            labels: patch.labels.as_ref(),
        };
        let json = serde_json::to_vec(&body).map_err(Error::json_parse_failed)?;
        self.call_for_bead("update", &[id], Some(&json), id).await
    }

    async fn close(&self, id: &str) -> Result<Bead> {
        self.call_for_bead("close", &[id], None, id).await
    }

    async fn claim(&self, id: &str, assignee: &str) -> Result<Bead> {
        self.call_for_bead("claim", &[id, assignee], None, id).await
    }

    async fn claimed(&self, assignee: &str) -> Result<Bead> {
        self.call_for_bead("claimed", &[assignee], None, assignee).await
    }

    async fn list(&self) -> Result<Vec<Bead>> {
        self.call_for_list("list", &[]).await
    }

    async fn ready(&self) -> Result<Vec<Bead>> {
        self.call_for_list("ready", &[]).await
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<Bead>> {
        self.call_for_list("children", &[parent_id]).await
    }

    async fn list_by_label(&self, label: &str, limit: usize) -> Result<Vec<Bead>> {
        let limit_str = limit.to_string();
        self.call_for_list("list-by-label", &[label, &limit_str]).await
    }

    async fn set_metadata(&self, id: &str, key: &str, value: &str) -> Result<Bead> {
        self.call_for_bead("set-metadata", &[id, key], Some(value.as_bytes()), id).await
    }

    async fn mol_cook(&self, formula: &Formula, title: Option<&str>, vars: &[(String, String)]) -> Result<String> {
        let body = MolCookBody { formula, title, vars };
        let json = serde_json::to_vec(&body).map_err(Error::json_parse_failed)?;
        match self.invoke("mol-cook", &[], Some(&json)).await? {
            Some(stdout) if !stdout.is_empty() => {
                let resp: MolCookResponse = serde_json::from_slice(&stdout).map_err(Error::json_parse_failed)?;
                Ok(resp.id)
            }
            _ => Err(Error::transient("exec mol-cook returned no id")),
        }
    }
}
