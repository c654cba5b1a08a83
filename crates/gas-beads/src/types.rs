//! Core bead types: the `Bead` record, its lifecycle status, the inputs to
//! `Create`/`Update`, and the `Formula` template `MolCook` instantiates.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a bead (spec.md §3: `open -> in_progress -> closed`
/// and `open -> closed`; no transition out of `closed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    InProgress,
    Closed,
}

impl std::fmt::Display for BeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Type tag reserved by the core for molecule roots (spec.md §3, "Reserved
/// type values").
pub const TYPE_MOLECULE: &str = "molecule";
/// Type tag reserved for mail-style beads.
pub const TYPE_MESSAGE: &str = "message";
/// Container type expanded during dispatch by callers above the core.
pub const TYPE_CONVOY: &str = "convoy";
/// Container type expanded during dispatch by callers above the core.
pub const TYPE_EPIC: &str = "epic";
/// Type tag for a pool-membership / agent status-bag bead.
pub const TYPE_AGENT: &str = "agent";
/// Default type assigned to a bead when the caller doesn't specify one.
pub const TYPE_TASK: &str = "task";

/// Whether `type_` is one of the container types the CLI/dispatch layer is
/// expected to expand rather than assign directly (spec.md §9, first Open
/// Question: expansion itself is the caller's responsibility, not the
/// store's; this helper only identifies the type).
pub fn is_container_type(type_: &str) -> bool {
    type_ == TYPE_CONVOY || type_ == TYPE_EPIC
}

/// The single persistent entity (spec.md §3, "Bead").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub title: String,
    pub status: BeadStatus,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub step_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
}

impl Bead {
    /// Labels of the form `meta:KEY=VALUE` with `meta:KEY=` stripped,
    /// yielding `(key, value)` pairs (spec.md §3, labels used for
    /// "metadata (`meta:k=v`)").
    pub fn metadata(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().filter_map(|label| {
            let rest = label.strip_prefix("meta:")?;
            rest.split_once('=')
        })
    }

    /// Whether this bead can currently be claimed by `assignee` (spec.md
    /// §3's `claim` invariant).
    pub fn is_claimable_by(&self, assignee: &str) -> bool {
        match self.status {
            BeadStatus::Open => true,
            BeadStatus::InProgress => self.assignee.as_deref() == Some(assignee),
            BeadStatus::Closed => false,
        }
    }
}

/// Inputs to `Create` (spec.md §4.1's `Create(b)` row).
#[derive(Debug, Clone, Default)]
pub struct NewBead {
    pub title: String,
    pub kind: Option<String>,
    pub parent_id: Option<String>,
    pub step_ref: Option<String>,
    pub needs: Vec<String>,
    pub description: Option<String>,
    pub labels: BTreeSet<String>,
}

impl NewBead {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_ref(mut self, step_ref: impl Into<String>) -> Self {
        self.step_ref = Some(step_ref.into());
        self
    }

    pub fn with_needs(mut self, needs: Vec<String>) -> Self {
        self.needs = needs;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }
}

/// Non-absent field patches applied by `Update` (spec.md §4.1's
/// `Update(id, opts)` row: "applies only non-absent fields").
#[derive(Debug, Clone, Default)]
pub struct BeadPatch {
    pub title: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub labels: Option<BTreeSet<String>>,
}

impl BeadPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_labels(mut self, labels: BTreeSet<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub(crate) fn apply(&self, bead: &mut Bead) {
        if let Some(ref title) = self.title {
            bead.title = title.clone();
        }
        if let Some(ref kind) = self.kind {
            bead.kind = kind.clone();
        }
        if let Some(ref description) = self.description {
            bead.description = Some(description.clone());
        }
        if let Some(ref labels) = self.labels {
            bead.labels = labels.clone();
        }
    }
}

/// One step of a `Formula` (spec.md §9, "Formula").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaStep {
    /// Step identifier, used as the child bead's `ref`.
    pub id: String,
    /// Description template; `{{key}}` placeholders are substituted from
    /// `MolCook`'s `vars` with no escaping (spec.md §9, second Open
    /// Question).
    pub description: String,
    /// Step ids (within this formula) that must close before this one.
    #[serde(default)]
    pub needs: Vec<String>,
}

/// A declarative workflow template instantiated by `MolCook` into a
/// molecule bead plus one child bead per step (spec.md §4.1's `MolCook`
/// row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    pub steps: Vec<FormulaStep>,
}

impl Formula {
    pub fn new(name: impl Into<String>, steps: Vec<FormulaStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

/// Substitute every `{{key}}` occurrence in `template` using `vars`,
/// leaving unmatched placeholders untouched (spec.md §9: "deliberate but
/// brittle", no escaping).
pub fn substitute_vars(template: &str, vars: &[(String, String)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}
