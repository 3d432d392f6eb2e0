//! Printer identifier reconciliation.
//!
//! The backend may report the same printer id more than once, and printers
//! selected during setup may collide with ids already persisted by other
//! configuration entries. Every one of these cases is resolved here by the
//! same routine: walk the records in order and give each colliding id a
//! numeric suffix (`P1` -> `P1_2`).
//!
//! The reconciler never fails and never touches host storage. Callers pass in
//! a read-only snapshot of the ids that are already in use and decide
//! themselves whether the resulting renames are applied straight away
//! ([`SuffixStyle::Silent`]) or shown to the operator first
//! ([`SuffixStyle::Confirm`]).

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;

/// Separator between an identifier and a reconciliation suffix.
pub const SEPARATOR: char = '_';

/// A printer as reported by the backend or as persisted in a config entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterRecord {
    /// Identity of the printer. Unique within a config entry once reconciled.
    pub id: String,

    /// Display name, never used as a key.
    pub name: String,

    /// Backend id this record was renamed from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl PrinterRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_id: None,
        }
    }

    /// The id the backend knows this printer by.
    pub fn backend_id(&self) -> &str {
        self.source_id.as_deref().unwrap_or(&self.id)
    }

    /// Label shown in printer selection forms.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }

    /// Copy of this record carrying a new identity.
    fn renamed(&self, new_id: &str) -> Self {
        if new_id == self.id {
            return self.clone();
        }
        Self {
            id: new_id.to_string(),
            name: self.name.clone(),
            source_id: Some(self.backend_id().to_string()),
        }
    }
}

/// How the caller intends to apply the renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuffixStyle {
    /// Renames are applied immediately. Collisions with the used set are
    /// detected by exact identifier match.
    Silent,

    /// Renames are shown to the operator and applied on acknowledgment.
    /// Collisions with the used set are detected by base identifier, so a
    /// printer that another entry already manages under a suffixed id is
    /// still recognised.
    Confirm,
}

/// One reconciliation decision. `old == new` means the id was kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub old: String,
    pub new: String,
}

impl Rename {
    pub fn is_changed(&self) -> bool {
        self.old != self.new
    }
}

/// Outcome of [`reconcile`]: one [`Rename`] per input record, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub style: SuffixStyle,
    pub renames: Vec<Rename>,
}

impl Reconciliation {
    /// Whether any identifier had to change.
    pub fn has_changes(&self) -> bool {
        self.renames.iter().any(Rename::is_changed)
    }

    /// Renames that actually changed an identifier.
    pub fn changed(&self) -> impl Iterator<Item = &Rename> {
        self.renames.iter().filter(|r| r.is_changed())
    }

    /// Final identifiers, in input order.
    pub fn new_ids(&self) -> Vec<String> {
        self.renames.iter().map(|r| r.new.clone()).collect()
    }

    /// Apply the renames to the records they were computed from.
    ///
    /// `records` must be the same sequence that was passed to [`reconcile`];
    /// names are always taken from the original record.
    pub fn apply(&self, records: &[PrinterRecord]) -> Vec<PrinterRecord> {
        debug_assert_eq!(records.len(), self.renames.len());
        records
            .iter()
            .zip(&self.renames)
            .map(|(record, rename)| record.renamed(&rename.new))
            .collect()
    }
}

/// Strip a reconciliation suffix (`_<digits>`) from an identifier.
///
/// `"P1_2"` has base `"P1"`, `"P1"` and `"P1_"` are their own base.
pub fn base_id(id: &str) -> &str {
    match id.rsplit_once(SEPARATOR) {
        Some((base, suffix))
            if !base.is_empty()
                && !suffix.is_empty()
                && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => id,
    }
}

/// Make the identifiers of `records` unique, avoiding everything in `used`.
///
/// Records are walked in order. A record keeps its id unless it collides
/// with `used` (see [`SuffixStyle`] for how) or with an id already emitted
/// earlier in the walk. A colliding id becomes `<id>_<n>` where `n` is one
/// more than the number of used ids and earlier records sharing its base.
/// If that candidate is itself taken, `n` is incremented until it is not.
///
/// Output ids are pairwise distinct, disjoint from `used`, and depend only
/// on the input order and the contents of `used`.
pub fn reconcile(
    records: &[PrinterRecord],
    used: &BTreeSet<String>,
    style: SuffixStyle,
) -> Reconciliation {
    let mut used_per_base: HashMap<&str, usize> = HashMap::new();
    for id in used {
        *used_per_base.entry(base_id(id)).or_default() += 1;
    }

    let mut seen_per_base: HashMap<&str, usize> = HashMap::new();
    let mut emitted: HashSet<String> = HashSet::with_capacity(records.len());
    let mut renames = Vec::with_capacity(records.len());

    for record in records {
        let id = record.id.as_str();
        let base = base_id(id);
        let used_count = used_per_base.get(base).copied().unwrap_or(0);
        let seen_count = seen_per_base.get(base).copied().unwrap_or(0);

        let collides_with_used = match style {
            SuffixStyle::Silent => used.contains(id),
            SuffixStyle::Confirm => used_count > 0,
        };

        let new = if collides_with_used || emitted.contains(id) {
            let mut n = used_count + seen_count + 1;
            loop {
                let candidate = format!("{id}{SEPARATOR}{n}");
                if !used.contains(&candidate) && !emitted.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            }
        } else {
            id.to_string()
        };

        *seen_per_base.entry(base).or_default() += 1;
        emitted.insert(new.clone());
        renames.push(Rename {
            old: id.to_string(),
            new,
        });
    }

    Reconciliation { style, renames }
}
