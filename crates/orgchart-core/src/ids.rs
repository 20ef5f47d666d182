//! Identifier helpers.
//!
//! Every entity id is a time-ordered UUID (v7) rendered in its canonical
//! 36-character hyphenated form. The string `"0"` is the virtual root
//! sentinel: it is used as the parent of real roots and as the head of
//! every ancestor path, and is never a valid node id.

use uuid::Uuid;

use crate::error::{OrgChartError, OrgChartResult};

/// The virtual root sentinel.
pub const ROOT_SENTINEL: &str = "0";

/// Generate a new time-ordered identifier.
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// Parse an entity identifier in canonical form.
pub fn parse_id(raw: &str) -> OrgChartResult<Uuid> {
    let raw = raw.trim();
    if raw == ROOT_SENTINEL {
        return Err(OrgChartError::invalid(
            "the root sentinel is not a valid identifier",
        ));
    }
    if raw.len() != 36 {
        return Err(OrgChartError::invalid(format!(
            "identifier must be 36 characters: {raw}"
        )));
    }
    Uuid::parse_str(raw)
        .map_err(|e| OrgChartError::invalid(format!("invalid identifier {raw}: {e}")))
}

/// Parse a parent reference. `"0"` and the empty string mean "no parent".
pub fn parse_parent(raw: &str) -> OrgChartResult<Option<Uuid>> {
    match raw.trim() {
        "" | ROOT_SENTINEL => Ok(None),
        other => parse_id(other).map(Some),
    }
}

/// Render a parent reference, using the sentinel for roots.
pub fn parent_to_string(parent: Option<Uuid>) -> String {
    parent.map_or_else(|| ROOT_SENTINEL.to_string(), |p| p.to_string())
}
