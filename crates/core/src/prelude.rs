//! Common type aliases re-exported across the workspace.

/// Cheaply-cloneable interned string, used for upstream names, tool ids, and
/// anywhere else a small string gets cloned into many index entries.
pub type Strng = arcstr::ArcStr;

/// Build a `Strng` from anything string-like without an extra allocation when
/// the input is already owned.
pub fn strng(s: impl Into<Strng>) -> Strng {
    s.into()
}
