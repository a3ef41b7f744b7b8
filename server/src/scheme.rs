//! Process-wide registry of URL schemes served by the local transport.
//!
//! Registration is idempotent and owned by the registry: a repeated call is
//! a no-op, never an error, so composition roots (every `Server`
//! constructor) can register unconditionally. Entries live for the rest of
//! the process.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

static SCHEMES: Lazy<RwLock<HashSet<String>>> = Lazy::new(|| RwLock::new(HashSet::new()));

/// Makes URLs under `scheme` resolvable to a local `Transport`.
///
/// Returns `true` when this call performed the registration.
pub fn register(scheme: &str) -> bool {
    let scheme = scheme.to_ascii_lowercase();
    let inserted = SCHEMES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(scheme.clone());
    if inserted {
        debug!(%scheme, "url scheme registered");
    }
    inserted
}

/// Scheme names are compared case-insensitively, as in URLs.
pub fn is_registered(scheme: &str) -> bool {
    SCHEMES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(&scheme.to_ascii_lowercase())
}
