//! Version allocation
//!
//! Version strings look like `<schema><git suffix>`: `7`, `1_4_2`,
//! `3-gabc123` or `2_gf00d`. Only the schema is incremented; the suffix
//! (from the first `-g` or `_g` on) is carried unchanged.

use crate::error::{EngineError, Result};
use std::collections::HashSet;
use std::future::Future;
use tracing::debug;

/// The version that follows `current`.
///
/// The last `_`-separated number of the schema is incremented, or the whole
/// schema when it is a plain number. Anything else restarts at `1`.
pub fn next_version(current: &str) -> String {
    let (schema, suffix) = split_git_suffix(current);
    format!("{}{suffix}", increment_schema(schema))
}

pub(crate) fn split_git_suffix(version: &str) -> (&str, &str) {
    match [version.find("-g"), version.find("_g")]
        .into_iter()
        .flatten()
        .min()
    {
        Some(at) => version.split_at(at),
        None => (version, ""),
    }
}

fn increment_schema(schema: &str) -> String {
    match schema.rsplit_once('_') {
        Some((head, tail)) => {
            if let Ok(n) = tail.parse::<i64>() {
                return format!("{head}_{}", n.saturating_add(1));
            }
        }
        None => {
            if let Ok(n) = schema.parse::<i64>() {
                return n.saturating_add(1).to_string();
            }
        }
    }
    "1".to_string()
}

/// Finds the first unused version after a given one
#[derive(Debug, Clone)]
pub struct VersionAllocator {
    max_attempts: usize,
}

impl VersionAllocator {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    /// Step from `current` with [`next_version`] until `exists` reports a
    /// candidate as free.
    ///
    /// Fails when a candidate repeats or after `max_attempts` candidates.
    pub async fn allocate<F, Fut>(&self, current: &str, mut exists: F) -> Result<String>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let mut seen = HashSet::new();
        let mut current = current.to_string();

        for _ in 0..self.max_attempts {
            let candidate = next_version(&current);
            if !seen.insert(candidate.clone()) {
                return Err(EngineError::VersionNoProgress { candidate });
            }
            if !exists(candidate.clone()).await? {
                debug!(from = %current, version = %candidate, "Allocated version");
                return Ok(candidate);
            }
            current = candidate;
        }

        Err(EngineError::VersionExhausted {
            seed: current,
            attempts: self.max_attempts,
        })
    }
}
