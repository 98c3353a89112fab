//! Scoped overrides of session-wide load settings.
//!
//! Each guard snapshots what it changes when created and puts it back when
//! dropped, so the restore also happens when the owning future fails or is
//! dropped before completion.

use crate::influencers::{CacheMode, EntityGraph, GraphSemantic, LoadQueryInfluencers};
use std::sync::Arc;

/// Temporarily replaces the session cache mode.
#[derive(Debug)]
#[must_use = "the previous cache mode is restored when the guard is dropped"]
pub struct CacheModeOverride {
    influencers: Arc<LoadQueryInfluencers>,
    previous: CacheMode,
    changed: bool,
}

impl CacheModeOverride {
    /// Apply `requested` if it differs from the current mode.
    pub fn apply(influencers: &Arc<LoadQueryInfluencers>, requested: Option<CacheMode>) -> Self {
        let previous = influencers.cache_mode();
        let changed = match requested {
            Some(mode) if mode != previous => {
                influencers.set_cache_mode(mode);
                true
            }
            _ => false,
        };
        Self {
            influencers: Arc::clone(influencers),
            previous,
            changed,
        }
    }

    pub fn changed(&self) -> bool {
        self.changed
    }
}

impl Drop for CacheModeOverride {
    fn drop(&mut self) {
        if self.changed {
            self.influencers.set_cache_mode(self.previous);
        }
    }
}

/// Temporarily sets the effective entity graph.
#[derive(Debug)]
#[must_use = "the effective graph is cleared when the guard is dropped"]
pub struct GraphOverride {
    influencers: Arc<LoadQueryInfluencers>,
    applied: bool,
}

impl GraphOverride {
    pub fn apply(
        influencers: &Arc<LoadQueryInfluencers>,
        graph: Option<(EntityGraph, GraphSemantic)>,
    ) -> Self {
        let applied = match graph {
            Some((graph, semantic)) => {
                influencers.apply_graph(graph, semantic);
                true
            }
            None => false,
        };
        Self {
            influencers: Arc::clone(influencers),
            applied,
        }
    }
}

impl Drop for GraphOverride {
    fn drop(&mut self) {
        if self.applied {
            self.influencers.clear_graph();
        }
    }
}
