//! Session-wide settings that influence how entities are loaded.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// How a load interacts with the second-level cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheMode {
    /// Read from and write to the cache.
    #[default]
    Normal,
    /// Read from the cache, never write to it.
    Get,
    /// Write to the cache, never read from it.
    Put,
    /// Bypass the cache entirely.
    Ignore,
    /// Write to the cache, overwriting what is there.
    Refresh,
}

impl CacheMode {
    pub const fn is_get_enabled(self) -> bool {
        matches!(self, CacheMode::Normal | CacheMode::Get)
    }

    pub const fn is_put_enabled(self) -> bool {
        matches!(self, CacheMode::Normal | CacheMode::Put | CacheMode::Refresh)
    }
}

/// How an entity graph relates to the mapped fetch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphSemantic {
    /// Attributes in the graph are eager, everything else is lazy.
    Fetch,
    /// Attributes in the graph are eager, everything else keeps its mapping.
    Load,
}

impl GraphSemantic {
    /// The hint name used for this semantic.
    pub const fn hint_name(self) -> &'static str {
        match self {
            GraphSemantic::Fetch => "jakarta.persistence.fetchgraph",
            GraphSemantic::Load => "jakarta.persistence.loadgraph",
        }
    }
}

/// A named set of associations to include eagerly in a load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityGraph {
    root: String,
    attributes: Vec<String>,
}

impl EntityGraph {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            attributes: Vec::new(),
        }
    }

    /// Add an attribute node (builder pattern).
    #[must_use]
    pub fn with(mut self, attribute: impl Into<String>) -> Self {
        self.attributes.push(attribute.into());
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn includes(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }
}

/// The graph currently applied to the session, with its semantic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveGraph {
    pub graph: EntityGraph,
    pub semantic: GraphSemantic,
}

/// Session-wide load settings.
///
/// Shared through `Arc` between the session state and the scoped overrides
/// in [`crate::scoped`], which restore the previous values on drop.
#[derive(Debug, Default)]
pub struct LoadQueryInfluencers {
    cache_mode: Mutex<CacheMode>,
    effective_graph: Mutex<Option<EffectiveGraph>>,
    read_only: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoadQueryInfluencers {
    pub fn new(cache_mode: CacheMode, read_only: bool) -> Self {
        Self {
            cache_mode: Mutex::new(cache_mode),
            effective_graph: Mutex::new(None),
            read_only: AtomicBool::new(read_only),
        }
    }

    pub fn cache_mode(&self) -> CacheMode {
        *lock(&self.cache_mode)
    }

    pub fn set_cache_mode(&self, mode: CacheMode) {
        *lock(&self.cache_mode) = mode;
    }

    pub fn effective_graph(&self) -> Option<EffectiveGraph> {
        lock(&self.effective_graph).clone()
    }

    pub fn apply_graph(&self, graph: EntityGraph, semantic: GraphSemantic) {
        tracing::trace!(root = graph.root(), ?semantic, "Applying entity graph");
        *lock(&self.effective_graph) = Some(EffectiveGraph { graph, semantic });
    }

    pub fn clear_graph(&self) {
        *lock(&self.effective_graph) = None;
    }

    pub fn read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }
}
