//! The full set of dashboard caches and the envelope that routes events to them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::clock::Clock;
use super::config::CacheConfig;
use super::domains::{
    GRAPH_CACHE_NAME, IntegrationCache, IntegrationSnapshot, KeyedWidget, ResourceCache,
    VALUE_CACHE_NAME, WidgetGraphCache, WidgetValueCache, WorkspaceCache,
};
use super::entry::Payload;
use super::events::RawEvent;
use super::keys::{ResourceKey, WorkspaceKey};
use super::store::{KeyedEntry, Outcome};

/// Which cache a wire event targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    #[default]
    Resource,
    Integration,
    Workspace,
    WidgetValue,
    WidgetGraph,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resource => ResourceCache::NAME,
            Self::Integration => IntegrationCache::NAME,
            Self::Workspace => WorkspaceCache::NAME,
            Self::WidgetValue => VALUE_CACHE_NAME,
            Self::WidgetGraph => GRAPH_CACHE_NAME,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire event tagged with its target domain.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainEvent {
    #[serde(default)]
    pub domain: Domain,
    #[serde(flatten)]
    pub event: RawEvent,
}

/// One instance of every dashboard cache, shared by producers and readers.
pub struct DashboardCaches {
    resources: ResourceCache,
    integrations: IntegrationCache,
    workspace: WorkspaceCache,
    widget_values: WidgetValueCache,
    widget_graphs: WidgetGraphCache,
}

impl DashboardCaches {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            resources: ResourceCache::new(config.clone(), Arc::clone(&clock)),
            integrations: IntegrationCache::new(config.clone(), Arc::clone(&clock)),
            workspace: WorkspaceCache::new(config, clock),
            widget_values: WidgetValueCache::new(VALUE_CACHE_NAME),
            widget_graphs: WidgetGraphCache::new(GRAPH_CACHE_NAME),
        }
    }

    pub fn resources(&self) -> &ResourceCache {
        &self.resources
    }

    pub fn integrations(&self) -> &IntegrationCache {
        &self.integrations
    }

    pub fn workspace(&self) -> &WorkspaceCache {
        &self.workspace
    }

    pub fn widget_values(&self) -> &WidgetValueCache {
        &self.widget_values
    }

    pub fn widget_graphs(&self) -> &WidgetGraphCache {
        &self.widget_graphs
    }

    /// Hand a wire event to the cache of its domain.
    pub fn route(&self, event: DomainEvent) -> Outcome {
        let DomainEvent { domain, event } = event;
        match domain {
            Domain::Resource => self.resources.apply_raw(event).outcome(),
            Domain::Integration => self.integrations.apply_raw(event).outcome(),
            Domain::Workspace => self.workspace.apply_raw(event).outcome(),
            Domain::WidgetValue => self.widget_values.apply_raw(event).outcome(),
            Domain::WidgetGraph => self.widget_graphs.apply_raw(event).outcome(),
        }
    }

    /// Strictly invalidate expired entries in every TTL cache.
    pub fn purge_expired(&self) -> usize {
        self.resources.store().purge_expired()
            + self.integrations.store().purge_expired()
            + self.workspace.store().purge_expired()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            resources: self.resources.snapshot(),
            integrations: self.integrations.snapshot(),
            workspace: self.workspace.snapshot(),
            widget_values: self.widget_values.snapshot(),
            widget_graphs: self.widget_graphs.snapshot(),
        }
    }
}

impl fmt::Debug for DashboardCaches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashboardCaches")
            .field("resources", &self.resources)
            .field("integrations", &self.integrations)
            .field("workspace", &self.workspace)
            .field("widget_values", &self.widget_values)
            .field("widget_graphs", &self.widget_graphs)
            .finish()
    }
}

/// Point-in-time contents of every dashboard cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub resources: Vec<KeyedEntry<ResourceKey>>,
    pub integrations: IntegrationSnapshot,
    pub workspace: Vec<KeyedEntry<WorkspaceKey>>,
    pub widget_values: Vec<KeyedWidget<Payload>>,
    pub widget_graphs: Vec<KeyedWidget<Payload>>,
}
