//! Domain adapters over the keyed stores.
//!
//! Each adapter fixes the key shape of its domain and adds the operations only
//! that domain has.

pub mod integration;
pub mod resource;
pub mod widget;
pub mod workspace;

pub use integration::{ALL_LOADED_FLAG, IntegrationCache, IntegrationSnapshot};
pub use resource::ResourceCache;
pub use widget::{
    GRAPH_CACHE_NAME, KeyedWidget, VALUE_CACHE_NAME, WidgetCache, WidgetEvent, WidgetGraphCache,
    WidgetState, WidgetValueCache,
};
pub use workspace::WorkspaceCache;
