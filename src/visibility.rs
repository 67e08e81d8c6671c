//! # Visibility Index
//!
//! Keeps the set of on-screen entity ids in step with the map viewport.
//!
//! After the renderer goes idle following a data load, and after every
//! viewport settle, the index asks the renderer which features are drawn in
//! each layer group, extracts their stable ids and publishes all three
//! categories as a single [`VisibleSet`] on a watch channel. Consumers only
//! ever see whole sets.
//!
//! Refreshes are ticketed: a result computed for an older ticket than the
//! newest one handed out is dropped (latest-wins).

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

/// Logical category of rendered features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerGroup {
    Activities,
    Routes,
    Waypoints,
}

impl LayerGroup {
    pub const ALL: [LayerGroup; 3] = [
        LayerGroup::Activities,
        LayerGroup::Routes,
        LayerGroup::Waypoints,
    ];
}

/// Stable identity of a rendered entity.
///
/// String and numeric ids are distinct values: `42` and `"42"` are two
/// different entities.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StableId {
    Text(String),
    /// Numeric id in its JSON text form
    Number(String),
}

impl From<&str> for StableId {
    fn from(id: &str) -> Self {
        StableId::Text(id.to_string())
    }
}

impl From<i64> for StableId {
    fn from(id: i64) -> Self {
        StableId::Number(id.to_string())
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StableId::Text(id) | StableId::Number(id) => f.write_str(id),
        }
    }
}

/// A feature as reported by the renderer's rendered-feature query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedFeature {
    /// Style layer the feature was drawn in
    pub layer_id: String,
    pub properties: Map<String, Value>,
}

impl RenderedFeature {
    pub fn new(layer_id: &str, properties: Map<String, Value>) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            properties,
        }
    }

    /// Stable id under `property`. Every string (the empty one included)
    /// and every number is an id; null, missing and other value types
    /// yield `None`.
    pub fn stable_id(&self, property: &str) -> Option<StableId> {
        match self.properties.get(property)? {
            Value::String(s) => Some(StableId::Text(s.clone())),
            Value::Number(n) => Some(StableId::Number(n.to_string())),
            _ => None,
        }
    }
}

/// Host renderer capability: which features are drawn in these layers.
pub trait FeatureQuery: Send + Sync {
    fn query_rendered_features(&self, layer_ids: &[String]) -> Vec<RenderedFeature>;
}

/// Renderer notifications the index reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RendererEvent {
    /// Source data finished loading; arms the next first-idle refresh
    DataLoaded,
    /// Renderer has nothing left to draw
    Idle,
    /// Pan/zoom gesture started
    MoveStart,
    /// Viewport stopped changing
    Settle,
}

/// Configuration for visibility indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Style layers holding activity lines
    pub activity_layers: Vec<String>,
    /// Style layers holding saved routes
    pub route_layers: Vec<String>,
    /// Style layers holding waypoints
    pub waypoint_layers: Vec<String>,
    /// Feature property carrying the stable id. Default: "id"
    pub id_property: String,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            activity_layers: vec!["activity-lines".to_string()],
            route_layers: vec!["saved-routes".to_string(), "saved-routes-casing".to_string()],
            waypoint_layers: vec!["waypoints".to_string()],
            id_property: "id".to_string(),
        }
    }
}

impl VisibilityConfig {
    pub fn layers(&self, group: LayerGroup) -> &[String] {
        match group {
            LayerGroup::Activities => &self.activity_layers,
            LayerGroup::Routes => &self.route_layers,
            LayerGroup::Waypoints => &self.waypoint_layers,
        }
    }
}

/// Ids of everything currently drawn, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleSet {
    /// Ticket number that produced this set, 0 before the first refresh
    pub revision: u64,
    pub activities: BTreeSet<StableId>,
    pub routes: BTreeSet<StableId>,
    pub waypoints: BTreeSet<StableId>,
}

impl VisibleSet {
    pub fn ids(&self, group: LayerGroup) -> &BTreeSet<StableId> {
        match group {
            LayerGroup::Activities => &self.activities,
            LayerGroup::Routes => &self.routes,
            LayerGroup::Waypoints => &self.waypoints,
        }
    }

    fn ids_mut(&mut self, group: LayerGroup) -> &mut BTreeSet<StableId> {
        match group {
            LayerGroup::Activities => &mut self.activities,
            LayerGroup::Routes => &mut self.routes,
            LayerGroup::Waypoints => &mut self.waypoints,
        }
    }

    /// Combined size of the three sets.
    pub fn len(&self) -> usize {
        self.activities.len() + self.routes.len() + self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identifies one refresh; only the newest ticket may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

/// Viewport visibility index over an injected renderer query.
pub struct VisibilityIndex {
    query: Arc<dyn FeatureQuery>,
    config: VisibilityConfig,
    sender: watch::Sender<Arc<VisibleSet>>,
    latest_ticket: u64,
    first_idle_pending: bool,
}

impl VisibilityIndex {
    pub fn new(query: Arc<dyn FeatureQuery>, config: VisibilityConfig) -> Self {
        let (sender, _) = watch::channel(Arc::new(VisibleSet::default()));
        Self {
            query,
            config,
            sender,
            latest_ticket: 0,
            first_idle_pending: false,
        }
    }

    /// Receive every published set. The current one is available immediately.
    pub fn subscribe(&self) -> watch::Receiver<Arc<VisibleSet>> {
        self.sender.subscribe()
    }

    /// Most recently published set.
    pub fn current(&self) -> Arc<VisibleSet> {
        Arc::clone(&self.sender.borrow())
    }

    /// React to a renderer event. Returns whether a set was published.
    pub fn handle_event(&mut self, event: RendererEvent) -> bool {
        match event {
            RendererEvent::DataLoaded => {
                self.first_idle_pending = true;
                false
            }
            RendererEvent::Idle if self.first_idle_pending => {
                self.first_idle_pending = false;
                self.update_visible_ids()
            }
            RendererEvent::Settle => self.update_visible_ids(),
            RendererEvent::Idle | RendererEvent::MoveStart => false,
        }
    }

    /// Query, dedupe and publish all three categories in one step.
    pub fn update_visible_ids(&mut self) -> bool {
        let ticket = self.begin_refresh();
        let set = self.collect();
        self.finish_refresh(ticket, set)
    }

    /// Start a refresh; supersedes every ticket handed out before.
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.latest_ticket += 1;
        RefreshTicket(self.latest_ticket)
    }

    /// Ask the renderer for every layer group and build a set.
    pub fn collect(&self) -> VisibleSet {
        let mut set = VisibleSet::default();
        for group in LayerGroup::ALL {
            let layers = self.config.layers(group);
            if layers.is_empty() {
                continue;
            }
            let ids = set.ids_mut(group);
            for feature in self.query.query_rendered_features(layers) {
                if let Some(id) = feature.stable_id(&self.config.id_property) {
                    ids.insert(id);
                }
            }
        }
        set
    }

    /// Publish `set` if `ticket` is still the newest. Stale results are dropped.
    pub fn finish_refresh(&mut self, ticket: RefreshTicket, mut set: VisibleSet) -> bool {
        if ticket.0 != self.latest_ticket {
            debug!(
                "[Visibility] Dropping stale refresh {} (latest {})",
                ticket.0, self.latest_ticket
            );
            return false;
        }
        set.revision = ticket.0;
        debug!(
            "[Visibility] Revision {}: {} activities, {} routes, {} waypoints",
            set.revision,
            set.activities.len(),
            set.routes.len(),
            set.waypoints.len()
        );
        self.sender.send_replace(Arc::new(set));
        true
    }
}
