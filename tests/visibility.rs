//! Tests for viewport visibility indexing

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{feature, FakeRenderer};
use serde_json::{json, Value};
use trackline::{
    FeatureQuery, LayerGroup, RenderedFeature, RendererEvent, StableId, VisibilityConfig,
    VisibilityIndex,
};

fn id(text: &str) -> StableId {
    StableId::from(text)
}

fn fragmented_scene() -> Vec<RenderedFeature> {
    vec![
        // One activity split across tiles
        feature("activity-lines", json!("act-1")),
        feature("activity-lines", json!("act-1")),
        feature("activity-lines", json!(42)),
        feature("activity-lines", Value::Null),
        // Route line and its casing report the same id
        feature("saved-routes", json!("route-7")),
        feature("saved-routes-casing", json!("route-7")),
        feature("saved-routes", json!("route-8")),
        feature("waypoints", json!("wp-1")),
        feature("waypoints", json!("wp-2")),
        feature("waypoints", json!("wp-2")),
        // Not in any configured group
        feature("hillshade", json!("tile-3")),
    ]
}

#[test]
fn test_sets_hold_distinct_non_null_ids() {
    let renderer = Arc::new(FakeRenderer::with_features(fragmented_scene()));
    let config = VisibilityConfig::default();
    let mut index = VisibilityIndex::new(renderer.clone(), config.clone());

    assert!(index.handle_event(RendererEvent::Settle));
    let visible = index.current();

    // Count distinct non-null ids per group straight from the renderer
    let mut expected = 0;
    for group in LayerGroup::ALL {
        let ids: HashSet<StableId> = renderer
            .query_rendered_features(config.layers(group))
            .iter()
            .filter_map(|f| f.stable_id("id"))
            .collect();
        assert_eq!(visible.ids(group).len(), ids.len());
        expected += ids.len();
    }
    assert_eq!(visible.len(), expected);

    assert!(visible.activities.contains(&id("act-1")));
    assert!(visible.activities.contains(&StableId::from(42)));
    assert_eq!(visible.routes.len(), 2);
    assert_eq!(visible.waypoints.len(), 2);
}

#[test]
fn test_empty_string_is_a_valid_id() {
    let renderer = Arc::new(FakeRenderer::with_features(vec![
        feature("waypoints", json!("")),
        feature("waypoints", json!("wp-1")),
        feature("waypoints", Value::Null),
    ]));
    let mut index = VisibilityIndex::new(renderer, VisibilityConfig::default());

    assert!(index.update_visible_ids());
    let visible = index.current();
    assert_eq!(visible.waypoints.len(), 2);
    assert!(visible.waypoints.contains(&id("")));
    assert!(visible.waypoints.contains(&id("wp-1")));
}

#[test]
fn test_numeric_and_string_ids_stay_apart() {
    let renderer = Arc::new(FakeRenderer::with_features(vec![
        feature("activity-lines", json!(42)),
        feature("activity-lines", json!("42")),
        feature("activity-lines", json!(42)),
    ]));
    let mut index = VisibilityIndex::new(renderer, VisibilityConfig::default());

    assert!(index.update_visible_ids());
    let visible = index.current();
    assert_eq!(visible.activities.len(), 2);
    assert!(visible.activities.contains(&StableId::from(42)));
    assert!(visible.activities.contains(&id("42")));
}

#[test]
fn test_each_settle_replaces_the_whole_set() {
    let renderer = Arc::new(FakeRenderer::with_features(fragmented_scene()));
    let mut index = VisibilityIndex::new(renderer.clone(), VisibilityConfig::default());
    let receiver = index.subscribe();

    index.handle_event(RendererEvent::Settle);
    let first = receiver.borrow().clone();
    assert_eq!(first.revision, 1);

    renderer.set_features(vec![feature("waypoints", json!("wp-9"))]);
    index.handle_event(RendererEvent::MoveStart);
    // Nothing published until the viewport settles
    assert_eq!(receiver.borrow().revision, 1);

    index.handle_event(RendererEvent::Settle);
    let second = receiver.borrow().clone();
    assert_eq!(second.revision, 2);
    assert!(second.activities.is_empty());
    assert!(second.routes.is_empty());
    assert_eq!(second.waypoints.len(), 1);
    assert!(second.waypoints.contains(&id("wp-9")));

    // Earlier snapshot is untouched
    assert_eq!(first.routes.len(), 2);
}

#[test]
fn test_first_idle_after_data_load() {
    let renderer = Arc::new(FakeRenderer::with_features(fragmented_scene()));
    let mut index = VisibilityIndex::new(renderer.clone(), VisibilityConfig::default());

    assert!(!index.handle_event(RendererEvent::Idle));
    assert_eq!(renderer.queries.load(Ordering::SeqCst), 0);

    index.handle_event(RendererEvent::DataLoaded);
    assert!(index.handle_event(RendererEvent::Idle));
    assert!(!index.handle_event(RendererEvent::Idle));
    assert_eq!(index.current().revision, 1);

    // A reload arms it again
    index.handle_event(RendererEvent::DataLoaded);
    assert!(index.handle_event(RendererEvent::Idle));
    assert_eq!(index.current().revision, 2);
}

#[test]
fn test_overlapping_refresh_latest_wins() {
    let renderer = Arc::new(FakeRenderer::with_features(vec![feature(
        "activity-lines",
        json!("act-old"),
    )]));
    let mut index = VisibilityIndex::new(renderer.clone(), VisibilityConfig::default());
    let receiver = index.subscribe();

    let stale_ticket = index.begin_refresh();
    let stale = index.collect();

    renderer.set_features(vec![feature("activity-lines", json!("act-new"))]);
    assert!(index.update_visible_ids());

    // The slow refresh lands after the newer one and is dropped
    assert!(!index.finish_refresh(stale_ticket, stale));
    let visible = receiver.borrow().clone();
    assert!(visible.activities.contains(&id("act-new")));
    assert!(!visible.activities.contains(&id("act-old")));
}

#[test]
fn test_custom_id_property_and_layers() {
    let mut properties = serde_json::Map::new();
    properties.insert("routeId".to_string(), json!("r-1"));
    let renderer = Arc::new(FakeRenderer::with_features(vec![
        RenderedFeature::new("my-routes", properties),
        feature("saved-routes", json!("ignored")),
    ]));
    let config = VisibilityConfig {
        route_layers: vec!["my-routes".to_string()],
        id_property: "routeId".to_string(),
        ..VisibilityConfig::default()
    };
    let mut index = VisibilityIndex::new(renderer, config);

    index.update_visible_ids();
    let visible = index.current();
    assert_eq!(visible.routes.len(), 1);
    assert!(visible.routes.contains(&id("r-1")));
    assert!(visible.activities.is_empty());
}
