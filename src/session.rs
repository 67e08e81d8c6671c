//! # Map Session
//!
//! Host-facing entry point. The host builds one [`MapContext`] holding the
//! renderer query, the position source, the matching service and the
//! persistence sink, and hands it to [`MapSession::new`]. The session owns
//! the recorder, snap pipeline and visibility index for its lifetime and
//! releases every subscription on [`MapSession::shutdown`] (or drop).
//!
//! There is no global state: two sessions over two maps never share
//! anything.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Result, TrackError};
use crate::recorder::{LiveTrackRecorder, PositionSource, RecordedTrack};
use crate::snap::{CancelHandle, DrawnRoute, MatchService, RouteSnapPipeline, SnapConfig};
use crate::visibility::{
    FeatureQuery, RendererEvent, VisibilityConfig, VisibilityIndex, VisibleSet,
};
use crate::GpsPoint;

/// Storage collaborator for finished tracks and routes.
pub trait PersistenceSink: Send + Sync {
    fn save_track(&self, track: RecordedTrack) -> Result<()>;
    fn save_route(&self, route: DrawnRoute) -> Result<()>;
}

/// Host capabilities handed to a session.
pub struct MapContext<M: MatchService> {
    pub renderer: Arc<dyn FeatureQuery>,
    /// `None` when the platform has no location provider
    pub positions: Option<Arc<dyn PositionSource>>,
    pub matcher: M,
    pub persistence: Arc<dyn PersistenceSink>,
}

/// Combined configuration, usually passed in as JSON by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub snap: SnapConfig,
    pub visibility: VisibilityConfig,
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TrackError::Config {
            message: e.to_string(),
        })
    }
}

/// The three track-processing components bound to one map.
pub struct MapSession<M: MatchService> {
    recorder: LiveTrackRecorder,
    pipeline: RouteSnapPipeline<M>,
    visibility: VisibilityIndex,
    persistence: Arc<dyn PersistenceSink>,
}

impl<M: MatchService> MapSession<M> {
    pub fn new(context: MapContext<M>, config: SessionConfig) -> Self {
        crate::init_logging();
        info!(
            "[MapSession] Created (position source: {})",
            if context.positions.is_some() { "yes" } else { "no" }
        );

        Self {
            recorder: LiveTrackRecorder::new(context.positions),
            pipeline: RouteSnapPipeline::with_config(context.matcher, config.snap),
            visibility: VisibilityIndex::new(context.renderer, config.visibility),
            persistence: context.persistence,
        }
    }

    // ========================================================================
    // Recording
    // ========================================================================

    pub fn recorder(&self) -> &LiveTrackRecorder {
        &self.recorder
    }

    pub fn start_recording(&mut self) -> Result<()> {
        self.recorder.start()
    }

    pub fn start_recording_at(&mut self, start_time: i64) -> Result<()> {
        self.recorder.start_at(start_time)
    }

    /// Apply queued position events.
    pub fn pump_positions(&mut self) -> usize {
        self.recorder.pump()
    }

    /// Stop recording and hand the track to persistence.
    ///
    /// Returns `None` when nothing was recording or no sample arrived.
    pub fn stop_recording(&mut self) -> Result<Option<RecordedTrack>> {
        if !self.recorder.is_recording() {
            return Ok(None);
        }
        self.recorder.stop();

        if self.recorder.track().is_empty() {
            info!("[MapSession] Recording stopped without samples, nothing to save");
            return Ok(None);
        }

        let recorded = self.recorder.snapshot()?;
        self.persistence.save_track(recorded.clone())?;
        Ok(Some(recorded))
    }

    pub fn reset_recording(&mut self) {
        self.recorder.reset();
    }

    // ========================================================================
    // Route Drawing
    // ========================================================================

    pub fn pipeline(&self) -> &RouteSnapPipeline<M> {
        &self.pipeline
    }

    /// Snap `anchors` into a route, store it and return it.
    pub async fn draw_route(
        &self,
        id: &str,
        name: &str,
        anchors: &[GpsPoint],
        created_at: i64,
    ) -> Result<DrawnRoute> {
        let path = self.pipeline.snap(anchors).await?;
        let route = DrawnRoute::from_path(id, name, path, created_at);
        self.persistence.save_route(route.clone())?;
        Ok(route)
    }

    /// Discard the route draw in flight; nothing is persisted for it.
    pub fn cancel_drawing(&self) {
        self.pipeline.cancel();
    }

    pub fn drawing_cancel_handle(&self) -> CancelHandle {
        self.pipeline.cancel_handle()
    }

    // ========================================================================
    // Visibility
    // ========================================================================

    pub fn on_renderer_event(&mut self, event: RendererEvent) -> bool {
        self.visibility.handle_event(event)
    }

    pub fn refresh_visible_ids(&mut self) -> bool {
        self.visibility.update_visible_ids()
    }

    pub fn visible_ids(&self) -> watch::Receiver<Arc<VisibleSet>> {
        self.visibility.subscribe()
    }

    pub fn current_visible(&self) -> Arc<VisibleSet> {
        self.visibility.current()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Cancel any draw, finish and store a running recording, release the
    /// position subscription.
    pub fn shutdown(mut self) -> Result<Option<RecordedTrack>> {
        self.pipeline.cancel();
        let recorded = self.stop_recording()?;
        info!("[MapSession] Shut down");
        Ok(recorded)
    }
}
