//! # Live Track Recorder
//!
//! Consumes a position stream and accumulates a [`Track`]: distance,
//! elapsed time, average and current speed.
//!
//! ## Event delivery
//!
//! The recorder never attaches itself to a global sensor. On `start` it opens
//! an unbounded channel, hands the sending half to the injected
//! [`PositionSource`] and keeps the receiving half. Events are applied in
//! channel order by [`LiveTrackRecorder::pump`] (synchronous drain) or
//! [`LiveTrackRecorder::next_event`] (await one event). `stop` unsubscribes
//! and drops the receiver, so anything the source sends afterwards is lost.
//!
//! ## State machine
//!
//! `Idle --start--> Recording --stop--> Idle`, `reset` clears the track and
//! stops first if needed.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::error::{Result, TrackError};
use crate::geo_utils::haversine_distance;
use crate::{codec, Bounds, GpsPoint, Position};

// ============================================================================
// Position Source Boundary
// ============================================================================

/// A message from the position source.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Update(Position),
    Error(TrackError),
}

/// Sending half handed to the position source on subscribe.
pub type PositionSender = UnboundedSender<PositionEvent>;

/// Opaque handle identifying one subscription to a position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Host-provided sensor stream.
///
/// `subscribe` may fail with [`TrackError::SensorUnavailable`] when the
/// platform has no usable location provider.
pub trait PositionSource: Send + Sync {
    fn subscribe(&self, sender: PositionSender) -> Result<SubscriptionHandle>;
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

// ============================================================================
// Track
// ============================================================================

/// Accumulated state of one recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Samples in arrival order
    pub positions: Vec<Position>,
    /// Unix timestamp (milliseconds) when recording started
    pub start_time: i64,
    /// Seconds between `start_time` and the latest sample
    pub elapsed_time: f64,
    /// Cumulative haversine distance in meters
    pub distance: f64,
    /// distance / elapsed_time in m/s, 0 until time has elapsed
    pub average_speed: f64,
    /// Last sensor-reported speed in m/s
    pub current_speed: f64,
    pub is_recording: bool,
}

impl Track {
    fn started(start_time: i64) -> Self {
        Self {
            start_time,
            is_recording: true,
            ..Self::default()
        }
    }

    /// Apply one sample. Elapsed time never moves backwards: a sample
    /// stamped earlier than one already seen leaves it unchanged.
    fn apply_position(&mut self, position: Position) {
        self.positions.push(position);

        let n = self.positions.len();
        if n >= 2 {
            let prev = self.positions[n - 2].point();
            let last = self.positions[n - 1].point();
            self.distance += haversine_distance(&prev, &last);
        }

        let elapsed = (position.timestamp - self.start_time) as f64 / 1000.0;
        if elapsed > self.elapsed_time {
            self.elapsed_time = elapsed;
        }

        self.average_speed = if self.elapsed_time > 0.0 {
            self.distance / self.elapsed_time
        } else {
            0.0
        };

        if let Some(speed) = position.speed {
            self.current_speed = speed;
        }
    }

    pub fn points(&self) -> Vec<GpsPoint> {
        self.positions.iter().map(GpsPoint::from).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Frozen copy of a track, ready for the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedTrack {
    /// Unix timestamp (milliseconds)
    pub start_time: i64,
    /// Timestamp of the last sample, or `start_time` for an empty track
    pub end_time: i64,
    pub elapsed_time: f64,
    pub distance: f64,
    pub average_speed: f64,
    /// Highest sensor-reported speed in m/s
    pub max_speed: f64,
    pub bounds: Option<Bounds>,
    /// 5-digit encoded polyline of the samples
    pub polyline: String,
    pub positions: Vec<Position>,
}

impl RecordedTrack {
    pub fn from_track(track: &Track) -> Result<Self> {
        let points = track.points();
        let max_speed = track
            .positions
            .iter()
            .filter_map(|p| p.speed)
            .fold(0.0, f64::max);

        Ok(Self {
            start_time: track.start_time,
            end_time: track
                .positions
                .last()
                .map(|p| p.timestamp)
                .unwrap_or(track.start_time),
            elapsed_time: track.elapsed_time,
            distance: track.distance,
            average_speed: track.average_speed,
            max_speed,
            bounds: Bounds::from_points(&points),
            polyline: codec::encode(&points)?,
            positions: track.positions.clone(),
        })
    }
}

// ============================================================================
// Recorder
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    Idle,
    Recording,
}

struct Subscription {
    handle: SubscriptionHandle,
    receiver: UnboundedReceiver<PositionEvent>,
}

/// Records a live GPS track from an injected position source.
pub struct LiveTrackRecorder {
    source: Option<Arc<dyn PositionSource>>,
    track: Track,
    subscription: Option<Subscription>,
    sensor_errors: u32,
}

impl LiveTrackRecorder {
    /// Create a recorder. `None` means the platform has no position source;
    /// `start` will then fail with `SensorUnavailable`.
    pub fn new(source: Option<Arc<dyn PositionSource>>) -> Self {
        Self {
            source,
            track: Track::default(),
            subscription: None,
            sensor_errors: 0,
        }
    }

    pub fn state(&self) -> RecorderState {
        if self.subscription.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Sensor errors seen since the last start.
    pub fn sensor_errors(&self) -> u32 {
        self.sensor_errors
    }

    /// Start recording, stamping the track with the current wall-clock time.
    pub fn start(&mut self) -> Result<()> {
        self.start_at(Utc::now().timestamp_millis())
    }

    /// Start recording with an explicit start time (Unix milliseconds).
    ///
    /// Fails with `SensorUnavailable` and leaves the track untouched when
    /// there is no source or the source refuses the subscription.
    pub fn start_at(&mut self, start_time: i64) -> Result<()> {
        if self.is_recording() {
            debug!("[Recorder] start() while already recording, ignoring");
            return Ok(());
        }

        let source = self.source.as_ref().ok_or(TrackError::SensorUnavailable)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = source.subscribe(sender).map_err(|e| {
            warn!("[Recorder] Position source refused subscription: {}", e);
            e
        })?;

        self.track = Track::started(start_time);
        self.sensor_errors = 0;
        self.subscription = Some(Subscription { handle, receiver });

        info!("[Recorder] Recording started at {}", start_time);
        Ok(())
    }

    /// Stop recording. Events already queued are applied first; later ones
    /// are discarded along with the subscription.
    pub fn stop(&mut self) {
        if !self.is_recording() {
            return;
        }
        self.pump();

        if let Some(subscription) = self.subscription.take() {
            self.release(subscription.handle);
        }
        self.track.is_recording = false;

        info!(
            "[Recorder] Recording stopped: {} points, {:.0}m in {:.0}s",
            self.track.positions.len(),
            self.track.distance,
            self.track.elapsed_time
        );
    }

    /// Clear the track back to its initial shape. Stops first if recording.
    pub fn reset(&mut self) {
        if self.is_recording() {
            debug!("[Recorder] reset() while recording, stopping first");
            self.stop();
        }
        self.track = Track::default();
        self.sensor_errors = 0;
    }

    /// Apply every event currently queued. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                break;
            };
            match subscription.receiver.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("[Recorder] Position source closed its sender");
                    break;
                }
            }
        }
        handled
    }

    /// Wait for the next event and apply it.
    ///
    /// Returns `false` when not recording or the source has gone away.
    pub async fn next_event(&mut self) -> bool {
        let event = match self.subscription.as_mut() {
            Some(subscription) => subscription.receiver.recv().await,
            None => return false,
        };
        match event {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    pub fn handle_event(&mut self, event: PositionEvent) {
        match event {
            PositionEvent::Update(position) => self.apply_position(position),
            PositionEvent::Error(error) => self.apply_error(error),
        }
    }

    /// Handle one position update. Ignored unless recording.
    pub fn apply_position(&mut self, position: Position) {
        if !self.track.is_recording {
            debug!("[Recorder] Dropping position received while idle");
            return;
        }
        if !position.point().is_valid() {
            self.apply_error(TrackError::SensorError {
                message: format!(
                    "invalid coordinates ({}, {})",
                    position.latitude, position.longitude
                ),
            });
            return;
        }
        self.track.apply_position(position);
    }

    /// Handle a sensor error: log it, keep the track, keep listening.
    pub fn apply_error(&mut self, error: TrackError) {
        self.sensor_errors += 1;
        warn!(
            "[Recorder] Sensor error while recording ({} so far): {}",
            self.sensor_errors, error
        );
    }

    /// Frozen copy of the current track for persistence.
    pub fn snapshot(&self) -> Result<RecordedTrack> {
        RecordedTrack::from_track(&self.track)
    }

    fn release(&self, handle: SubscriptionHandle) {
        if let Some(source) = &self.source {
            source.unsubscribe(handle);
        }
    }
}

impl Drop for LiveTrackRecorder {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.release(subscription.handle);
        }
    }
}
