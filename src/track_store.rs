use crate::geometry::Point2D;
use crate::history::{LaneVotes, Sample, TimedHistory, history_capacity};
use crate::lane::LaneId;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub type TrackId = i64;

/// Per-track trajectory and lane state
#[derive(Debug, Clone)]
pub struct TrackState {
    pub id: TrackId,
    pub image_history: TimedHistory,
    /// Only fed when the stream is calibrated
    pub world_history: TimedHistory,
    pub lane_votes: LaneVotes,
    pub first_seen: f64,
    pub last_seen: f64,
}

impl TrackState {
    fn new(id: TrackId, capacity: usize, window_seconds: f64, t: f64) -> Self {
        Self {
            id,
            image_history: TimedHistory::new(capacity, window_seconds),
            world_history: TimedHistory::new(capacity, window_seconds),
            lane_votes: LaneVotes::new(),
            first_seen: t,
            last_seen: t,
        }
    }
}

/// Owns every track of one stream, keyed by tracker id
#[derive(Debug)]
pub struct TrackStateStore {
    tracks: BTreeMap<TrackId, TrackState>,
    capacity: usize,
    window_seconds: f64,
    ttl_seconds: f64,
    tracks_created: usize,
    tracks_evicted: usize,
}

impl TrackStateStore {
    /// `window_seconds` of history at `fps`, dropping tracks unseen for `ttl_seconds`
    pub fn new(window_seconds: f64, fps: f64, ttl_seconds: f64) -> Self {
        Self {
            tracks: BTreeMap::new(),
            capacity: history_capacity(window_seconds, fps),
            window_seconds,
            ttl_seconds,
            tracks_created: 0,
            tracks_evicted: 0,
        }
    }

    /// Records one observation of a track, creating the track on first sight.
    ///
    /// Observations older than the track's newest sample are dropped whole,
    /// so the image and world histories never disagree on ordering.
    pub fn observe(
        &mut self,
        track_id: TrackId,
        t: f64,
        image_point: Point2D,
        lane: LaneId,
        world_point: Option<Point2D>,
    ) {
        let (capacity, window) = (self.capacity, self.window_seconds);
        let mut created = false;
        let track = self.tracks.entry(track_id).or_insert_with(|| {
            created = true;
            TrackState::new(track_id, capacity, window, t)
        });
        if created {
            self.tracks_created += 1;
            debug!("new track {} at t={:.3}", track_id, t);
        }

        if track.image_history.newest().is_some_and(|last| t < last.t) {
            warn!(
                "track {}: dropping out-of-order observation at t={:.3} (newest t={:.3})",
                track_id, t, track.last_seen
            );
            return;
        }

        track.image_history.push(Sample::new(t, image_point));
        track.lane_votes.push(lane);
        if let Some(world) = world_point {
            track.world_history.push(Sample::new(t, world));
        }
        track.last_seen = t;
    }

    /// Majority lane over the track's recent votes
    pub fn smoothed_lane(&self, track_id: TrackId) -> Option<LaneId> {
        self.tracks.get(&track_id).and_then(|t| t.lane_votes.majority())
    }

    /// Removes tracks whose last observation is more than the TTL before `now`
    pub fn evict_stale(&mut self, now: f64) -> Vec<TrackId> {
        let ttl = self.ttl_seconds;
        let stale: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|track| now - track.last_seen > ttl)
            .map(|track| track.id)
            .collect();
        for id in &stale {
            self.tracks.remove(id);
            debug!("evicted track {} at t={:.3}", id, now);
        }
        self.tracks_evicted += stale.len();
        stale
    }

    pub fn get(&self, track_id: TrackId) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    /// Track ids in ascending order
    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tracks_created(&self) -> usize {
        self.tracks_created
    }

    pub fn tracks_evicted(&self) -> usize {
        self.tracks_evicted
    }
}
