use crate::config::PipelineConfig;
use crate::detection::{TrackedFrame, class_name};
use crate::lane::{LaneId, assign_with_fallback};
use crate::projector::Calibration;
use crate::report::{FrameReport, TrackReport};
use crate::speed::{SpeedEstimate, SpeedUnit};
use crate::stream_processor::{SkipPolicy, StreamProcessor, StreamSummary};
use crate::track_store::TrackStateStore;
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{debug, info, trace};

/// Turns tracked detections into per-vehicle lane and speed reports
pub struct LaneSpeedProcessor {
    config: PipelineConfig,
    store: TrackStateStore,
}

impl LaneSpeedProcessor {
    pub fn new(config: PipelineConfig) -> Self {
        let store = TrackStateStore::new(
            config.persist_window_seconds,
            config.fps,
            config.track_ttl_seconds,
        );
        Self { config, store }
    }

    pub fn store(&self) -> &TrackStateStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn timestamp(&self, frame: u64) -> f64 {
        frame as f64 / self.config.fps
    }
}

impl StreamProcessor for LaneSpeedProcessor {
    fn process_frame(&mut self, frame: &TrackedFrame) -> Result<FrameReport> {
        let t = self.timestamp(frame.frame);
        let records = self.config.filter.apply(&frame.detections);
        trace!(
            "frame {}: {} of {} detections accepted",
            frame.frame,
            records.len(),
            frame.detections.len()
        );

        let mut lane_counts: BTreeMap<LaneId, usize> =
            self.config.lanes.iter().map(|lane| (lane.id, 0)).collect();
        let mut tracks = Vec::with_capacity(records.len());

        for record in &records {
            let foot = record.bbox.foot_point();
            let lane = assign_with_fallback(
                foot,
                &self.config.lanes,
                self.config.frame_width,
                self.config.auto_lane_count,
            );
            *lane_counts.entry(lane).or_insert(0) += 1;

            let world = match &self.config.calibration {
                Calibration::Calibrated { homography, .. } => homography.apply(foot),
                Calibration::Uncalibrated => None,
            };
            self.store.observe(record.track_id, t, foot, lane, world);

            let Some(track) = self.store.get(record.track_id) else {
                continue;
            };
            let speed = match (&self.config.calibration, world) {
                (Calibration::Calibrated { .. }, Some(_)) => self
                    .config
                    .speed
                    .estimate(&track.world_history, SpeedUnit::MetersPerSecond),
                // No world sample this frame, so the world history is stale.
                (Calibration::Calibrated { .. }, None) => {
                    trace!("track {}: foot point projects to infinity", record.track_id);
                    SpeedEstimate::zero(SpeedUnit::MetersPerSecond)
                }
                (Calibration::Uncalibrated, _) => self
                    .config
                    .speed
                    .estimate(&track.image_history, SpeedUnit::PixelsPerSecond),
            };
            let smoothed = self.store.smoothed_lane(record.track_id).unwrap_or(lane);

            tracks.push(TrackReport::new(
                record.track_id,
                record.class_id,
                class_name(record.class_id),
                smoothed,
                speed,
            ));
        }

        let evicted = self.store.evict_stale(t);
        if !evicted.is_empty() {
            debug!("frame {}: evicted {} stale tracks", frame.frame, evicted.len());
        }

        Ok(FrameReport {
            frame: frame.frame,
            timestamp: t,
            tracks,
            lane_counts,
        })
    }

    fn skip_policy(&self) -> SkipPolicy {
        SkipPolicy {
            frame_timeout: self.config.frame_timeout,
            max_consecutive: self.config.max_skipped_frames,
        }
    }

    fn finalize_processing(&mut self, summary: &StreamSummary) {
        info!(
            "processed {} frames ({} skipped{}), {} tracks seen, {} evicted, {} still live",
            summary.frames_processed,
            summary.frames_skipped,
            if summary.stopped_early { ", stopped early" } else { "" },
            self.store.tracks_created(),
            self.store.tracks_evicted(),
            self.store.len(),
        );
    }
}
