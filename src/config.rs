use crate::cli::Args;
use crate::detection::{DetectionFilter, VEHICLE_CLASS_IDS};
use crate::geometry::Point2D;
use crate::history::{MAX_HISTORY_CAPACITY, history_capacity};
use crate::lane::{Lane, LaneId, auto_split};
use crate::projector::{Calibration, ProjectorError};
use crate::speed::SpeedEstimator;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Shortest persistence window accepted
pub const MIN_PERSIST_WINDOW_S: f64 = 0.5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("calibration {path}: {source}")]
    Calibration {
        path: PathBuf,
        #[source]
        source: ProjectorError,
    },
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// On-disk calibration record
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationFile {
    #[serde(default)]
    pub fps: Option<f64>,
    pub image_points: Vec<[f64; 2]>,
    pub world_points_m: Vec<[f64; 2]>,
}

/// On-disk lane record
#[derive(Debug, Clone, Deserialize)]
pub struct LaneEntry {
    pub id: LaneId,
    #[serde(default)]
    pub name: Option<String>,
    pub polygon: Vec<[f64; 2]>,
}

impl CalibrationFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Frame rate stored in the file, if it is a usable one
    pub fn frame_rate(&self) -> Option<f64> {
        self.fps.filter(|fps| fps.is_finite() && *fps > 0.0)
    }

    /// Fits the homography. Too few pairs is an error; a degenerate fit
    /// degrades to `Uncalibrated` with a warning.
    pub fn into_calibration(self, fps: f64) -> Result<Calibration, ProjectorError> {
        let image: Vec<Point2D> = self.image_points.into_iter().map(Point2D::from).collect();
        let world: Vec<Point2D> = self.world_points_m.into_iter().map(Point2D::from).collect();
        match Calibration::from_correspondences(&image, &world, fps) {
            Ok(calibration) => Ok(calibration),
            Err(ProjectorError::Degenerate(reason)) => {
                warn!("calibration is degenerate ({}), speeds fall back to px/s", reason);
                Ok(Calibration::Uncalibrated)
            }
            Err(err) => Err(err),
        }
    }
}

/// Loads the calibration and resolves the effective frame rate.
///
/// No path, or a path that is not a file, means `Uncalibrated`.
pub fn load_calibration(
    path: Option<&Path>,
    source_fps: f64,
) -> Result<(Calibration, f64), ConfigError> {
    let Some(path) = path else {
        return Ok((Calibration::Uncalibrated, source_fps));
    };
    if !path.is_file() {
        warn!("calibration file {} not found, running uncalibrated", path.display());
        return Ok((Calibration::Uncalibrated, source_fps));
    }

    let file = CalibrationFile::load(path)?;
    let fps = file.frame_rate().unwrap_or(source_fps);
    let calibration = file
        .into_calibration(fps)
        .map_err(|source| ConfigError::Calibration {
            path: path.to_path_buf(),
            source,
        })?;
    Ok((calibration, fps))
}

/// Parses lane polygons out of JSON text, dropping entries with fewer than three points
pub fn parse_lanes(contents: &str) -> Result<Vec<Lane>, serde_json::Error> {
    let entries: Vec<LaneEntry> = serde_json::from_str(contents)?;
    let lanes = entries
        .into_iter()
        .filter_map(|entry| {
            if entry.polygon.len() < 3 {
                warn!(
                    "lane {} has {} polygon points, need at least 3; ignoring it",
                    entry.id,
                    entry.polygon.len()
                );
                return None;
            }
            let name = entry.name.unwrap_or_else(|| format!("Lane {}", entry.id));
            let polygon = entry.polygon.into_iter().map(Point2D::from).collect();
            Some(Lane::new(entry.id, name, polygon))
        })
        .collect();
    Ok(lanes)
}

/// Loads lane polygons, auto-splitting the frame whenever that fails
pub fn load_lanes(
    path: Option<&Path>,
    frame_width: f64,
    frame_height: f64,
    auto_lane_count: usize,
) -> Vec<Lane> {
    let loaded = path.and_then(|path| match fs::read_to_string(path) {
        Ok(contents) => match parse_lanes(&contents) {
            Ok(lanes) if !lanes.is_empty() => Some(lanes),
            Ok(_) => {
                warn!("no usable lanes in {}", path.display());
                None
            }
            Err(err) => {
                warn!("failed to parse lanes {}: {}", path.display(), err);
                None
            }
        },
        Err(err) => {
            warn!("failed to read lanes {}: {}", path.display(), err);
            None
        }
    });

    loaded.unwrap_or_else(|| {
        info!("using {} auto-split lanes", auto_lane_count.max(1));
        auto_split(frame_width, frame_height, auto_lane_count)
    })
}

/// Resolved settings for one stream run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub frame_width: f64,
    pub frame_height: f64,
    /// Effective frame rate: calibration's if it has one, else the source's
    pub fps: f64,
    pub calibration: Calibration,
    pub lanes: Vec<Lane>,
    pub auto_lane_count: usize,
    pub filter: DetectionFilter,
    pub persist_window_seconds: f64,
    pub speed: SpeedEstimator,
    pub track_ttl_seconds: f64,
    pub frame_timeout: Option<Duration>,
    pub max_skipped_frames: usize,
}

impl PipelineConfig {
    /// Uncalibrated defaults around auto-split lanes for a frame size
    pub fn new(frame_width: f64, frame_height: f64, fps: f64) -> Self {
        let auto_lane_count = 3;
        Self {
            frame_width,
            frame_height,
            fps,
            calibration: Calibration::Uncalibrated,
            lanes: auto_split(frame_width, frame_height, auto_lane_count),
            auto_lane_count,
            filter: DetectionFilter::default(),
            persist_window_seconds: 1.5,
            speed: SpeedEstimator::default(),
            track_ttl_seconds: 3.0,
            frame_timeout: Some(Duration::from_millis(5000)),
            max_skipped_frames: 30,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    name,
                    reason: format!("must be a positive number, got {value}"),
                })
            }
        };
        positive("fps", self.fps)?;
        positive("frame_width", self.frame_width)?;
        positive("frame_height", self.frame_height)?;
        positive("speed_window_s", self.speed.window_seconds)?;
        positive("track_ttl_s", self.track_ttl_seconds)?;
        positive("persist_window_s", self.persist_window_seconds)?;
        let capacity = history_capacity(self.persist_window_seconds, self.fps);
        if capacity > MAX_HISTORY_CAPACITY {
            return Err(ConfigError::Invalid {
                name: "persist_window_s",
                reason: format!(
                    "{:.2}s at {:.2} fps needs {} history slots per track, limit is {}",
                    self.persist_window_seconds, self.fps, capacity, MAX_HISTORY_CAPACITY
                ),
            });
        }
        if self.speed.min_elapsed_seconds < 0.0 {
            return Err(ConfigError::Invalid {
                name: "min_elapsed_s",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Builds the stream configuration from command line arguments
pub fn build_pipeline_config(args: &Args) -> Result<PipelineConfig, ConfigError> {
    let (calibration, fps) = load_calibration(args.calib.as_deref().map(Path::new), args.fps)?;
    let auto_lane_count = args.auto_lanes.max(1);
    let lanes = load_lanes(
        args.lanes.as_deref().map(Path::new),
        args.frame_width,
        args.frame_height,
        auto_lane_count,
    );

    let config = PipelineConfig {
        frame_width: args.frame_width,
        frame_height: args.frame_height,
        fps,
        calibration,
        lanes,
        auto_lane_count,
        filter: DetectionFilter {
            confidence_threshold: args.conf,
            iou_threshold: args.iou,
            allowed_classes: if args.classes.is_empty() {
                VEHICLE_CLASS_IDS.to_vec()
            } else {
                args.classes.clone()
            },
        },
        persist_window_seconds: args.persist_window_s.max(MIN_PERSIST_WINDOW_S),
        speed: SpeedEstimator::new(args.speed_window_s, args.min_elapsed_s),
        track_ttl_seconds: args.track_ttl_s,
        frame_timeout: (args.frame_timeout_ms > 0).then(|| Duration::from_millis(args.frame_timeout_ms)),
        max_skipped_frames: args.max_skipped_frames,
    };
    config.validate()?;

    info!(
        "config: {}x{} @ {:.2} fps, {} lanes, {}, persist {:.2}s, speed window {:.2}s",
        config.frame_width,
        config.frame_height,
        config.fps,
        config.lanes.len(),
        if config.calibration.is_calibrated() {
            "calibrated (km/h)"
        } else {
            "uncalibrated (px/s)"
        },
        config.persist_window_seconds,
        config.speed.window_seconds,
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const CALIB: &str = r#"{
        "fps": 25.0,
        "image_points": [[0, 0], [100, 0], [100, 100], [0, 100]],
        "world_points_m": [[0, 0], [10, 0], [10, 10], [0, 10]]
    }"#;

    #[test]
    fn test_load_calibration_uses_file_fps() {
        let file = write_temp(CALIB);
        let (calibration, fps) = load_calibration(Some(file.path()), 30.0).unwrap();
        assert!(calibration.is_calibrated());
        assert_eq!(fps, 25.0);
        assert_eq!(calibration.fps(), Some(25.0));
    }

    #[test]
    fn test_load_calibration_without_fps_uses_source_rate() {
        let file = write_temp(
            r#"{"fps": 0, "image_points": [[0,0],[100,0],[100,100],[0,100]],
                "world_points_m": [[0,0],[10,0],[10,10],[0,10]]}"#,
        );
        let (calibration, fps) = load_calibration(Some(file.path()), 30.0).unwrap();
        assert_eq!(fps, 30.0);
        assert_eq!(calibration.fps(), Some(30.0));
    }

    #[test]
    fn test_missing_calibration_is_uncalibrated() {
        let (calibration, fps) = load_calibration(None, 30.0).unwrap();
        assert_eq!(calibration, Calibration::Uncalibrated);
        assert_eq!(fps, 30.0);

        let (calibration, _) =
            load_calibration(Some(Path::new("/nonexistent/calibration.json")), 30.0).unwrap();
        assert_eq!(calibration, Calibration::Uncalibrated);
    }

    #[test]
    fn test_too_few_correspondences_is_fatal() {
        let file = write_temp(
            r#"{"image_points": [[0,0],[1,0],[1,1]], "world_points_m": [[0,0],[1,0],[1,1]]}"#,
        );
        let err = load_calibration(Some(file.path()), 30.0).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Calibration {
                source: ProjectorError::InsufficientCorrespondences { image: 3, world: 3 },
                ..
            }
        ));
    }

    #[test]
    fn test_degenerate_calibration_degrades() {
        let file = write_temp(
            r#"{"image_points": [[5,5],[5,5],[5,5],[5,5]], "world_points_m": [[0,0],[1,0],[1,1],[0,1]]}"#,
        );
        let (calibration, _) = load_calibration(Some(file.path()), 30.0).unwrap();
        assert_eq!(calibration, Calibration::Uncalibrated);
    }

    #[test]
    fn test_parse_lanes_defaults_name_and_drops_short_polygons() {
        let lanes = parse_lanes(
            r#"[
                {"id": 1, "name": "Fast", "polygon": [[0,0],[10,0],[10,10],[0,10]]},
                {"id": 2, "polygon": [[10,0],[20,0],[20,10]]},
                {"id": 3, "polygon": [[0,0],[1,1]]}
            ]"#,
        )
        .unwrap();
        assert_eq!(lanes.len(), 2);
        assert_eq!(lanes[0].name, "Fast");
        assert_eq!(lanes[1].name, "Lane 2");
    }

    #[test]
    fn test_load_lanes_falls_back_to_auto_split() {
        let lanes = load_lanes(None, 900.0, 600.0, 3);
        assert_eq!(lanes.len(), 3);

        let broken = write_temp("{ not json");
        assert_eq!(load_lanes(Some(broken.path()), 900.0, 600.0, 4).len(), 4);

        let empty = write_temp("[]");
        assert_eq!(load_lanes(Some(empty.path()), 900.0, 600.0, 2).len(), 2);

        let missing = load_lanes(Some(Path::new("/nonexistent/lanes.json")), 900.0, 600.0, 0);
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn test_load_lanes_keeps_configured_order() {
        let file = write_temp(
            r#"[{"id": 9, "polygon": [[0,0],[10,0],[10,10]]}, {"id": 4, "polygon": [[0,0],[10,0],[10,10]]}]"#,
        );
        let lanes = load_lanes(Some(file.path()), 900.0, 600.0, 3);
        assert_eq!(lanes.iter().map(|l| l.id).collect::<Vec<_>>(), vec![9, 4]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::new(1920.0, 1080.0, 30.0);
        assert!(config.validate().is_ok());
        config.fps = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { name: "fps", .. })));
    }

    #[test]
    fn test_validate_rejects_oversized_history() {
        let mut config = PipelineConfig::new(1920.0, 1080.0, 1e300);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "persist_window_s", .. })
        ));

        config.fps = 30.0;
        config.persist_window_seconds = 1e9;
        assert!(config.validate().is_err());

        config.persist_window_seconds = 60.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_build_pipeline_config_from_args() {
        let calib = write_temp(CALIB);
        let args = Args {
            source: "detections.jsonl".to_string(),
            lanes: None,
            auto_lanes: 0,
            calib: Some(calib.path().to_string_lossy().to_string()),
            conf: 0.4,
            iou: 0.6,
            classes: Vec::new(),
            fps: 30.0,
            frame_width: 900.0,
            frame_height: 600.0,
            persist_window_s: 0.1,
            speed_window_s: 1.0,
            min_elapsed_s: 0.2,
            track_ttl_s: 3.0,
            frame_timeout_ms: 0,
            max_skipped_frames: 10,
            out: None,
            quiet: true,
        };
        let config = build_pipeline_config(&args).unwrap();
        assert_eq!(config.fps, 25.0);
        assert_eq!(config.auto_lane_count, 1);
        assert_eq!(config.lanes.len(), 1);
        assert_eq!(config.persist_window_seconds, MIN_PERSIST_WINDOW_S);
        assert_eq!(config.filter.allowed_classes, VEHICLE_CLASS_IDS.to_vec());
        assert_eq!(config.frame_timeout, None);
        assert!(config.calibration.is_calibrated());
    }
}
