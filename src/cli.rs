use argh::FromArgs;

/// Vehicle lane and speed estimation over tracked detections
#[derive(FromArgs, Debug)]
pub struct Args {
    /// tracked detections, one JSON frame per line
    #[argh(option)]
    pub source: String,

    /// lane polygons JSON; frame is auto-split when absent
    #[argh(option)]
    pub lanes: Option<String>,

    /// number of vertical lanes when no lane polygons are given
    #[argh(option, default = "3")]
    pub auto_lanes: usize,

    /// calibration JSON with image/world point correspondences
    #[argh(option)]
    pub calib: Option<String>,

    /// detection confidence threshold
    #[argh(option, default = "0.35")]
    pub conf: f32,

    /// iou above which same-class detections are merged
    #[argh(option, default = "0.5")]
    pub iou: f64,

    /// allowed class id (repeatable); defaults to COCO vehicle classes
    #[argh(option)]
    pub classes: Vec<u32>,

    /// source frame rate, used when calibration does not set one
    #[argh(option, default = "30.0")]
    pub fps: f64,

    /// source frame width in pixels
    #[argh(option, default = "1920.0")]
    pub frame_width: f64,

    /// source frame height in pixels
    #[argh(option, default = "1080.0")]
    pub frame_height: f64,

    /// seconds of trajectory history kept per track
    #[argh(option, default = "1.5")]
    pub persist_window_s: f64,

    /// seconds of history a speed measurement spans at most
    #[argh(option, default = "1.0")]
    pub speed_window_s: f64,

    /// shortest span in seconds that yields a non-zero speed
    #[argh(option, default = "0.2")]
    pub min_elapsed_s: f64,

    /// seconds after its last observation before a track is dropped
    #[argh(option, default = "3.0")]
    pub track_ttl_s: f64,

    /// frame acquisition deadline in milliseconds, 0 disables it
    #[argh(option, default = "5000")]
    pub frame_timeout_ms: u64,

    /// consecutive skipped frames before the run aborts
    #[argh(option, default = "30")]
    pub max_skipped_frames: usize,

    /// output path for frame reports (JSON lines)
    #[argh(option)]
    pub out: Option<String>,

    /// disable the progress bar
    #[argh(switch)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_repeated_classes() {
        let args = Args::from_args(
            &["lanespeed"],
            &["--source", "d.jsonl", "--classes", "2", "--classes", "7", "--iou", "0.4"],
        )
        .unwrap();
        assert_eq!(args.source, "d.jsonl");
        assert_eq!(args.classes, vec![2, 7]);
        assert_eq!(args.iou, 0.4);
        assert_eq!(args.auto_lanes, 3);
        assert_eq!(args.conf, 0.35);
        assert_eq!(args.fps, 30.0);
        assert_eq!(args.persist_window_s, 1.5);
        assert_eq!(args.frame_timeout_ms, 5000);
        assert_eq!(args.max_skipped_frames, 30);
        assert!(args.lanes.is_none());
        assert!(!args.quiet);
    }

    #[test]
    fn test_source_is_required() {
        assert!(Args::from_args(&["lanespeed"], &[]).is_err());
    }
}
