use crate::geometry::BoundingBox;
use crate::track_store::TrackId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// COCO class ids treated as vehicles: bicycle, car, motorcycle, bus, train, truck
pub const VEHICLE_CLASS_IDS: [u32; 6] = [1, 2, 3, 5, 6, 7];

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Display name for a class id, falling back to the number itself
pub fn class_name(class_id: u32) -> String {
    COCO_CLASSES
        .get(class_id as usize)
        .map(|name| name.to_string())
        .unwrap_or_else(|| class_id.to_string())
}

/// One tracked detection as handed over by the detector + tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub track_id: TrackId,
    pub class_id: u32,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// All tracked detections of a single frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFrame {
    pub frame: u64,
    #[serde(default)]
    pub detections: Vec<DetectionRecord>,
}

/// Detector-side acceptance rules
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFilter {
    pub confidence_threshold: f32,
    pub iou_threshold: f64,
    pub allowed_classes: Vec<u32>,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.35,
            iou_threshold: 0.5,
            allowed_classes: VEHICLE_CLASS_IDS.to_vec(),
        }
    }
}

impl DetectionFilter {
    /// Keeps confident, allowed, tracker-confirmed records and suppresses
    /// same-class duplicates that overlap above the IoU threshold.
    ///
    /// Survivors keep their input order.
    pub fn apply(&self, records: &[DetectionRecord]) -> Vec<DetectionRecord> {
        let candidates: Vec<&DetectionRecord> = records
            .iter()
            .filter(|r| r.track_id >= 0)
            .filter(|r| r.confidence >= self.confidence_threshold)
            .filter(|r| self.allowed_classes.is_empty() || self.allowed_classes.contains(&r.class_id))
            .collect();

        let mut by_confidence: Vec<usize> = (0..candidates.len()).collect();
        by_confidence.sort_by(|&a, &b| {
            candidates[b]
                .confidence
                .partial_cmp(&candidates[a].confidence)
                .unwrap_or(Ordering::Equal)
        });

        let mut keep = vec![false; candidates.len()];
        for &i in &by_confidence {
            let suppressed = by_confidence
                .iter()
                .take_while(|&&j| j != i)
                .any(|&j| {
                    keep[j]
                        && candidates[j].class_id == candidates[i].class_id
                        && candidates[j].bbox.iou(&candidates[i].bbox) > self.iou_threshold
                });
            keep[i] = !suppressed;
        }

        candidates
            .into_iter()
            .zip(keep)
            .filter_map(|(record, kept)| kept.then(|| record.clone()))
            .collect()
    }
}
