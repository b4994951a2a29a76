use crate::lane::LaneId;
use crate::speed::SpeedEstimate;
use crate::track_store::TrackId;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Per-vehicle result for one frame, ready for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackReport {
    pub track_id: TrackId,
    pub class_id: u32,
    pub class_name: String,
    /// Majority lane over recent frames
    pub lane_id: LaneId,
    /// Raw speed and its unit
    pub speed: SpeedEstimate,
    /// Speed converted for display (km/h or px/s)
    pub display_speed: f64,
    pub display_unit: &'static str,
    pub label: String,
}

impl TrackReport {
    pub fn new(
        track_id: TrackId,
        class_id: u32,
        class_name: String,
        lane_id: LaneId,
        speed: SpeedEstimate,
    ) -> Self {
        let (display_speed, display_unit) = speed.display_value();
        let label = format!("{class_name} | Lane {lane_id} | {speed}");
        Self {
            track_id,
            class_id,
            class_name,
            lane_id,
            speed,
            display_speed,
            display_unit,
            label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub timestamp: f64,
    pub tracks: Vec<TrackReport>,
    /// Vehicles per lane this frame, by raw per-frame lane
    pub lane_counts: BTreeMap<LaneId, usize>,
}

/// Downstream consumer of frame reports
pub trait ReportSink {
    fn write_report(&mut self, report: &FrameReport) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ReportSink for Vec<FrameReport> {
    fn write_report(&mut self, report: &FrameReport) -> Result<()> {
        self.push(report.clone());
        Ok(())
    }
}

/// Writes one JSON object per frame
pub struct JsonLinesWriter<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesWriter<BufWriter<File>> {
    /// Creates the file and any missing parent directories
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create output directory {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ReportSink for JsonLinesWriter<W> {
    fn write_report(&mut self, report: &FrameReport) -> Result<()> {
        serde_json::to_writer(&mut self.writer, report).context("failed to serialize frame report")?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush frame reports")
    }
}
