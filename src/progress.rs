use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

/// Progress tracker for a stream run
pub struct StreamProgressTracker {
    progress_bar: ProgressBar,
    start_time: Instant,
    total_frames: Option<u64>,
    frame_rate: f64,
    processed_frames: u64,
}

impl StreamProgressTracker {
    /// Creates a progress bar for a source with a known frame count
    pub fn new(total_frames: u64, frame_rate: f64, operation_name: &str) -> Self {
        let progress_bar = ProgressBar::new(total_frames);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress_bar.set_style(style);
        progress_bar.set_message(format!("Processing {}", operation_name));

        Self::from_bar(progress_bar, Some(total_frames), frame_rate)
    }

    /// Creates a spinner for a live source
    pub fn new_unknown_total(frame_rate: f64, operation_name: &str) -> Self {
        let progress_bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} frames | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        progress_bar.set_style(style);
        progress_bar.set_message(format!("Processing {}", operation_name));

        Self::from_bar(progress_bar, None, frame_rate)
    }

    /// Tracks counts without drawing anything
    pub fn hidden(frame_rate: f64) -> Self {
        Self::from_bar(ProgressBar::hidden(), None, frame_rate)
    }

    fn from_bar(progress_bar: ProgressBar, total_frames: Option<u64>, frame_rate: f64) -> Self {
        Self {
            progress_bar,
            start_time: Instant::now(),
            total_frames,
            frame_rate,
            processed_frames: 0,
        }
    }

    pub fn update_frame(&mut self) {
        self.processed_frames += 1;
        self.progress_bar.inc(1);
        let msg = self.get_progress_message();
        self.progress_bar.set_message(msg);
    }

    /// Stream time of the current frame (h:mm:ss)
    fn get_current_time(&self) -> String {
        format_duration(self.processed_frames as f64 / self.frame_rate)
    }

    fn get_progress_message(&self) -> String {
        if self.processed_frames == 0 {
            return "Starting...".to_string();
        }

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let current_fps = if elapsed > 0.0 {
            self.processed_frames as f64 / elapsed
        } else {
            0.0
        };
        let current_time = self.get_current_time();

        match self.total_frames {
            Some(total_frames) => {
                let remaining_frames = total_frames.saturating_sub(self.processed_frames);
                let eta = if current_fps > 0.0 {
                    format_duration(remaining_frames as f64 / current_fps)
                } else {
                    "Calculating...".to_string()
                };
                format!(
                    "{} / {} | Speed: {:.1} fps | ETA: {}",
                    current_time,
                    format_duration(total_frames as f64 / self.frame_rate),
                    current_fps,
                    eta
                )
            }
            None => format!("{} | Speed: {:.1} fps", current_time, current_fps),
        }
    }

    pub fn finish(&self) {
        let total_time = self.start_time.elapsed().as_secs_f64();
        let avg_fps = if total_time > 0.0 {
            self.processed_frames as f64 / total_time
        } else {
            0.0
        };
        self.progress_bar.finish_with_message(format!(
            "Completed! Stream: {} | Processing: {} | Avg FPS: {:.1}",
            self.get_current_time(),
            format_duration(total_time),
            avg_fps
        ));
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn processed_frames(&self) -> u64 {
        self.processed_frames
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }
}

/// Formats a duration in seconds as h:mm:ss, or m:ss under an hour
fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}
