use crate::detection::TrackedFrame;
use crate::progress::StreamProgressTracker;
use crate::report::{FrameReport, ReportSink};
use crate::source::{FrameReader, FrameSource};
use anyhow::{Context, Result, bail};
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const PAUSE_POLL: Duration = Duration::from_millis(50);

/// Cooperative stop and pause flags, checked once per frame boundary
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes Ctrl-C to a stop request
    pub fn install_ctrlc_handler(&self) -> Result<()> {
        let stop = Arc::clone(&self.stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Applies one operator command: `p` toggles pause, `q` stops.
    /// Returns `false` for anything else.
    pub fn apply_command(&self, command: &str) -> bool {
        match command.trim() {
            "p" => {
                let paused = !self.is_paused();
                self.set_paused(paused);
                info!("{}", if paused { "paused" } else { "resumed" });
                true
            }
            "q" => {
                info!("stop requested");
                self.request_stop();
                true
            }
            _ => false,
        }
    }

    /// Reads operator commands, one per line, until the input closes or a
    /// stop is requested
    pub fn listen_for_commands<R>(&self, input: R) -> std::io::Result<JoinHandle<()>>
    where
        R: BufRead + Send + 'static,
    {
        let control = self.clone();
        thread::Builder::new()
            .name("run-commands".to_string())
            .spawn(move || {
                for line in input.lines() {
                    let Ok(line) = line else { break };
                    if !control.apply_command(&line) && !line.trim().is_empty() {
                        warn!("unknown command {:?}, use p to pause/resume or q to stop", line.trim());
                    }
                    if control.is_stopped() {
                        break;
                    }
                }
            })
    }

    /// Blocks while paused. Returns `false` once a stop has been requested.
    pub fn wait_while_paused(&self) -> bool {
        loop {
            if self.is_stopped() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }
            thread::sleep(PAUSE_POLL);
        }
    }
}

/// What to do with frames that cannot be processed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkipPolicy {
    /// Frames whose acquisition takes longer than this are dropped
    pub frame_timeout: Option<Duration>,
    /// Consecutive skipped frames tolerated before the run aborts
    pub max_consecutive: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub stopped_early: bool,
}

/// Frame-sequential driver shared by stream processors
pub trait StreamProcessor {
    /// Turns one frame of tracked detections into a report
    fn process_frame(&mut self, frame: &TrackedFrame) -> Result<FrameReport>;

    fn skip_policy(&self) -> SkipPolicy;

    /// Called once after the last frame
    fn finalize_processing(&mut self, _summary: &StreamSummary) {}

    /// Pulls frames until the source ends or a stop is requested.
    ///
    /// The source runs on a reader thread, so the frame timeout bounds each
    /// wait. A wait that times out, or a frame that cannot be decoded,
    /// counts as a skipped frame; a frame that turns up after its wait
    /// expired is still processed. A frame's state updates are applied
    /// whole or not at all.
    fn process_stream<S>(
        &mut self,
        source: S,
        sink: &mut dyn ReportSink,
        control: &RunControl,
        mut progress: Option<&mut StreamProgressTracker>,
    ) -> Result<StreamSummary>
    where
        S: FrameSource + Send + 'static,
        Self: Sized,
    {
        let policy = self.skip_policy();
        let reader = FrameReader::spawn(source).context("failed to start frame reader")?;
        let mut summary = StreamSummary::default();
        let mut consecutive_skips = 0usize;

        loop {
            if !control.wait_while_paused() {
                debug!("stop requested, leaving stream loop");
                summary.stopped_early = true;
                break;
            }

            match reader.next(policy.frame_timeout) {
                Ok(None) => break,
                Ok(Some(frame)) => {
                    let report = self.process_frame(&frame)?;
                    sink.write_report(&report)?;
                    summary.frames_processed += 1;
                    consecutive_skips = 0;
                    if let Some(tracker) = progress.as_deref_mut() {
                        tracker.update_frame();
                    }
                }
                Err(err) if err.is_frame_local() => {
                    warn!("skipping frame: {}", err);
                    summary.frames_skipped += 1;
                    consecutive_skips += 1;
                    if consecutive_skips > policy.max_consecutive {
                        bail!(
                            "giving up after {} consecutive skipped frames",
                            consecutive_skips
                        );
                    }
                }
                Err(err) => return Err(err).context("frame source failed"),
            }
        }

        sink.flush()?;
        self.finalize_processing(&summary);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, SourceError};
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::time::Instant;

    /// Echoes frame indices, stopping the run after `stop_after` frames
    struct EchoProcessor {
        control: RunControl,
        stop_after: Option<u64>,
        seen: Vec<u64>,
        policy: SkipPolicy,
    }

    impl EchoProcessor {
        fn new(control: RunControl) -> Self {
            Self {
                control,
                stop_after: None,
                seen: Vec::new(),
                policy: SkipPolicy {
                    frame_timeout: None,
                    max_consecutive: 2,
                },
            }
        }
    }

    impl StreamProcessor for EchoProcessor {
        fn process_frame(&mut self, frame: &TrackedFrame) -> Result<FrameReport> {
            self.seen.push(frame.frame);
            if self.stop_after == Some(self.seen.len() as u64) {
                self.control.request_stop();
            }
            Ok(FrameReport {
                frame: frame.frame,
                timestamp: 0.0,
                tracks: Vec::new(),
                lane_counts: BTreeMap::new(),
            })
        }

        fn skip_policy(&self) -> SkipPolicy {
            self.policy
        }
    }

    fn frames(n: u64) -> Vec<TrackedFrame> {
        (0..n)
            .map(|frame| TrackedFrame {
                frame,
                detections: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_processes_every_frame_in_order() {
        let control = RunControl::new();
        let mut processor = EchoProcessor::new(control.clone());
        let source = MemorySource::new(frames(5));
        let mut sink: Vec<FrameReport> = Vec::new();

        let summary = processor
            .process_stream(source, &mut sink, &control, None)
            .unwrap();
        assert_eq!(summary.frames_processed, 5);
        assert!(!summary.stopped_early);
        assert_eq!(processor.seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(sink.len(), 5);
    }

    #[test]
    fn test_stop_is_honored_at_frame_boundary() {
        let control = RunControl::new();
        let mut processor = EchoProcessor::new(control.clone());
        processor.stop_after = Some(2);
        let source = MemorySource::new(frames(5));
        let mut sink: Vec<FrameReport> = Vec::new();

        let summary = processor
            .process_stream(source, &mut sink, &control, None)
            .unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.frames_processed, 2);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let control = RunControl::new();
        let mut processor = EchoProcessor::new(control.clone());
        let mut source = MemorySource::new(frames(1));
        source.push_malformed("{ broken");
        source.push(TrackedFrame {
            frame: 7,
            detections: Vec::new(),
        });
        let mut sink: Vec<FrameReport> = Vec::new();

        let summary = processor
            .process_stream(source, &mut sink, &control, None)
            .unwrap();
        assert_eq!(summary.frames_processed, 2);
        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(processor.seen, vec![0, 7]);
    }

    #[test]
    fn test_aborts_after_too_many_consecutive_skips() {
        let control = RunControl::new();
        let mut processor = EchoProcessor::new(control.clone());
        let mut source = MemorySource::default();
        for _ in 0..3 {
            source.push_malformed("nope");
        }
        let mut sink: Vec<FrameReport> = Vec::new();
        assert!(
            processor
                .process_stream(source, &mut sink, &control, None)
                .is_err()
        );
    }

    /// Yields one frame after a delay, then ends
    struct SlowSource {
        delay: Duration,
        sent: bool,
    }

    impl FrameSource for SlowSource {
        fn next_frame(&mut self) -> std::result::Result<Option<TrackedFrame>, SourceError> {
            if self.sent {
                return Ok(None);
            }
            thread::sleep(self.delay);
            self.sent = true;
            Ok(Some(TrackedFrame {
                frame: 0,
                detections: Vec::new(),
            }))
        }
    }

    #[test]
    fn test_slow_frame_counts_timeouts_then_is_processed() {
        let control = RunControl::new();
        let mut processor = EchoProcessor::new(control.clone());
        processor.policy = SkipPolicy {
            frame_timeout: Some(Duration::from_millis(10)),
            max_consecutive: 100,
        };
        let source = SlowSource {
            delay: Duration::from_millis(60),
            sent: false,
        };
        let mut sink: Vec<FrameReport> = Vec::new();

        let summary = processor
            .process_stream(source, &mut sink, &control, None)
            .unwrap();
        assert_eq!(summary.frames_processed, 1);
        assert!(summary.frames_skipped >= 1);
    }

    struct StuckSource;

    impl FrameSource for StuckSource {
        fn next_frame(&mut self) -> std::result::Result<Option<TrackedFrame>, SourceError> {
            loop {
                thread::park();
            }
        }
    }

    #[test]
    fn test_stuck_source_aborts_after_skip_budget() {
        let control = RunControl::new();
        let mut processor = EchoProcessor::new(control.clone());
        processor.policy = SkipPolicy {
            frame_timeout: Some(Duration::from_millis(10)),
            max_consecutive: 3,
        };
        let mut sink: Vec<FrameReport> = Vec::new();

        let started = Instant::now();
        let result = processor.process_stream(StuckSource, &mut sink, &control, None);
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_progress_counts_only_processed_frames() {
        let control = RunControl::new();
        let mut processor = EchoProcessor::new(control.clone());
        let mut source = MemorySource::new(frames(2));
        source.push_malformed("{ broken");
        let mut sink: Vec<FrameReport> = Vec::new();
        let mut progress = StreamProgressTracker::hidden(30.0);

        let summary = processor
            .process_stream(source, &mut sink, &control, Some(&mut progress))
            .unwrap();
        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(progress.processed_frames(), 2);
    }

    #[test]
    fn test_commands_toggle_pause_and_stop() {
        let control = RunControl::new();
        assert!(control.apply_command("p\n"));
        assert!(control.is_paused());
        assert!(control.apply_command(" p "));
        assert!(!control.is_paused());
        assert!(!control.apply_command("x"));
        assert!(!control.is_stopped());

        let handle = control
            .listen_for_commands(Cursor::new("p\nhello\nq\np\n"))
            .unwrap();
        handle.join().unwrap();
        assert!(control.is_stopped());
        // Reading ends at the stop, so the trailing toggle is never applied.
        assert!(control.is_paused());
    }

    #[test]
    fn test_pause_blocks_until_resumed() {
        let control = RunControl::new();
        control.set_paused(true);
        let resumer = control.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(120));
            resumer.set_paused(false);
        });
        let started = Instant::now();
        assert!(control.wait_while_paused());
        assert!(started.elapsed() >= Duration::from_millis(100));
        handle.join().unwrap();

        control.request_stop();
        assert!(!control.wait_while_paused());
    }
}
