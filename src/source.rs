use crate::detection::TrackedFrame;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Frames the reader thread may hold before the consumer catches up
pub const READ_AHEAD_FRAMES: usize = 8;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Fatal: the stream could not be opened at all
    #[error("failed to open source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("read error at line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: std::io::Error,
    },
    /// One frame could not be decoded; the stream itself is still usable
    #[error("malformed frame at line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl SourceError {
    /// Whether the next call to `next_frame` can still succeed
    pub fn is_frame_local(&self) -> bool {
        matches!(self, SourceError::Malformed { .. })
    }
}

/// The detector + tracker collaborator, seen as a stream of tracked frames.
///
/// `next_frame` may block. `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, SourceError>;

    /// Total frame count when known up front
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

/// Why waiting on a [`FrameReader`] produced no frame
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("no frame within {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("frame reader thread exited unexpectedly")]
    ReaderGone,
}

impl ReadError {
    /// Whether waiting again can still produce frames
    pub fn is_frame_local(&self) -> bool {
        match self {
            ReadError::TimedOut(_) => true,
            ReadError::Source(err) => err.is_frame_local(),
            ReadError::ReaderGone => false,
        }
    }
}

type FrameResult = Result<Option<TrackedFrame>, SourceError>;

/// Runs a blocking source on its own thread so each wait for a frame can
/// be bounded. A source that never returns leaves the thread parked in
/// `next_frame`; it is detached and ends with the process.
pub struct FrameReader {
    frames: Receiver<FrameResult>,
}

impl FrameReader {
    pub fn spawn<S>(mut source: S) -> std::io::Result<Self>
    where
        S: FrameSource + Send + 'static,
    {
        let (tx, frames) = mpsc::sync_channel(READ_AHEAD_FRAMES);
        thread::Builder::new()
            .name("frame-reader".to_string())
            .spawn(move || {
                loop {
                    let item = source.next_frame();
                    let last = match &item {
                        Ok(None) => true,
                        Ok(Some(_)) => false,
                        Err(err) => !err.is_frame_local(),
                    };
                    if tx.send(item).is_err() || last {
                        break;
                    }
                }
                debug!("frame reader finished");
            })?;
        Ok(Self { frames })
    }

    /// Waits for the next frame, at most `timeout` when one is given.
    /// `Ok(None)` marks the end of the stream.
    pub fn next(&self, timeout: Option<Duration>) -> Result<Option<TrackedFrame>, ReadError> {
        let item = match timeout {
            Some(timeout) => self.frames.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => ReadError::TimedOut(timeout),
                RecvTimeoutError::Disconnected => ReadError::ReaderGone,
            })?,
            None => self.frames.recv().map_err(|_| ReadError::ReaderGone)?,
        };
        Ok(item?)
    }
}

/// Reads tracked frames from a JSON-lines file, one frame per line
pub struct DetectionFileSource {
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
    total: Option<u64>,
}

impl DetectionFileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let open = |path: &Path| {
            File::open(path).map_err(|source| SourceError::Open {
                path: path.to_path_buf(),
                source,
            })
        };
        let total = count_frames(BufReader::new(open(path)?));
        Ok(Self {
            lines: BufReader::new(open(path)?).lines(),
            line_no: 0,
            total,
        })
    }
}

/// Non-blank lines in a JSON-lines stream, `None` if it cannot be read through
fn count_frames<R: BufRead>(reader: R) -> Option<u64> {
    let mut count = 0;
    for line in reader.lines() {
        if !line.ok()?.trim().is_empty() {
            count += 1;
        }
    }
    Some(count)
}

impl FrameSource for DetectionFileSource {
    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, SourceError> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            self.line_no += 1;
            let line = line.map_err(|source| SourceError::Read {
                line: self.line_no,
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line)
                .map(Some)
                .map_err(|source| SourceError::Malformed {
                    line: self.line_no,
                    source,
                });
        }
    }

    fn len_hint(&self) -> Option<u64> {
        self.total
    }
}

/// In-memory source, mostly for tests and benchmarks
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Result<TrackedFrame, String>>,
    total: u64,
}

impl MemorySource {
    pub fn new(frames: Vec<TrackedFrame>) -> Self {
        let total = frames.len() as u64;
        Self {
            frames: frames.into_iter().map(Ok).collect(),
            total,
        }
    }

    /// Queues a frame that fails to decode with the given raw text
    pub fn push_malformed(&mut self, raw: impl Into<String>) {
        self.frames.push_back(Err(raw.into()));
        self.total += 1;
    }

    pub fn push(&mut self, frame: TrackedFrame) {
        self.frames.push_back(Ok(frame));
        self.total += 1;
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, SourceError> {
        let line = (self.total as usize).saturating_sub(self.frames.len()) + 1;
        match self.frames.pop_front() {
            None => Ok(None),
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(raw)) => match serde_json::from_str::<TrackedFrame>(&raw) {
                Ok(frame) => Ok(Some(frame)),
                Err(source) => Err(SourceError::Malformed { line, source }),
            },
        }
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}
