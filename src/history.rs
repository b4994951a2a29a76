use crate::geometry::Point2D;
use crate::lane::LaneId;
use crate::ring_buffer::RingBuffer;

/// Capacity of the per-track lane vote buffer
pub const LANE_VOTE_CAPACITY: usize = 30;

/// Extra slots on top of `window * fps` to absorb frame-rate jitter
pub const CAPACITY_SLACK: usize = 5;

/// A timestamped position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub t: f64,
    pub point: Point2D,
}

impl Sample {
    pub fn new(t: f64, point: Point2D) -> Self {
        Self { t, point }
    }
}

/// Largest per-track history a configuration may ask for
pub const MAX_HISTORY_CAPACITY: usize = 65_536;

/// Number of samples kept for a persistence window at a given frame rate.
/// Saturates rather than wrapping for absurd inputs.
pub fn history_capacity(window_seconds: f64, fps: f64) -> usize {
    ((window_seconds * fps).max(0.0).floor() as usize).saturating_add(CAPACITY_SLACK)
}

/// Time-ordered positions bounded by both a sample count and a time window
#[derive(Debug, Clone)]
pub struct TimedHistory {
    samples: RingBuffer<Sample>,
    window_seconds: f64,
}

impl TimedHistory {
    pub fn new(capacity: usize, window_seconds: f64) -> Self {
        Self {
            samples: RingBuffer::with_capacity(capacity),
            window_seconds,
        }
    }

    /// Appends a sample. Returns `false`, leaving the history untouched, when
    /// the sample is older than the newest one already held.
    pub fn push(&mut self, sample: Sample) -> bool {
        if self.newest().is_some_and(|last| sample.t < last.t) {
            return false;
        }
        self.samples.push(sample);
        while let Some(oldest) = self.samples.front() {
            if sample.t - oldest.t > self.window_seconds {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        true
    }

    pub fn newest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn oldest(&self) -> Option<&Sample> {
        self.samples.front()
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Sample> + ExactSizeIterator + '_ {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }
}

/// Recent per-frame lane classifications for one track
#[derive(Debug, Clone)]
pub struct LaneVotes {
    votes: RingBuffer<LaneId>,
}

impl LaneVotes {
    pub fn new() -> Self {
        Self::with_capacity(LANE_VOTE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            votes: RingBuffer::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, lane: LaneId) {
        self.votes.push(lane);
    }

    /// Most frequent lane among the retained votes.
    ///
    /// Ties go to the lane whose earliest retained vote is oldest, so a
    /// track keeps its previous lane until a challenger strictly outvotes it.
    pub fn majority(&self) -> Option<LaneId> {
        // (lane, count) in first-seen order
        let mut tally: Vec<(LaneId, usize)> = Vec::new();
        for &lane in self.votes.iter() {
            match tally.iter_mut().find(|(id, _)| *id == lane) {
                Some((_, count)) => *count += 1,
                None => tally.push((lane, 1)),
            }
        }

        let mut best: Option<(LaneId, usize)> = None;
        for (lane, count) in tally {
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((lane, count));
            }
        }
        best.map(|(lane, _)| lane)
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

impl Default for LaneVotes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(t: f64, x: f64) -> Sample {
        Sample::new(t, Point2D::new(x, 0.0))
    }

    #[test]
    fn test_history_capacity() {
        assert_eq!(history_capacity(1.5, 30.0), 50);
        assert_eq!(history_capacity(1.5, 10.0), 20);
        assert_eq!(history_capacity(0.0, 30.0), CAPACITY_SLACK);
    }

    #[test]
    fn test_history_capacity_saturates() {
        assert_eq!(history_capacity(1.5, 1e300), usize::MAX);
        assert_eq!(history_capacity(f64::NAN, 30.0), CAPACITY_SLACK);
    }

    #[test]
    fn test_push_drops_samples_outside_window() {
        let mut history = TimedHistory::new(100, 1.0);
        for i in 0..=20 {
            assert!(history.push(at(i as f64 * 0.1, i as f64)));
        }
        let newest = history.newest().unwrap().t;
        assert!(history.iter().all(|s| newest - s.t <= 1.0 + 1e-9));
        // 1.0..=2.0 at 0.1 s spacing, give or take float rounding at the edge
        assert!(history.len() == 10 || history.len() == 11);
    }

    #[test]
    fn test_push_obeys_count_bound() {
        let mut history = TimedHistory::new(4, 100.0);
        for i in 0..10 {
            history.push(at(i as f64, i as f64));
        }
        assert_eq!(history.len(), 4);
        assert_eq!(history.oldest().unwrap().t, 6.0);
        assert_eq!(history.newest().unwrap().t, 9.0);
    }

    #[test]
    fn test_push_rejects_out_of_order() {
        let mut history = TimedHistory::new(10, 5.0);
        assert!(history.push(at(1.0, 0.0)));
        assert!(history.push(at(1.0, 1.0)));
        assert!(!history.push(at(0.5, 2.0)));
        assert_eq!(history.len(), 2);
        let times: Vec<f64> = history.iter().map(|s| s.t).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_majority_vote() {
        let mut votes = LaneVotes::new();
        assert_eq!(votes.majority(), None);
        for lane in [2, 1, 2, 3, 2] {
            votes.push(lane);
        }
        assert_eq!(votes.majority(), Some(2));
    }

    #[test]
    fn test_majority_tie_goes_to_earliest_seen() {
        let mut votes = LaneVotes::new();
        for lane in [3, 1, 1, 3] {
            votes.push(lane);
        }
        assert_eq!(votes.majority(), Some(3));

        let mut votes = LaneVotes::new();
        for lane in [1, 3, 3, 1] {
            votes.push(lane);
        }
        assert_eq!(votes.majority(), Some(1));
    }

    #[test]
    fn test_votes_are_bounded() {
        let mut votes = LaneVotes::new();
        for _ in 0..20 {
            votes.push(1);
        }
        for _ in 0..30 {
            votes.push(2);
        }
        assert_eq!(votes.len(), LANE_VOTE_CAPACITY);
        assert_eq!(votes.majority(), Some(2));
    }
}
