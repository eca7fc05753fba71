use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::predict::{DopplerPoint, TrackPoint};

pub trait Timed {
    fn time(&self) -> DateTime<Utc>;
}

impl Timed for TrackPoint {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

impl Timed for DopplerPoint {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Cursor over a time series that is replayed against the wall clock.
pub struct Replay<'a, T> {
    samples: &'a [T],
    next: usize,
}

#[derive(Debug)]
pub struct Due<'a, T> {
    pub sample: &'a T,
    /// Samples passed over because their time was already gone.
    pub skipped: usize,
}

impl<'a, T: Timed> Replay<'a, T> {
    pub fn new(samples: &'a [T]) -> Self {
        Self { samples, next: 0 }
    }

    /// When the cursor next wants to run.
    pub fn next_time(&self) -> Option<DateTime<Utc>> {
        self.samples.get(self.next).map(Timed::time)
    }

    /// Skips every sample older than `now` and hands out the one after.
    /// `None` once the series is used up.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Option<Due<'a, T>> {
        let start = self.next;
        while self.samples.get(self.next).is_some_and(|s| s.time() < now) {
            self.next += 1;
        }
        let sample = self.samples.get(self.next)?;
        self.next += 1;
        Some(Due {
            sample,
            skipped: self.next - 1 - start,
        })
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display,
)]
pub enum Source {
    Aos,
    Rotator,
    Doppler,
    Thermal,
    Los,
    PositionLog,
}

/// Absolute deadlines for every armed source, earliest first.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, Source)>>,
}

impl TimerQueue {
    pub fn schedule(&mut self, at: DateTime<Utc>, source: Source) {
        log::trace!("{} armed for {}", source, at);
        self.heap.push(Reverse((at, source)));
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Disarms and returns every source due at `now`, in deadline order.
    /// Sources rearmed while handling these wait for the next wake.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Source> {
        let mut due = Vec::new();
        while let Some(Reverse((at, source))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            due.push(source);
        }
        due
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Wall clock time left until `deadline`, zero if it already passed.
pub fn until(deadline: DateTime<Utc>) -> std::time::Duration {
    (deadline - Utc::now()).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn series(t0: DateTime<Utc>) -> Vec<DopplerPoint> {
        (0..5)
            .map(|i| DopplerPoint {
                time: t0 + Duration::seconds(i),
                range_velocity: i as f64,
            })
            .collect()
    }

    #[test]
    fn late_handler_skips_stale_samples() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples = series(t0);
        let mut replay = Replay::new(&samples);

        let due = replay.advance(t0 + Duration::milliseconds(2500)).unwrap();
        assert_eq!(due.sample.range_velocity, 3.0);
        assert_eq!(due.skipped, 3);
        assert_eq!(replay.next_time(), Some(t0 + Duration::seconds(4)));

        // On time, nothing is skipped
        let due = replay.advance(t0 + Duration::seconds(3)).unwrap();
        assert_eq!(due.sample.range_velocity, 4.0);
        assert_eq!(due.skipped, 0);
        assert_eq!(replay.next_time(), None);
        assert!(replay.advance(t0 + Duration::seconds(4)).is_none());
    }

    #[test]
    fn everything_stale_exhausts() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples = series(t0);
        let mut replay = Replay::new(&samples);
        assert!(replay.advance(t0 + Duration::minutes(1)).is_none());
        assert_eq!(replay.next_time(), None);
    }

    #[test]
    fn timers_come_out_in_order() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut timers = TimerQueue::default();
        timers.schedule(t0 + Duration::seconds(5), Source::Los);
        timers.schedule(t0, Source::Doppler);
        timers.schedule(t0, Source::Aos);
        timers.schedule(t0 + Duration::seconds(1), Source::Thermal);

        assert_eq!(timers.next_deadline(), Some(t0));
        assert_eq!(timers.take_due(t0), vec![Source::Aos, Source::Doppler]);
        assert_eq!(timers.take_due(t0 + Duration::seconds(2)), vec![Source::Thermal]);
        assert!(timers.take_due(t0 + Duration::seconds(2)).is_empty());
        assert_eq!(timers.take_due(t0 + Duration::seconds(9)), vec![Source::Los]);
        assert!(timers.is_empty());
    }
}
