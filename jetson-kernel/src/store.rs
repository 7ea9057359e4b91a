//! Append-only utilization/power series, keyed by node handle and timestamp.
//!
//! Rows are immutable once written. The only deletion path is
//! [`SampleStore::evict_older_than`], used by the retention sweeper.

use crate::error::StoreError;
use crate::models::{NodeHandle, PowerSample, UtilizationSample};
use crate::state::{NodeSeries, SeriesKey, SharedDatabase};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::ops::Bound;
use std::time::Duration;
use time::OffsetDateTime;

/// Rows fetched per read-lock acquisition while iterating a range.
const PAGE_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub utilization: usize,
    pub power: usize,
}

impl EvictionReport {
    pub fn total(&self) -> usize {
        self.utilization + self.power
    }
}

#[derive(Clone)]
pub struct SampleStore {
    db: SharedDatabase,
}

impl SampleStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn append_utilization(&self, node: NodeHandle, sample: UtilizationSample) -> Result<(), StoreError> {
        self.db.write(|t| {
            if !t.nodes.contains_key(&node) {
                return Err(StoreError::UnknownNode(node));
            }
            let seq = t.next_seq();
            let series = t.series.entry(node).or_default();
            series.utilization.insert((sample.timestamp, seq), UtilizationSample { node, ..sample });
            Ok(())
        })
    }

    pub fn append_power(&self, node: NodeHandle, sample: PowerSample) -> Result<(), StoreError> {
        self.db.write(|t| {
            if !t.nodes.contains_key(&node) {
                return Err(StoreError::UnknownNode(node));
            }
            let seq = t.next_seq();
            let series = t.series.entry(node).or_default();
            series.power.insert((sample.timestamp, seq), PowerSample { node, ..sample });
            Ok(())
        })
    }

    /// Writes both rows of one ingestion cycle in a single write section.
    /// The power row is stamped with the utilization row's timestamp so both
    /// fall on the same side of any retention cutoff.
    pub fn append_pair(
        &self,
        node: NodeHandle,
        utilization: UtilizationSample,
        power: PowerSample,
    ) -> Result<(), StoreError> {
        let timestamp = utilization.timestamp;
        self.db.write(|t| {
            if !t.nodes.contains_key(&node) {
                return Err(StoreError::UnknownNode(node));
            }
            let key = (timestamp, t.next_seq());
            let series = t.series.entry(node).or_default();
            series.utilization.insert(key, UtilizationSample { node, ..utilization });
            series.power.insert(key, PowerSample { node, timestamp, ..power });
            Ok(())
        })
    }

    /// Deletes every row older than `now - horizon`.
    pub fn evict_older_than(&self, horizon: Duration) -> EvictionReport {
        self.evict_older_than_at(horizon, OffsetDateTime::now_utc())
    }

    /// Rows with `timestamp >= now - horizon` are kept. A horizon reaching
    /// before the representable range evicts nothing.
    pub fn evict_older_than_at(&self, horizon: Duration, now: OffsetDateTime) -> EvictionReport {
        let Some(cutoff) = time::Duration::try_from(horizon)
            .ok()
            .and_then(|h| now.checked_sub(h))
        else {
            return EvictionReport::default();
        };

        self.db.write(|t| {
            let mut report = EvictionReport::default();
            for series in t.series.values_mut() {
                report.utilization += evict_before(&mut series.utilization, cutoff);
                report.power += evict_before(&mut series.power, cutoff);
            }
            report
        })
    }

    pub fn query_utilization(
        &self,
        node: NodeHandle,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> SampleRange<UtilizationSample> {
        SampleRange::new(self.db.clone(), node, from, to)
    }

    pub fn query_power(&self, node: NodeHandle, from: OffsetDateTime, to: OffsetDateTime) -> SampleRange<PowerSample> {
        SampleRange::new(self.db.clone(), node, from, to)
    }

    /// Both series of a node between `from` and `to` (inclusive), joined per
    /// ingestion cycle and ordered by timestamp ascending.
    pub fn query_range(&self, node: NodeHandle, from: OffsetDateTime, to: OffsetDateTime) -> PairRange {
        PairRange { db: self.db.clone(), node, from, to }
    }

    pub fn utilization_rows(&self) -> usize {
        self.db.read(|t| t.utilization_rows())
    }

    pub fn power_rows(&self) -> usize {
        self.db.read(|t| t.power_rows())
    }
}

fn evict_before<T>(rows: &mut BTreeMap<SeriesKey, T>, cutoff: OffsetDateTime) -> usize {
    let kept = rows.split_off(&(cutoff, 0));
    let removed = rows.len();
    *rows = kept;
    removed
}

/// A series row that can be paged out of a node's series.
pub trait SeriesRow: Clone + Send + Sync + 'static {
    #[doc(hidden)]
    fn series(series: &NodeSeries) -> &BTreeMap<SeriesKey, Self>;
}

impl SeriesRow for UtilizationSample {
    fn series(series: &NodeSeries) -> &BTreeMap<SeriesKey, Self> {
        &series.utilization
    }
}

impl SeriesRow for PowerSample {
    fn series(series: &NodeSeries) -> &BTreeMap<SeriesKey, Self> {
        &series.power
    }
}

/// Lazy, finite, restartable view over one series. Nothing is read until
/// iteration starts; each call to `iter` starts again from `from`.
#[derive(Clone)]
pub struct SampleRange<R> {
    db: SharedDatabase,
    node: NodeHandle,
    from: OffsetDateTime,
    to: OffsetDateTime,
    _row: PhantomData<fn() -> R>,
}

impl<R: SeriesRow> SampleRange<R> {
    fn new(db: SharedDatabase, node: NodeHandle, from: OffsetDateTime, to: OffsetDateTime) -> Self {
        Self { db, node, from, to, _row: PhantomData }
    }

    pub fn iter(&self) -> SampleIter<R> {
        SampleIter {
            db: self.db.clone(),
            node: self.node,
            cursor: Bound::Included((self.from, 0)),
            to: self.to,
            buffer: VecDeque::new(),
            exhausted: self.from > self.to,
        }
    }
}

impl<R: SeriesRow> IntoIterator for &SampleRange<R> {
    type Item = R;
    type IntoIter = SampleIter<R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct SampleIter<R> {
    db: SharedDatabase,
    node: NodeHandle,
    cursor: Bound<SeriesKey>,
    to: OffsetDateTime,
    buffer: VecDeque<(SeriesKey, R)>,
    exhausted: bool,
}

impl<R: SeriesRow> SampleIter<R> {
    fn fill(&mut self) {
        let upper = Bound::Included((self.to, u64::MAX));
        let page: Vec<(SeriesKey, R)> = self.db.read(|t| match t.series.get(&self.node) {
            Some(series) => R::series(series)
                .range((self.cursor, upper))
                .take(PAGE_SIZE)
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            None => Vec::new(),
        });

        if page.len() < PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.cursor = Bound::Excluded(*last);
        }
        self.buffer.extend(page);
    }

    fn next_keyed(&mut self) -> Option<(SeriesKey, R)> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill();
        }
        self.buffer.pop_front()
    }
}

impl<R: SeriesRow> Iterator for SampleIter<R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        self.next_keyed().map(|(_, row)| row)
    }
}

/// Rows written by one ingestion cycle, joined. A side is `None` when the row
/// was appended on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePair {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub utilization: Option<UtilizationSample>,
    pub power: Option<PowerSample>,
}

/// Lazy joined view over both series of a node. Each page reads both series
/// under one read lock, so a pair evicted as a unit never shows up half.
#[derive(Clone)]
pub struct PairRange {
    db: SharedDatabase,
    node: NodeHandle,
    from: OffsetDateTime,
    to: OffsetDateTime,
}

impl PairRange {
    pub fn iter(&self) -> PairIter {
        PairIter {
            db: self.db.clone(),
            node: self.node,
            cursor: Bound::Included((self.from, 0)),
            to: self.to,
            buffer: VecDeque::new(),
            exhausted: self.from > self.to,
        }
    }
}

impl IntoIterator for &PairRange {
    type Item = SamplePair;
    type IntoIter = PairIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct PairIter {
    db: SharedDatabase,
    node: NodeHandle,
    cursor: Bound<SeriesKey>,
    to: OffsetDateTime,
    buffer: VecDeque<SamplePair>,
    exhausted: bool,
}

impl PairIter {
    fn fill(&mut self) {
        let bounds = (self.cursor, Bound::Included((self.to, u64::MAX)));
        let (page, last) = self.db.read(|t| match t.series.get(&self.node) {
            Some(series) => join_page(series.utilization.range(bounds), series.power.range(bounds)),
            None => (Vec::new(), None),
        });

        if page.len() < PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = last {
            self.cursor = Bound::Excluded(last);
        }
        self.buffer.extend(page);
    }
}

impl Iterator for PairIter {
    type Item = SamplePair;

    fn next(&mut self) -> Option<SamplePair> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill();
        }
        self.buffer.pop_front()
    }
}

/// Merges two key-ordered series into at most `PAGE_SIZE` pairs. Rows sharing
/// a key are consumed together, so the page never splits a pair.
fn join_page<'a>(
    utilization: impl Iterator<Item = (&'a SeriesKey, &'a UtilizationSample)>,
    power: impl Iterator<Item = (&'a SeriesKey, &'a PowerSample)>,
) -> (Vec<SamplePair>, Option<SeriesKey>) {
    let mut utilization = utilization.peekable();
    let mut power = power.peekable();
    let mut page = Vec::new();
    let mut last = None;

    while page.len() < PAGE_SIZE {
        let key = match (utilization.peek().map(|(k, _)| **k), power.peek().map(|(k, _)| **k)) {
            (None, None) => break,
            (Some(u), None) => u,
            (None, Some(p)) => p,
            (Some(u), Some(p)) => u.min(p),
        };
        page.push(SamplePair {
            timestamp: key.0,
            utilization: utilization.next_if(|(k, _)| **k == key).map(|(_, row)| row.clone()),
            power: power.next_if(|(k, _)| **k == key).map(|(_, row)| row.clone()),
        });
        last = Some(key);
    }
    (page, last)
}
