//! Market data feeds.
//!
//! The engine never performs I/O inside its loop: data is loaded up front and
//! replayed through a `DataFeed`. `InMemoryFeed` is the buffered, time-sorted
//! implementation every run uses.

use crate::domain::{DataKind, MarketDataPoint};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    #[error("data feed error: no more data")]
    Exhausted,

    #[error("data feed error: feed is closed")]
    Closed,

    #[error("data feed error: {0}")]
    Source(String),
}

/// A source of historical market data points in non-decreasing timestamp order.
pub trait DataFeed: Send {
    /// The next point, or `FeedError::Exhausted` when none remain.
    fn next(&mut self) -> Result<MarketDataPoint, FeedError>;

    fn has_next(&self) -> bool;

    /// Rewind to the first point.
    fn reset(&mut self) -> Result<(), FeedError>;

    /// Release the buffer. Further reads fail with `FeedError::Closed`.
    fn close(&mut self) -> Result<(), FeedError>;
}

/// Sorted in-memory buffer of data points.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFeed {
    points: Vec<MarketDataPoint>,
    cursor: usize,
    closed: bool,
}

impl InMemoryFeed {
    /// Build a feed, stably sorting by timestamp.
    ///
    /// Points sharing a timestamp keep their input order.
    pub fn new(mut points: Vec<MarketDataPoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self {
            points,
            cursor: 0,
            closed: false,
        }
    }

    /// Keep only points whose payload kind is in `kinds`.
    pub fn retain_kinds(mut self, kinds: &[DataKind]) -> Self {
        self.points.retain(|p| kinds.contains(&p.kind()));
        self.cursor = 0;
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[MarketDataPoint] {
        &self.points
    }
}

impl DataFeed for InMemoryFeed {
    fn next(&mut self) -> Result<MarketDataPoint, FeedError> {
        if self.closed {
            return Err(FeedError::Closed);
        }
        let point = self
            .points
            .get(self.cursor)
            .cloned()
            .ok_or(FeedError::Exhausted)?;
        self.cursor += 1;
        Ok(point)
    }

    fn has_next(&self) -> bool {
        !self.closed && self.cursor < self.points.len()
    }

    fn reset(&mut self) -> Result<(), FeedError> {
        if self.closed {
            return Err(FeedError::Closed);
        }
        self.cursor = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<(), FeedError> {
        self.points.clear();
        self.cursor = 0;
        self.closed = true;
        Ok(())
    }
}
