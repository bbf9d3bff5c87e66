//! Bridge Statistics
//!
//! Counts the events on the bus and logs a summary line at a fixed interval.
use crate::core::events::BridgeEvent;
use crate::model::sample::SampleKind;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast::{error::RecvError, Receiver};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub published: BTreeMap<SampleKind, u64>,
    pub rejected: u64,
    pub dropped: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub retries: u64,
}

impl BridgeStats {
    pub fn apply(&mut self, event: &BridgeEvent) {
        match event {
            BridgeEvent::SamplePublished(kind) => *self.published.entry(*kind).or_default() += 1,
            BridgeEvent::PayloadRejected { .. } => self.rejected += 1,
            BridgeEvent::DatagramDropped(_) => self.dropped += 1,
            BridgeEvent::DeviceConnected(_) => self.connects += 1,
            BridgeEvent::DeviceDisconnected(_) => self.disconnects += 1,
            BridgeEvent::RetryScheduled { .. } => self.retries += 1,
            BridgeEvent::StreamStarted(_) => {}
        }
    }

    pub fn total_published(&self) -> u64 {
        self.published.values().sum()
    }
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sent {}", self.total_published())?;
        for (kind, count) in &self.published {
            write!(f, ", {} {}", kind, count)?;
        }
        write!(
            f,
            "; rejected {}, dropped {}, reconnects {}",
            self.rejected, self.dropped, self.retries
        )
    }
}

/// Consumes the event bus until it closes.
pub struct StatsReporter {
    events: Receiver<BridgeEvent>,
    interval: Duration,
    stats: BridgeStats,
}

impl StatsReporter {
    /// A zero `interval` disables the periodic log line.
    pub fn new(events: Receiver<BridgeEvent>, interval: Duration) -> Self {
        Self {
            events,
            interval,
            stats: BridgeStats::default(),
        }
    }

    /// Runs until every sender is dropped and returns the final counters.
    pub async fn run(mut self) -> BridgeStats {
        // the tick branch is disabled for a zero interval
        let period = self.interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Ok(event) => self.stats.apply(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("stats reporter missed {} events", missed);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick(), if !self.interval.is_zero() => {
                    info!("{}", self.stats);
                }
            }
        }
        self.stats
    }
}
