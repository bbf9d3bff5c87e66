//! Notification Pipeline
//!
//! Turns raw notifications into datagrams: optional capture, decoding,
//! publishing and event reporting. Used by live bridging and by replay.
use crate::api::controller::PublisherApi;
use crate::components::capture::CaptureWriter;
use crate::core::events::BridgeEvent;
use crate::model::pmd::ControlPointResponse;
use crate::model::sample::{Decoded, RawNotification, SampleKind};
use log::{debug, warn};
use tokio::sync::broadcast::Sender;

/// What happened to a single notification.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The sample was sent as a datagram.
    Published(SampleKind),
    /// A control point indication, not forwarded.
    Control(ControlPointResponse),
    /// The payload could not be decoded.
    Rejected,
    /// The sample was decoded but not sent.
    Dropped,
}

/// Processes notifications for one publisher.
///
/// # Type Parameters
/// - `P`: Publisher receiving the decoded samples
///
/// # Fields
/// - `publisher`: Destination of the decoded samples
/// - `event_bus`: Channel for broadcasting per-notification events
/// - `capture`: Optional writer recording every raw notification
/// - `forwarded`: Count of samples sent so far
pub struct Pipeline<P: PublisherApi> {
    publisher: P,
    event_bus: Sender<BridgeEvent>,
    capture: Option<CaptureWriter>,
    forwarded: u64,
}

impl<P: PublisherApi> Pipeline<P> {
    pub fn new(publisher: P, event_bus: Sender<BridgeEvent>, capture: Option<CaptureWriter>) -> Self {
        Self {
            publisher,
            event_bus,
            capture,
            forwarded: 0,
        }
    }

    /// Number of samples sent since creation.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Processes one notification. Failures are logged and reported on the
    /// event bus; none of them stops the pipeline.
    pub async fn handle(&mut self, notification: &RawNotification) -> Outcome {
        if let Some(capture) = self.capture.as_mut() {
            if let Err(e) = capture.append(notification) {
                warn!(
                    "capture to {} failed, disabling: {:#}",
                    capture.path().display(),
                    e
                );
                self.capture = None;
            }
        }

        let sample = match notification.decode() {
            Ok(Decoded::Sample(sample)) => sample,
            Ok(Decoded::Control(response)) => {
                if response.is_success() {
                    debug!("control point response {:?}", response);
                } else {
                    warn!(
                        "control point rejected op 0x{:02x} for measurement 0x{:02x}: {:?}",
                        response.op_code, response.measurement, response.status
                    );
                }
                return Outcome::Control(response);
            }
            Err(e) => {
                warn!(
                    "dropping notification from {} ({:02x?}): {}",
                    notification.characteristic, notification.value, e
                );
                let _ = self.event_bus.send(BridgeEvent::PayloadRejected {
                    characteristic: notification.characteristic,
                    reason: e.to_string(),
                });
                return Outcome::Rejected;
            }
        };

        let kind = sample.kind();
        match self.publisher.publish(notification.received_at, &sample).await {
            Ok(_) => {
                self.forwarded += 1;
                let _ = self.event_bus.send(BridgeEvent::SamplePublished(kind));
                Outcome::Published(kind)
            }
            Err(e) => {
                warn!(
                    "could not send {} sample to {}: {}",
                    kind,
                    self.publisher.target(),
                    e
                );
                let _ = self
                    .event_bus
                    .send(BridgeEvent::DatagramDropped(e.to_string()));
                Outcome::Dropped
            }
        }
    }
}
