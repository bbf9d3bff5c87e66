//! Bridge
//!
//! Drives a connector and a pipeline: connect, subscribe, start the PMD
//! streams and forward notifications until the stream ends or shutdown is
//! requested. Transient failures are retried with exponential backoff.
use crate::api::controller::{ConnectorApi, PublisherApi};
use crate::components::pipeline::Pipeline;
use crate::core::backoff::{Backoff, RetryConfig};
use crate::core::error::{BridgeError, BridgeResult};
use crate::core::events::BridgeEvent;
use crate::model::device::DeviceSelector;
use crate::api::model::ConnectorModelApi;
use crate::components::pipeline::Outcome;
use crate::core::constants::CONTROL_RESPONSE_TIMEOUT;
use crate::model::pmd::{MeasurementType, StreamSettings};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{broadcast::Sender, watch};
use tokio::time::Instant;

/// Bridges one sensor to one publisher, reconnecting on transient failures.
///
/// # Type Parameters
/// - `C`: Connector used to reach the sensor
/// - `P`: Publisher receiving the decoded samples
///
/// # Fields
/// - `connector`: BLE side of the bridge
/// - `pipeline`: Decodes and publishes every notification
/// - `selector`: Sensor to connect to
/// - `streams`: PMD streams to request after connecting
/// - `backoff`: Delay state between reconnect attempts
/// - `event_bus`: Channel for broadcasting bridge events
pub struct Bridge<C: ConnectorApi, P: PublisherApi> {
    connector: C,
    pipeline: Pipeline<P>,
    selector: DeviceSelector,
    streams: Vec<StreamSettings>,
    backoff: Backoff,
    event_bus: Sender<BridgeEvent>,
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

impl<C: ConnectorApi, P: PublisherApi> Bridge<C, P> {
    pub fn new(
        connector: C,
        pipeline: Pipeline<P>,
        selector: DeviceSelector,
        streams: Vec<StreamSettings>,
        retry: RetryConfig,
        event_bus: Sender<BridgeEvent>,
    ) -> Self {
        Self {
            connector,
            pipeline,
            selector,
            streams,
            backoff: Backoff::new(retry),
            event_bus,
        }
    }

    #[cfg(test)]
    pub fn pipeline(&self) -> &Pipeline<P> {
        &self.pipeline
    }

    /// Bridges until shutdown is signalled or a session fails for good.
    ///
    /// # Errors
    /// The first fatal error, or `RetriesExhausted` wrapping the last
    /// transient one.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> BridgeResult<()> {
        loop {
            if shutdown_requested(&shutdown) {
                return Ok(());
            }
            let forwarded = self.pipeline.forwarded();
            let result = self.session(&mut shutdown).await;
            if let Err(e) = self.connector.disconnect().await {
                warn!("could not disconnect cleanly: {}", e);
            }

            let err = match result {
                Ok(()) => return Ok(()),
                Err(_) if shutdown_requested(&shutdown) => return Ok(()),
                Err(e) => e,
            };
            if self.pipeline.forwarded() > forwarded {
                self.backoff.reset();
            }
            if !err.is_transient() {
                return Err(err);
            }
            let Some(delay) = self.backoff.next_delay() else {
                return Err(BridgeError::RetriesExhausted {
                    attempts: self.backoff.attempt(),
                    last: Box::new(err),
                });
            };
            let attempt = self.backoff.attempt();
            warn!(
                "{}; reconnecting in {} ms (attempt {})",
                err,
                delay.as_millis(),
                attempt
            );
            let _ = self
                .event_bus
                .send(BridgeEvent::RetryScheduled { attempt, delay });
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// One connection, from scan to stream end. Returns `Ok` only on shutdown.
    async fn session(&mut self, shutdown: &mut watch::Receiver<bool>) -> BridgeResult<()> {
        let device = self.connector.connect(&self.selector).await?;

        match self.connector.read_device_info().await {
            Ok(info) => info!("{}: {}", device.name, info),
            Err(e) => warn!("could not read device information: {}", e),
        }

        let streams = self.supported_streams().await?;
        let mut notifications = self.connector.subscribe(!streams.is_empty()).await?;
        let mut pending: Vec<MeasurementType> = Vec::new();
        if !streams.is_empty() {
            self.connector.start_streams(&streams).await?;
            pending = streams.iter().map(|s| s.measurement).collect();
        }
        let deadline = Instant::now() + CONTROL_RESPONSE_TIMEOUT;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || shutdown_requested(shutdown) {
                        debug!("shutdown requested");
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !pending.is_empty() => {
                    warn!("no confirmation for {:?} stream start", pending);
                    pending.clear();
                }
                next = notifications.next() => match next {
                    Some(notification) => {
                        if let Outcome::Control(response) = self.pipeline.handle(&notification).await {
                            let Some(index) = pending
                                .iter()
                                .position(|m| response.answers_start(*m))
                            else {
                                continue;
                            };
                            if !response.is_success() {
                                return Err(BridgeError::ControlRejected(response.status));
                            }
                            pending.remove(index);
                            if pending.is_empty() {
                                debug!("streaming {:?}", self.connector.get_active_streams());
                            }
                        }
                    }
                    None => return Err(BridgeError::StreamClosed),
                },
            }
        }
    }

    /// The requested streams the device reports support for.
    async fn supported_streams(&self) -> BridgeResult<Vec<StreamSettings>> {
        if self.streams.is_empty() {
            return Ok(Vec::new());
        }
        let features = match self.connector.read_features().await {
            Ok(features) => features,
            Err(BridgeError::CharacteristicMissing(uuid)) => {
                warn!("device has no PMD service ({}), forwarding heart rate only", uuid);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        Ok(self
            .streams
            .iter()
            .filter(|settings| {
                let supported = features.supports(settings.measurement);
                if !supported {
                    warn!("device does not support {} streaming", settings.measurement);
                }
                supported
            })
            .cloned()
            .collect())
    }
}
