//! Queue transport — competing consumers on a broker-side queue group.
//!
//! Receivers subscribe to `newfile.<node-name>` through an MQTT shared
//! subscription (`$share/<queue-name>/<subject>`), so the broker hands each
//! message to exactly one member of the group. Messages are structured-mode
//! CloudEvents.
//!
//! Acks are manual. MQTT brokers only resend an unacknowledged message when
//! the session reconnects, so a failing handler is retried here with bounded
//! backoff and the message is acknowledged once it reaches a terminal outcome
//! or the attempts run out. Only shutdown withholds the ack; the persistent
//! session under a stable client id hands the message back on the next start.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Transport;
use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::pipeline::{Deliver, Outcome};

/// Subject prefix; the node name is appended.
pub const SUBJECT_PREFIX: &str = "newfile";

/// Pause before polling again after a broker connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 10;

/// How long shutdown waits for the DISCONNECT packet to go out.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Subject a node's events are published on, e.g. `newfile.node-1`.
pub fn subject_for_node(node_name: &str) -> String {
    format!("{SUBJECT_PREFIX}.{node_name}")
}

/// Broker connection and subscription settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub queue_name: String,
    pub subject: String,
    pub keep_alive_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "prepper".to_string(),
            queue_name: "prepper".to_string(),
            subject: SUBJECT_PREFIX.to_string(),
            keep_alive_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Shared-subscription topic filter for the queue group.
    pub fn subscription_filter(&self) -> String {
        format!("$share/{}/{}", self.queue_name, self.subject)
    }
}

/// Bounded handler retries for one queue message.
///
/// Backoff doubles after every failed attempt, capped at `max_backoff`. The
/// event loop is not polled while a message retries, so the total backoff has
/// to stay well inside the keep-alive interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Pause after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// What to tell the broker about one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge; the message is done or was given up on.
    Ack,
    /// Withhold the ack; the broker resends it when the session resumes.
    Redeliver,
}

/// Broker disposition for the outcome of a single attempt.
///
/// Rejections and malformed payloads are acknowledged: redelivering them
/// unchanged can never succeed.
pub fn disposition_for(outcome: &Outcome) -> Disposition {
    if outcome.is_retryable() {
        Disposition::Redeliver
    } else {
        Disposition::Ack
    }
}

/// Run one queue message through the receiver, retrying handler failures.
pub async fn handle_message(
    receiver: &dyn Deliver,
    payload: &[u8],
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Disposition {
    let envelope = match Envelope::from_structured(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(error = %e, "Dropping malformed queue message");
            return Disposition::Ack;
        }
    };
    let id = envelope.id().unwrap_or("-").to_string();

    let mut attempt = 1;
    loop {
        let outcome = receiver.deliver(envelope.clone(), cancel).await;
        match disposition_for(&outcome) {
            Disposition::Ack => return Disposition::Ack,
            Disposition::Redeliver if outcome == Outcome::Canceled => {
                return Disposition::Redeliver;
            }
            Disposition::Redeliver => {}
        }

        if attempt >= retry.max_attempts.max(1) {
            error!(
                id = %id,
                attempts = attempt,
                detail = outcome.detail().as_deref().unwrap_or("-"),
                "Giving up on queue message"
            );
            return Disposition::Ack;
        }

        let backoff = retry.backoff(attempt);
        warn!(id = %id, attempt, ?backoff, "Handler failed, retrying");
        tokio::select! {
            _ = cancel.cancelled() => return Disposition::Redeliver,
            _ = tokio::time::sleep(backoff) => {}
        }
        attempt += 1;
    }
}

/// Drive the event loop until the broker connection closes after a
/// disconnect request, or the timeout passes. Returns whether it closed.
pub async fn finish_disconnect(eventloop: &mut EventLoop, timeout: Duration) -> bool {
    let closed = tokio::time::timeout(timeout, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => debug!("Disconnect sent"),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    })
    .await;
    closed.is_ok()
}

/// Queue-group consumer on an MQTT broker.
pub struct QueueTransport {
    config: QueueConfig,
}

impl QueueTransport {
    pub fn new(config: QueueConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        opts.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        opts.set_clean_session(false);
        opts.set_manual_acks(true);
        opts
    }
}

#[async_trait]
impl Transport for QueueTransport {
    fn name(&self) -> &str {
        "queue"
    }

    async fn run(
        &mut self,
        receiver: Arc<dyn Deliver>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        let filter = self.config.subscription_filter();
        client.subscribe(&filter, QoS::AtLeastOnce).await?;
        info!(
            host = %self.config.host,
            port = self.config.port,
            filter = %filter,
            "Subscribed to queue group"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Queue receiver shutting down");
                    break;
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, pkid = publish.pkid, "Queue message received");
                        match handle_message(
                            receiver.as_ref(),
                            &publish.payload,
                            &self.config.retry,
                            &shutdown,
                        )
                        .await
                        {
                            Disposition::Ack => {
                                if let Err(e) = client.ack(&publish).await {
                                    warn!(error = %e, pkid = publish.pkid, "Failed to acknowledge message");
                                }
                            }
                            Disposition::Redeliver => {
                                debug!(pkid = publish.pkid, "Withholding ack for redelivery");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Broker connection error (retrying)");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                },
            }
        }

        match client.disconnect().await {
            Ok(()) => {
                if !finish_disconnect(&mut eventloop, DISCONNECT_TIMEOUT).await {
                    warn!("Broker did not close the connection before the disconnect timeout");
                }
            }
            Err(e) => debug!(error = %e, "Disconnect request failed"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::pipeline::{ExpectedIdentity, LogPathHandler, MismatchField, Receiver, Rejection};

    /// Returns a fixed outcome and remembers what it was given.
    struct FixedOutcome {
        outcome: Outcome,
        seen: Mutex<Vec<Envelope>>,
    }

    impl FixedOutcome {
        fn new(outcome: Outcome) -> Self {
            Self {
                outcome,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Deliver for FixedOutcome {
        async fn deliver(&self, envelope: Envelope, _cancel: &CancellationToken) -> Outcome {
            self.seen.lock().unwrap().push(envelope);
            self.outcome.clone()
        }
    }

    /// Fails with `HandlerFailed` for the first `failures` deliveries.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Deliver for Flaky {
        async fn deliver(&self, _envelope: Envelope, _cancel: &CancellationToken) -> Outcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Outcome::HandlerFailed {
                    detail: format!("attempt {call} failed"),
                }
            } else {
                Outcome::Acknowledged
            }
        }
    }

    fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn message(source: &str, data: serde_json::Value) -> Vec<u8> {
        serde_json::json!({
            "specversion": "1.0",
            "type": "io.jaconi.prepper.file.new",
            "source": source,
            "id": "q-1",
            "data": data
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn subject_and_filter() {
        assert_eq!(subject_for_node("node-1"), "newfile.node-1");
        let config = QueueConfig {
            queue_name: "workers".to_string(),
            subject: subject_for_node("node-1"),
            ..QueueConfig::default()
        };
        assert_eq!(config.subscription_filter(), "$share/workers/newfile.node-1");
    }

    #[test]
    fn only_retryable_outcomes_are_redelivered() {
        assert_eq!(disposition_for(&Outcome::Acknowledged), Disposition::Ack);
        assert_eq!(
            disposition_for(&Outcome::Rejected(Rejection::new(
                MismatchField::SourceMismatch,
                "a",
                "b"
            ))),
            Disposition::Ack
        );
        assert_eq!(
            disposition_for(&Outcome::DecodeFailed {
                detail: "x".into()
            }),
            Disposition::Ack
        );
        assert_eq!(
            disposition_for(&Outcome::HandlerFailed {
                detail: "x".into()
            }),
            Disposition::Redeliver
        );
        assert_eq!(disposition_for(&Outcome::Canceled), Disposition::Redeliver);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(500));
        assert_eq!(retry.backoff(2), Duration::from_secs(1));
        assert_eq!(retry.backoff(3), Duration::from_secs(2));
        assert_eq!(retry.backoff(5), Duration::from_secs(5));
        assert_eq!(retry.backoff(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn malformed_message_is_dropped_without_delivery() {
        let receiver = FixedOutcome::new(Outcome::Acknowledged);
        let disposition = handle_message(
            &receiver,
            b"garbage",
            &quick_retry(3),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(disposition, Disposition::Ack);
        assert!(receiver.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_is_parsed_and_delivered_once_when_terminal() {
        let receiver = FixedOutcome::new(Outcome::DecodeFailed {
            detail: "bad".into(),
        });
        let payload = message("jaconi.io/prepper/node-1", serde_json::json!({ "path": "/a" }));

        let disposition =
            handle_message(&receiver, &payload, &quick_retry(3), &CancellationToken::new()).await;
        assert_eq!(disposition, Disposition::Ack);

        let seen = receiver.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id(), Some("q-1"));
    }

    #[tokio::test]
    async fn handler_failure_is_retried_on_the_live_connection() {
        let receiver = Flaky::new(2);
        let payload = message("jaconi.io/prepper/node-1", serde_json::json!({ "path": "/a" }));

        let disposition =
            handle_message(&receiver, &payload, &quick_retry(3), &CancellationToken::new()).await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(receiver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_failure_is_acknowledged_after_max_attempts() {
        let receiver = FixedOutcome::new(Outcome::HandlerFailed {
            detail: "disk full".into(),
        });
        let payload = message("jaconi.io/prepper/node-1", serde_json::json!({ "path": "/a" }));

        let disposition =
            handle_message(&receiver, &payload, &quick_retry(4), &CancellationToken::new()).await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(receiver.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn shutdown_during_backoff_withholds_the_ack() {
        let receiver = FixedOutcome::new(Outcome::HandlerFailed {
            detail: "disk full".into(),
        });
        let payload = message("jaconi.io/prepper/node-1", serde_json::json!({ "path": "/a" }));
        let retry = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let disposition = tokio::time::timeout(
            Duration::from_secs(5),
            handle_message(&receiver, &payload, &retry, &cancel),
        )
        .await
        .unwrap();
        assert_eq!(disposition, Disposition::Redeliver);
        assert_eq!(receiver.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_returns_once_the_connection_closes() {
        // Nothing listens on port 1, so the connection attempt fails at once.
        let opts = MqttOptions::new("prepper-test", "127.0.0.1", 1);
        let (client, mut eventloop) = AsyncClient::new(opts, REQUEST_CAPACITY);
        client.disconnect().await.unwrap();
        assert!(finish_disconnect(&mut eventloop, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn real_receiver_outcomes_map_to_dispositions() {
        let receiver = Receiver::new(ExpectedIdentity::for_node("node-1"), Arc::new(LogPathHandler));
        let cancel = CancellationToken::new();

        let retry = quick_retry(3);

        let accepted = message("jaconi.io/prepper/node-1", serde_json::json!({ "path": "/a" }));
        assert_eq!(
            handle_message(&receiver, &accepted, &retry, &cancel).await,
            Disposition::Ack
        );

        let foreign = message("jaconi.io/prepper/node-2", serde_json::json!({ "path": "/a" }));
        assert_eq!(
            handle_message(&receiver, &foreign, &retry, &cancel).await,
            Disposition::Ack
        );

        cancel.cancel();
        assert_eq!(
            handle_message(&receiver, &accepted, &retry, &cancel).await,
            Disposition::Redeliver
        );
    }
}
