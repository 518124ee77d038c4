//! MQTT broker client.

use crate::backoff::Backoff;
use crate::config::MqttConfig;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, SubscribeFilter, SubscribeReasonCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_core::{Broker, BrokerError, BrokerEvent, QoS};

fn map_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Create a client for `config` that subscribes to `topics`.
///
/// No network I/O happens here; the connection is made (and remade) by
/// [`MqttConnection::run`], so an unreachable broker at startup is not an error.
#[must_use]
pub fn connect(config: MqttConfig, topics: &[&str]) -> (MqttBroker, MqttConnection) {
    let subscribe_qos = config.subscribe_qos().unwrap_or_else(|e| {
        warn!(error = %e, "Falling back to QoS 1 for subscriptions");
        QoS::AtLeastOnce
    });

    let (client, eventloop) = AsyncClient::new(config.options(), config.request_capacity.max(1));

    info!(broker = %config.address(), client_id = %config.client_id, "MQTT client created");

    let connection = MqttConnection {
        client: client.clone(),
        eventloop,
        topics: topics.iter().map(|t| (*t).to_string()).collect(),
        subscribe_qos,
        backoff: Backoff::new(
            Duration::from_millis(config.reconnect_initial_ms),
            Duration::from_millis(config.reconnect_max_ms),
        ),
    };

    (MqttBroker { client }, connection)
}

/// Publishing half of the MQTT client.
#[derive(Clone)]
pub struct MqttBroker {
    client: AsyncClient,
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BrokerError> {
        // try_publish only enqueues; the PubAck is reported by the connection driver.
        self.client
            .try_publish(topic, map_qos(qos), false, payload.to_vec())
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }
}

/// Connection driver for the MQTT client.
pub struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Vec<String>,
    subscribe_qos: QoS,
    backoff: Backoff,
}

impl MqttConnection {
    /// Drive the connection until `shutdown` fires or `events` is dropped.
    ///
    /// Errors never end the loop: they are reported as
    /// [`BrokerEvent::Disconnected`] and the connection is retried after a
    /// backoff delay.
    pub async fn run(mut self, events: mpsc::Sender<BrokerEvent>, shutdown: CancellationToken) {
        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("MQTT shutdown requested");
                    if let Err(e) = self.client.try_disconnect() {
                        debug!(error = %e, "Disconnect request not sent");
                    }
                    break;
                }
                polled = self.eventloop.poll() => polled,
            };

            let event = match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(code = ?ack.code, "Connected to MQTT broker");
                    self.backoff.reset();
                    self.subscribe();
                    Some(BrokerEvent::Connected)
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => Some(BrokerEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                }),
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let failed = failed_topics(&self.topics, &ack.return_codes);
                    if failed.is_empty() {
                        debug!(topics = ?self.topics, "Subscriptions acknowledged");
                    }
                    for topic in failed {
                        warn!(topic = %topic, "Subscription refused");
                        if events.send(BrokerEvent::SubscribeFailed { topic }).await.is_err() {
                            return;
                        }
                    }
                    None
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    debug!(pkid = ack.pkid, "Publish acknowledged");
                    None
                }
                Ok(_) => None,
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "MQTT connection error");

                    if events
                        .send(BrokerEvent::Disconnected {
                            reason: e.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    None
                }
            };

            if let Some(event) = event {
                if events.send(event).await.is_err() {
                    debug!("Broker event receiver dropped, stopping MQTT loop");
                    return;
                }
            }
        }
    }

    /// Request subscriptions for every topic in one SUBSCRIBE packet.
    ///
    /// Commands queued while offline may fill the request queue, so the
    /// request is made from a task that waits for room instead of failing.
    fn subscribe(&self) {
        let client = self.client.clone();
        let qos = map_qos(self.subscribe_qos);
        let topics = self.topics.clone();
        let filters: Vec<_> = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), qos))
            .collect();

        tokio::spawn(async move {
            match client.subscribe_many(filters).await {
                Ok(()) => debug!(topics = ?topics, "Subscriptions requested"),
                Err(e) => error!(error = %e, "Failed to request subscriptions"),
            }
        });
    }
}

/// Topics whose subscription the broker refused, matched by position.
fn failed_topics(topics: &[String], codes: &[SubscribeReasonCode]) -> Vec<String> {
    topics
        .iter()
        .zip(codes)
        .filter(|(_, code)| matches!(code, SubscribeReasonCode::Failure))
        .map(|(topic, _)| topic.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use vigil_protocol::{CONTROL_TOPIC, SUBSCRIBED_TOPICS};

    const CONNECT: u8 = 1;
    const SUBSCRIBE: u8 = 8;

    /// Read one MQTT packet, returning its type and body.
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header >> 4, body))
    }

    #[test]
    fn test_map_qos() {
        assert_eq!(map_qos(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(map_qos(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(map_qos(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[test]
    fn test_failed_topics() {
        let topics: Vec<String> = SUBSCRIBED_TOPICS.iter().map(|t| t.to_string()).collect();
        let codes = [
            SubscribeReasonCode::Success(rumqttc::QoS::AtLeastOnce),
            SubscribeReasonCode::Failure,
        ];

        assert_eq!(failed_topics(&topics, &codes), vec![CONTROL_TOPIC.to_string()]);
    }

    #[tokio::test]
    async fn test_publish_does_not_block_when_queue_full() {
        let config = MqttConfig {
            request_capacity: 1,
            ..Default::default()
        };
        // The connection is never polled, so nothing drains the queue.
        let (broker, _connection) = connect(config, &SUBSCRIBED_TOPICS);

        let payload = Bytes::from_static(br#"{"action":"activate"}"#);
        broker
            .publish(CONTROL_TOPIC, payload.clone(), QoS::AtLeastOnce)
            .await
            .unwrap();

        let result = broker.publish(CONTROL_TOPIC, payload, QoS::AtLeastOnce).await;
        assert!(matches!(result, Err(BrokerError::Publish(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = MqttConfig {
            port: 1,
            reconnect_initial_ms: 10,
            reconnect_max_ms: 10,
            ..Default::default()
        };
        let (_broker, connection) = connect(config, &SUBSCRIBED_TOPICS);
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(connection.run(tx, shutdown.clone()));

        // Nothing listens on port 1, so the first poll fails.
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, BrokerEvent::Disconnected { .. }));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_resubscribes_behind_queued_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = MqttConfig {
            host: "127.0.0.1".into(),
            port: listener.local_addr().unwrap().port(),
            request_capacity: 1,
            ..Default::default()
        };
        let (broker, connection) = connect(config, &SUBSCRIBED_TOPICS);

        // A command sent while offline fills the request queue.
        broker
            .publish(
                CONTROL_TOPIC,
                Bytes::from_static(br#"{"action":"activate"}"#),
                QoS::AtLeastOnce,
            )
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(connection.run(tx, shutdown.clone()));

        let (mut stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let (kind, _) = read_packet(&mut stream).await.unwrap();
        assert_eq!(kind, CONNECT);
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(matches!(event, Some(BrokerEvent::Connected)));

        // The queued command goes out first, then the subscription follows.
        let topics = timeout(Duration::from_secs(5), async {
            loop {
                let (kind, body) = read_packet(&mut stream).await.unwrap();
                if kind == SUBSCRIBE {
                    return body;
                }
            }
        })
        .await
        .expect("subscription was never sent");
        let body = String::from_utf8_lossy(&topics);
        assert!(body.contains("status"));
        assert!(body.contains("control"));

        shutdown.cancel();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
