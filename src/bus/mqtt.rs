//! # MQTT Bus
//!
//! `rumqttc` based implementation of [`Bus`].
//!
//! ## Delivery Confirmation
//!
//! `AsyncClient::publish` returns as soon as the request is queued, which
//! says nothing about the broker. The event loop processes requests in
//! queue order and reports `Outgoing::Publish` once a publish has been
//! handed to the connection, so every publish registers a waiter in a FIFO
//! and the event loop resolves the oldest waiter on each outgoing publish.
//! Queueing the request and registering its waiter happen under one lock,
//! so waiter order and request order are identical.
//!
//! Publishes use QoS 0, there is no acknowledgement beyond the write.
//!
//! ## Disconnects
//!
//! A publish is refused with [`BusError::Disconnected`] while the broker is
//! not connected. When the connection drops, every outstanding waiter fails
//! with [`BusError::Disconnected`] and the client is replaced together with
//! its request queue, so a publish reported as failed is never written
//! after the reconnect.
//!
//! ## Event Loop
//!
//! [`MqttEventLoop::run`] polls the connection until cancelled. On every
//! `ConnAck` it (re)subscribes to the bridge wildcard, inbound publishes are
//! forwarded to the ingest channel, connection errors are logged and polling
//! resumes on a fresh client after a short back-off.

use super::{Bus, InboundMessage};
use crate::config::MqttSettings;
use crate::error::BusError;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Current client, its confirmation waiters and the connection state.
struct Link {
    client: AsyncClient,
    waiters: VecDeque<oneshot::Sender<()>>,
    connected: bool,
}

type SharedLink = Arc<Mutex<Link>>;

fn lock_link(link: &SharedLink) -> MutexGuard<'_, Link> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Link {
    fn new(client: AsyncClient) -> Self {
        Self {
            client,
            waiters: VecDeque::new(),
            connected: false,
        }
    }

    /// Queues a publish and returns the receiver resolved on its write.
    fn enqueue(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<oneshot::Receiver<()>, BusError> {
        if !self.connected {
            return Err(BusError::Disconnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload)
            .map_err(|e| BusError::Client(e.to_string()))?;

        let (confirm_tx, confirm_rx) = oneshot::channel();
        self.waiters.push_back(confirm_tx);
        Ok(confirm_rx)
    }

    fn confirm_oldest(&mut self) {
        match self.waiters.pop_front() {
            // the caller may have timed out already
            Some(waiter) => {
                let _ = waiter.send(());
            }
            None => trace!("Outgoing publish without waiter"),
        }
    }

    /// Marks the link down and fails every outstanding waiter.
    fn go_offline(&mut self) -> usize {
        self.connected = false;
        let failed = self.waiters.len();
        self.waiters.clear();
        failed
    }
}

pub struct MqttBus {
    link: SharedLink,
}

impl MqttBus {
    pub fn is_connected(&self) -> bool {
        lock_link(&self.link).connected
    }
}

pub struct MqttEventLoop {
    event_loop: EventLoop,
    options: MqttOptions,
    capacity: usize,
    link: SharedLink,
    subscription: String,
    inbound: mpsc::Sender<InboundMessage>,
}

/// Creates the client half and the event loop half of a broker connection.
///
/// Nothing touches the network until [`MqttEventLoop::run`] is polled.
pub fn connect(
    settings: &MqttSettings,
    subscription: String,
    inbound: mpsc::Sender<InboundMessage>,
) -> (MqttBus, MqttEventLoop) {
    let mut options = MqttOptions::new(settings.client_id(), settings.host.clone(), settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));

    let capacity = settings.request_capacity.max(1);
    let (client, event_loop) = AsyncClient::new(options.clone(), capacity);
    let link: SharedLink = Arc::new(Mutex::new(Link::new(client)));

    info!(
        "MQTT client {} configured for {}:{}",
        settings.client_id(),
        settings.host,
        settings.port
    );

    let bus = MqttBus { link: link.clone() };
    let event_loop = MqttEventLoop {
        event_loop,
        options,
        capacity,
        link,
        subscription,
        inbound,
    };
    (bus, event_loop)
}

impl Bus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError> {
        let confirmed = lock_link(&self.link).enqueue(topic, payload, retain)?;
        debug!("Queued publish on {} (retain: {})", topic, retain);
        confirmed.await.map_err(|_| BusError::Disconnected)
    }

    async fn subscribe(&self, filter: &str) -> Result<(), BusError> {
        debug!("Subscribing to {}", filter);
        let client = lock_link(&self.link).client.clone();
        client
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| BusError::Client(e.to_string()))
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), BusError> {
        debug!("Unsubscribing from {}", filter);
        let client = lock_link(&self.link).client.clone();
        client
            .unsubscribe(filter)
            .await
            .map_err(|e| BusError::Client(e.to_string()))
    }
}

impl MqttEventLoop {
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting MQTT event loop");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to broker, subscribing to {}", self.subscription);
                    let mut link = lock_link(&self.link);
                    link.connected = true;
                    if let Err(e) = link
                        .client
                        .try_subscribe(self.subscription.as_str(), QoS::AtMostOnce)
                    {
                        error!("Failed to subscribe to {}: {}", self.subscription, e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!("Received {} ({} bytes)", publish.topic, publish.payload.len());
                    let message =
                        InboundMessage::new(publish.topic, publish.payload.to_vec(), publish.retain);
                    if self.inbound.send(message).await.is_err() {
                        warn!("Inbound channel closed, stopping MQTT event loop");
                        break;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Publish(_))) => lock_link(&self.link).confirm_oldest(),
                Ok(other) => trace!("MQTT event: {:?}", other),
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    self.reset();
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                    }
                }
            }
        }
        let failed = lock_link(&self.link).go_offline();
        if failed > 0 {
            warn!("Failed {} unconfirmed publishes on shutdown", failed);
        }
        info!("MQTT event loop stopped");
    }

    /// Swaps in a fresh client. Requests still queued in the old one belong
    /// to publishes that were just failed, they are dropped with it.
    fn reset(&mut self) {
        let (client, event_loop) = AsyncClient::new(self.options.clone(), self.capacity);
        let failed = {
            let mut link = lock_link(&self.link);
            link.client = client;
            link.go_offline()
        };
        self.event_loop = event_loop;
        if failed > 0 {
            warn!("Failed {} unconfirmed publishes", failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot::error::TryRecvError;
    use tokio::time::{timeout, Instant};

    const CTRL: &str = "homething/abc123/device/ctrl";

    fn offline_link(capacity: usize) -> (Link, EventLoop) {
        let (client, event_loop) =
            AsyncClient::new(MqttOptions::new("htbridge-test", "localhost", 1883), capacity);
        (Link::new(client), event_loop)
    }

    fn settings(port: u16) -> MqttSettings {
        MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            ..MqttSettings::default()
        }
    }

    fn contains(packet: &[u8], needle: &[u8]) -> bool {
        packet.windows(needle.len()).any(|window| window == needle)
    }

    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
        let mut header = [0u8; 1];
        stream.read_exact(&mut header).await?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte).await?;
            remaining |= ((byte[0] & 0x7f) as usize) << shift;
            if byte[0] & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut packet = vec![header[0]; remaining + 1];
        stream.read_exact(&mut packet[1..]).await?;
        Ok(packet)
    }

    /// Accepts one client and answers its CONNECT with a CONNACK.
    async fn accept_client(listener: &TcpListener) -> TcpStream {
        let (mut stream, _) = listener.accept().await.unwrap();
        let connect = read_packet(&mut stream).await.unwrap();
        assert_eq!(connect[0] >> 4, 1);
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        stream
    }

    /// PUBLISH packets read from the client during `window`.
    async fn collect_publishes(stream: &mut TcpStream, window: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + window;
        let mut publishes = Vec::new();
        while let Ok(Ok(packet)) = tokio::time::timeout_at(deadline, read_packet(stream)).await {
            if packet[0] >> 4 == 3 {
                publishes.push(packet);
            }
        }
        publishes
    }

    async fn wait_connected(bus: &MqttBus) {
        timeout(Duration::from_secs(5), async {
            while !bus.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_waiters_resolve_in_request_order() {
        let (mut link, _event_loop) = offline_link(10);
        link.connected = true;

        let mut first = link.enqueue(CTRL, b"restart".to_vec(), false).unwrap();
        let mut second = link.enqueue(CTRL, b"update 2.0".to_vec(), false).unwrap();
        link.confirm_oldest();

        assert_eq!(first.try_recv(), Ok(()));
        assert_eq!(second.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_publish_refused_while_offline() {
        let (mut link, _event_loop) = offline_link(10);

        let result = link.enqueue(CTRL, b"restart".to_vec(), false);
        assert!(matches!(result, Err(BusError::Disconnected)));
        assert!(link.waiters.is_empty());
    }

    #[test]
    fn test_full_queue_registers_no_waiter() {
        let (mut link, _event_loop) = offline_link(1);
        link.connected = true;

        link.enqueue(CTRL, b"restart".to_vec(), false).unwrap();
        let result = link.enqueue(CTRL, b"restart".to_vec(), false);
        assert!(matches!(result, Err(BusError::Client(_))));
        assert_eq!(link.waiters.len(), 1);
    }

    #[test]
    fn test_going_offline_fails_outstanding_waiters() {
        let (mut link, _event_loop) = offline_link(10);
        link.connected = true;
        let mut pending = link.enqueue(CTRL, b"restart".to_vec(), false).unwrap();

        assert_eq!(link.go_offline(), 1);
        assert_eq!(pending.try_recv(), Err(TryRecvError::Closed));
        assert!(matches!(
            link.enqueue(CTRL, b"restart".to_vec(), false),
            Err(BusError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_publish_confirmed_once_written() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let (bus, event_loop) = connect(&settings(port), "homething/#".to_string(), inbound_tx);
        let token = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(token.clone()));

        let mut stream = timeout(Duration::from_secs(5), accept_client(&listener))
            .await
            .unwrap();
        wait_connected(&bus).await;

        timeout(Duration::from_secs(5), bus.publish(CTRL, b"restart".to_vec(), false))
            .await
            .unwrap()
            .unwrap();

        let publishes = collect_publishes(&mut stream, Duration::from_millis(300)).await;
        assert_eq!(publishes.len(), 1);
        assert!(contains(&publishes[0], CTRL.as_bytes()));
        assert!(contains(&publishes[0], b"restart"));

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_publish_is_not_sent_after_reconnect() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let (bus, event_loop) = connect(&settings(port), "homething/#".to_string(), inbound_tx);
        let token = CancellationToken::new();
        let task = tokio::spawn(event_loop.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let result = bus.publish(CTRL, b"restart".to_vec(), false).await;
        assert!(matches!(result, Err(BusError::Disconnected)));

        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let mut stream = timeout(Duration::from_secs(5), accept_client(&listener))
            .await
            .unwrap();
        wait_connected(&bus).await;

        let publishes = collect_publishes(&mut stream, Duration::from_millis(500)).await;
        assert!(publishes.is_empty());

        timeout(Duration::from_secs(5), bus.publish(CTRL, b"update 2.0".to_vec(), false))
            .await
            .unwrap()
            .unwrap();
        let publishes = collect_publishes(&mut stream, Duration::from_millis(300)).await;
        assert_eq!(publishes.len(), 1);
        assert!(contains(&publishes[0], b"update 2.0"));

        token.cancel();
        task.await.unwrap();
    }
}
