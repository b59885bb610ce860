//! Publishing readings to an MQTT broker.

use std::time::Duration;

use anyhow::anyhow;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A sink for telemetry messages
#[allow(async_fn_in_trait)]
pub trait Publish {
    /// Publish one message. Delivery is best effort: this never waits on the network and
    /// failures are not reported to the caller.
    async fn publish(&mut self, topic: &str, payload: &str);
}

/// An MQTT session with the broker.
///
/// The network side of the session is driven by a background task that lives as long as the
/// publisher.
pub struct MqttPublisher {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    const CLIENT_ID: &'static str = "accucell";
    const KEEP_ALIVE: Duration = Duration::from_secs(60);
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    const REQUEST_CAPACITY: usize = 16;
    // Pause between reconnect attempts once the session is up
    const RECONNECT_DELAY: Duration = Duration::from_secs(1);
    const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

    /// Connect to the broker, waiting for it to accept the session.
    pub async fn connect(host: &str, port: u16) -> anyhow::Result<Self> {
        let mut options = MqttOptions::new(Self::CLIENT_ID, host, port);
        options
            .set_keep_alive(Self::KEEP_ALIVE)
            .set_clean_session(true);

        let (client, mut event_loop) = AsyncClient::new(options, Self::REQUEST_CAPACITY);

        timeout(Self::CONNECT_TIMEOUT, Self::wait_connected(&mut event_loop))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {host}:{port}"))??;

        info!(%host, port, "Connected to MQTT broker");

        let event_loop = tokio::spawn(Self::drive(event_loop));

        Ok(Self { client, event_loop })
    }

    async fn wait_connected(event_loop: &mut EventLoop) -> anyhow::Result<()> {
        loop {
            match event_loop.poll().await? {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(());
                    }
                    return Err(anyhow!("Broker refused connection: {:?}", ack.code));
                }
                event => debug!("MQTT: {event:?}"),
            }
        }
    }

    /// Keep the session alive and flush outgoing publishes until the client disconnects
    async fn drive(mut event_loop: EventLoop) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                    debug!("MQTT: disconnected");
                    return;
                }
                Ok(event) => debug!("MQTT: {event:?}"),
                Err(err) => {
                    warn!("MQTT: connection error: {err}");
                    tokio::time::sleep(Self::RECONNECT_DELAY).await;
                }
            }
        }
    }

    /// Disconnect from the broker and stop the background task
    pub async fn stop(self) {
        let Self {
            client,
            mut event_loop,
        } = self;

        if let Err(err) = client.try_disconnect() {
            warn!("MQTT: failed to request disconnect: {err}");
        }

        if timeout(Self::SHUTDOWN_TIMEOUT, &mut event_loop).await.is_err() {
            event_loop.abort();
        }
    }
}

impl Publish for MqttPublisher {
    async fn publish(&mut self, topic: &str, payload: &str) {
        // The request queue only drains while connected, so a full queue drops the message
        if let Err(err) =
            self.client
                .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
        {
            warn!(%topic, "MQTT: dropped message: {err}");
        }
    }
}

#[tokio::test]
async fn test_publish_does_not_block_after_broker_disconnects() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Accept one session, acknowledge it, then hang up
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut connect = [0u8; 256];
        let _ = socket.read(&mut connect).await.unwrap();
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        drop(socket);
        // Keep the listener open so reconnects hang waiting for a CONNACK
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(listener);
    });

    let mut publisher = MqttPublisher::connect("127.0.0.1", port).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    for i in 0..MqttPublisher::REQUEST_CAPACITY * 4 {
        timeout(Duration::from_secs(1), publisher.publish("/accucell/status", "Stopped"))
            .await
            .unwrap_or_else(|_| panic!("publish #{i} blocked"));
    }

    timeout(Duration::from_secs(5), publisher.stop())
        .await
        .expect("stop blocked");
    broker.abort();
}
