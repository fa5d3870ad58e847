use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use rumqttc::mqttbytes::v4;
use rumqttc::mqttbytes::v4::ConnAck;
use rumqttc::mqttbytes::v4::ConnectReturnCode;
use rumqttc::mqttbytes::v4::Packet;
use rumqttc::mqttbytes::v4::PingResp;
use rumqttc::mqttbytes::v4::PubAck;
use rumqttc::mqttbytes::v4::PubComp;
use rumqttc::mqttbytes::v4::PubRec;
use rumqttc::mqttbytes::v4::Publish;
use rumqttc::mqttbytes::v4::SubAck;
use rumqttc::mqttbytes::v4::SubscribeReasonCode;
use rumqttc::mqttbytes::v4::UnsubAck;
use rumqttc::mqttbytes::Protocol;
use rumqttc::mqttbytes::QoS;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::BrokerMessage;
use super::client::TransportError;
use super::embedded::EmbeddedBroker;
use super::topic::is_valid_filter;

/// Largest packet accepted from a network client
const MAX_PACKET_SIZE: usize = 2 * 1024 * 1024;

/// How long a new connection may take to send CONNECT
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed packet: {0}")]
    Protocol(#[from] rumqttc::mqttbytes::Error),

    #[error("Expected CONNECT as first packet")]
    NotConnect,

    #[error("Unsupported protocol version")]
    UnsupportedProtocol,

    #[error("No CONNECT within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Keep-alive expired")]
    KeepAlive,
}

/// MQTT 3.1.1 front end of an [`EmbeddedBroker`]
///
/// Network clients (the zigbee bridge, dashboards, debugging tools) share the
/// bus with the hub's inline client. Deliveries to network clients are QoS 0.
pub struct MqttListener {
    broker: EmbeddedBroker,
    listener: TcpListener,
}

impl MqttListener {
    pub async fn bind(broker: EmbeddedBroker, addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Listen(format!("{}: {}", addr, e)))?;
        Ok(Self { broker, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is aborted
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Embedded broker listening on {}", addr),
            Err(e) => warn!("Embedded broker listening on unknown address: {}", e),
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept broker connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let broker = self.broker.clone();
            tokio::spawn(async move {
                match serve_connection(broker, stream).await {
                    Ok(()) => debug!("Broker connection from {} closed", peer),
                    Err(e) => warn!("Broker connection from {} dropped: {}", peer, e),
                }
            });
        }
    }
}

/// Socket halves of one network client plus their packet buffers
struct Connection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    inbound: BytesMut,
    outbound: BytesMut,
}

async fn serve_connection(
    broker: EmbeddedBroker,
    stream: TcpStream,
) -> Result<(), ConnectionError> {
    let (reader, writer) = stream.into_split();
    let mut conn = Connection {
        reader,
        writer,
        inbound: BytesMut::with_capacity(4096),
        outbound: BytesMut::with_capacity(4096),
    };

    let first = tokio::time::timeout(
        CONNECT_TIMEOUT,
        read_packet(&mut conn.reader, &mut conn.inbound),
    )
    .await;
    let connect = match first {
        Err(_) => return Err(ConnectionError::ConnectTimeout(CONNECT_TIMEOUT)),
        Ok(Ok(None)) => return Ok(()),
        Ok(Ok(Some(Packet::Connect(connect)))) => connect,
        Ok(Ok(Some(_))) => return Err(ConnectionError::NotConnect),
        Ok(Err(e)) => return Err(e),
    };

    if connect.protocol != Protocol::V4 {
        ConnAck::new(ConnectReturnCode::RefusedProtocolVersion, false)
            .write(&mut conn.outbound)?;
        flush(&mut conn.writer, &mut conn.outbound).await?;
        return Err(ConnectionError::UnsupportedProtocol);
    }

    // Grace of half the interval on top of what the client asked for
    let keep_alive = match connect.keep_alive {
        0 => None,
        secs => Some(Duration::from_secs(u64::from(secs)) * 3 / 2),
    };

    let (session, deliveries) = broker.attach(&connect.client_id);
    let result = run_session(
        &broker,
        session,
        &connect.client_id,
        keep_alive,
        conn,
        deliveries,
    )
    .await;
    broker.detach(session);
    info!("Client {} left the embedded broker", connect.client_id);
    result
}

async fn run_session(
    broker: &EmbeddedBroker,
    session: u64,
    client_id: &str,
    keep_alive: Option<Duration>,
    mut conn: Connection,
    mut deliveries: mpsc::UnboundedReceiver<BrokerMessage>,
) -> Result<(), ConnectionError> {
    ConnAck::new(ConnectReturnCode::Success, false).write(&mut conn.outbound)?;
    flush(&mut conn.writer, &mut conn.outbound).await?;

    let mut deadline = keep_alive.map(|k| Instant::now() + k);
    loop {
        tokio::select! {
            packet = read_packet(&mut conn.reader, &mut conn.inbound) => {
                let Some(packet) = packet? else {
                    return Ok(());
                };
                deadline = keep_alive.map(|k| Instant::now() + k);
                match packet {
                    Packet::Disconnect => return Ok(()),
                    Packet::Connect(_) => return Err(ConnectionError::NotConnect),
                    Packet::Publish(publish) => {
                        broker.publish(&publish.topic, &publish.payload, publish.retain);
                        match publish.qos {
                            QoS::AtMostOnce => {}
                            QoS::AtLeastOnce => {
                                PubAck::new(publish.pkid).write(&mut conn.outbound)?;
                            }
                            QoS::ExactlyOnce => {
                                PubRec::new(publish.pkid).write(&mut conn.outbound)?;
                            }
                        }
                    }
                    Packet::PubRel(rel) => {
                        PubComp::new(rel.pkid).write(&mut conn.outbound)?;
                    }
                    Packet::Subscribe(subscribe) => {
                        let mut codes = Vec::with_capacity(subscribe.filters.len());
                        for filter in &subscribe.filters {
                            let accepted = is_valid_filter(&filter.path)
                                && broker.add_filter(session, &filter.path).is_ok();
                            if accepted {
                                codes.push(SubscribeReasonCode::Success(QoS::AtMostOnce));
                            } else {
                                warn!("{} asked for invalid filter {}", client_id, filter.path);
                                codes.push(SubscribeReasonCode::Failure);
                            }
                        }
                        SubAck::new(subscribe.pkid, codes).write(&mut conn.outbound)?;
                    }
                    Packet::Unsubscribe(unsubscribe) => {
                        for topic in &unsubscribe.topics {
                            broker.remove_filter(session, topic);
                        }
                        UnsubAck::new(unsubscribe.pkid).write(&mut conn.outbound)?;
                    }
                    Packet::PingReq => {
                        PingResp.write(&mut conn.outbound)?;
                    }
                    // Acks for QoS 0 deliveries never arrive; anything else is ignored
                    _ => {}
                }
                flush(&mut conn.writer, &mut conn.outbound).await?;
            }
            message = deliveries.recv() => {
                let Some(message) = message else {
                    return Ok(());
                };
                let mut publish = Publish::new(message.topic, QoS::AtMostOnce, message.payload);
                publish.retain = message.retain;
                publish.write(&mut conn.outbound)?;
                flush(&mut conn.writer, &mut conn.outbound).await?;
            }
            _ = sleep_until(deadline), if deadline.is_some() => {
                return Err(ConnectionError::KeepAlive);
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Read the next complete packet, or None on a clean EOF
async fn read_packet(
    reader: &mut OwnedReadHalf,
    buffer: &mut BytesMut,
) -> Result<Option<Packet>, ConnectionError> {
    loop {
        match v4::read(buffer, MAX_PACKET_SIZE) {
            Ok(packet) => return Ok(Some(packet)),
            Err(rumqttc::mqttbytes::Error::InsufficientBytes(_)) => {}
            Err(e) => return Err(e.into()),
        }

        if reader.read_buf(buffer).await? == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
    }
}

async fn flush(writer: &mut OwnedWriteHalf, buffer: &mut BytesMut) -> Result<(), ConnectionError> {
    if !buffer.is_empty() {
        writer.write_all(buffer).await?;
        buffer.clear();
    }
    Ok(())
}
