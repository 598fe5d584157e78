// OpenIGTLink TCP client
//
// `start` opens the socket and spawns a reader task; the task decodes TDATA messages
// and pushes `StreamAnnounced` / `PoseUpdated` events onto the bridge queue. When the
// task ends (stop, EOF or error) it emits `StreamRemoved` for every stream it
// announced, followed by `ConnectionLost` unless the stop was requested.

use super::codec::{decode_body, encode_query, Header, Message, HEADER_SIZE};
use crate::bridge::EventSender;
use crate::device::{ControlQuery, DeviceLink};
use crate::error::{LocatorError, LocatorResult};
use crate::types::{BridgeEvent, Pose, StreamId};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io::ErrorKind as IoErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

struct Session {
    writer: OwnedWriteHalf,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

pub struct IgtlClient {
    host: String,
    port: u16,
    connect_timeout: Duration,
    events: EventSender,
    session: Option<Session>,
}

impl IgtlClient {
    pub fn new(events: EventSender) -> Self {
        Self {
            host: crate::config::DEFAULT_HOST.to_string(),
            port: crate::config::DEFAULT_PORT,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            events,
            session: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl DeviceLink for IgtlClient {
    fn set_client_target(&mut self, host: &str, port: u16) {
        self.host = host.to_string();
        self.port = port;
    }

    async fn start(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        // Reap a session whose reader already exited
        self.stop().await;

        let addr = self.address();
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                log::debug!("TCP connection to {} failed: {}", addr, e);
                return false;
            }
            Err(_) => {
                log::debug!("TCP connection to {} timed out", addr);
                return false;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Could not disable Nagle on {}: {}", addr, e);
        }

        let (reader, writer) = stream.into_split();
        let cancel = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(read_loop(
            reader,
            self.events.clone(),
            cancel.clone(),
            Arc::clone(&alive),
        ));

        log::info!("OpenIGTLink client connected to {}", addr);
        self.session = Some(Session {
            writer,
            cancel,
            alive,
            reader: handle,
        });
        true
    }

    async fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.cancel.cancel();
        if let Err(e) = session.writer.shutdown().await {
            log::debug!("Socket shutdown: {}", e);
        }
        if let Err(e) = session.reader.await {
            log::error!("Reader task join error: {}", e);
        }
        log::info!("OpenIGTLink client stopped");
    }

    async fn send_control_query(&mut self, query: &ControlQuery) -> LocatorResult<()> {
        let session = self
            .session
            .as_mut()
            .filter(|s| s.alive.load(Ordering::Relaxed))
            .ok_or(LocatorError::NotConnected)?;
        let frame = encode_query(query);
        session.writer.write_all(&frame).await?;
        log::debug!("Sent {:?} query for {}", query.kind, query.name);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.alive.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

impl Drop for IgtlClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }
}

/// Read one framed message. `Ok(None)` means the peer closed between messages.
async fn read_frame(reader: &mut OwnedReadHalf) -> LocatorResult<Option<(Header, Vec<u8>)>> {
    let mut buf = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = Header::decode(&buf)?;

    let mut body = vec![0u8; header.body_size as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some((header, body)))
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    events: EventSender,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
) {
    let mut announced: BTreeSet<StreamId> = BTreeSet::new();

    let lost = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                log::debug!("OpenIGTLink reader cancelled");
                break false;
            }

            frame = read_frame(&mut reader) => match frame {
                Ok(Some((header, body))) => {
                    if !dispatch(&header, &body, &events, &mut announced) {
                        log::debug!("Event queue closed, reader exiting");
                        break false;
                    }
                }
                Ok(None) => {
                    log::info!("OpenIGTLink connection closed by server");
                    break true;
                }
                Err(e) => {
                    log::error!("OpenIGTLink read error: {}", e);
                    break true;
                }
            }
        }
    };

    alive.store(false, Ordering::Relaxed);
    for stream in announced {
        let _ = events.send(BridgeEvent::StreamRemoved(stream));
    }
    if lost {
        let _ = events.send(BridgeEvent::ConnectionLost);
    }
}

/// Turn one message into events. Returns false once the queue is gone.
fn dispatch(
    header: &Header,
    body: &[u8],
    events: &EventSender,
    announced: &mut BTreeSet<StreamId>,
) -> bool {
    let elements = match decode_body(header, body) {
        Ok(Message::TrackingData(elements)) => elements,
        Ok(Message::Other(type_name)) => {
            log::trace!("Skipping {} message", type_name);
            return true;
        }
        Ok(other) => {
            log::trace!("Ignoring {:?}", other);
            return true;
        }
        Err(e) => {
            log::warn!("Dropping message: {}", e);
            return true;
        }
    };

    for element in elements {
        let stream = StreamId::new(element.name);
        if announced.insert(stream.clone())
            && events.send(BridgeEvent::StreamAnnounced(stream.clone())).is_err()
        {
            return false;
        }
        let pose = Pose::from_igtl_matrix(&element.matrix, element.instrument);
        if events.send(BridgeEvent::PoseUpdated { stream, pose }).is_err() {
            return false;
        }
    }
    true
}
