use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::{Directory, DirectoryError, Instance};
use crate::messages::{Envelope, InstanceId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames a player sends to the hub.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HubRequest {
    Register { service: String, version: String },
    Presence { request_id: u64, service: String },
    Send { message: Envelope },
    Broadcast { message: Envelope },
    Deregister,
}

/// Frames the hub sends to a player.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HubEvent {
    Registered { instance_id: InstanceId },
    Presence { request_id: u64, instances: Vec<Instance> },
    Message { message: Envelope },
    Error {
        #[serde(default)]
        request_id: Option<u64>,
        reason: String,
    },
}

type Reply<T> = oneshot::Sender<Result<T, String>>;

#[derive(Default)]
struct Pending {
    registration: Option<Reply<InstanceId>>,
    presence: HashMap<u64, Reply<Vec<Instance>>>,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Client of a remote hub reached over a websocket.
pub struct WsDirectory {
    sink: SplitSink<WsStream, WsMessage>,
    inbound: mpsc::UnboundedReceiver<Envelope>,
    pending: Arc<Mutex<Pending>>,
    reader: JoinHandle<()>,
    request_timeout: Duration,
    request_ctr: u64,
    instance_id: Option<InstanceId>,
}

impl WsDirectory {
    pub async fn connect(url: &str, request_timeout: Duration)
        -> Result<Self, DirectoryError>
    {
        let (ws_stream, _response) = connect_async(url).await?;
        info!(url, "connected to hub");

        let (sink, stream) = ws_stream.split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(Pending::default()));
        let reader = tokio::spawn(read_frames(stream, pending.clone(), tx));

        Ok(WsDirectory {
            sink,
            inbound,
            pending,
            reader,
            request_timeout,
            request_ctr: 0,
            instance_id: None,
        })
    }

    async fn emit(&mut self, request: &HubRequest) -> Result<(), DirectoryError> {
        let frame = serde_json::to_string(request)?;
        self.sink.send(WsMessage::Text(frame)).await?;
        Ok(())
    }

    async fn reply<T>(&self, rx: oneshot::Receiver<Result<T, String>>)
        -> Result<T, DirectoryError>
    {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Err(_elapsed) => Err(DirectoryError::Timeout(self.request_timeout)),
            // the reader dropped every waiter when the connection ended
            Ok(Err(_canceled)) => Err(DirectoryError::Closed),
            Ok(Ok(Err(reason))) => Err(DirectoryError::Rejected(reason)),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

impl Drop for WsDirectory {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Directory for WsDirectory {
    async fn register(&mut self, service: &str, version: &str)
        -> Result<InstanceId, DirectoryError>
    {
        if let Some(id) = &self.instance_id {
            return Err(DirectoryError::AlreadyRegistered(id.clone()));
        }

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).registration = Some(tx);
        self.emit(&HubRequest::Register {
            service: service.to_string(),
            version: version.to_string(),
        }).await?;

        let id = self.reply(rx).await?;
        info!(%id, service, version, "registered with hub");
        self.instance_id = Some(id.clone());
        Ok(id)
    }

    fn instance_id(&self) -> Option<&InstanceId> {
        self.instance_id.as_ref()
    }

    async fn presence(&mut self, service: &str)
        -> Result<Vec<Instance>, DirectoryError>
    {
        let request_id = self.request_ctr;
        self.request_ctr += 1;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).presence.insert(request_id, tx);
        self.emit(&HubRequest::Presence {
            request_id,
            service: service.to_string(),
        }).await?;

        let result = self.reply(rx).await;
        if result.is_err() {
            lock(&self.pending).presence.remove(&request_id);
        }
        result
    }

    async fn send(&mut self, message: Envelope) -> Result<(), DirectoryError> {
        if self.instance_id.is_none() {
            return Err(DirectoryError::NotRegistered);
        }
        if message.to.instance_id().is_none() {
            return Err(DirectoryError::NotAnInstance(message.to));
        }
        trace!(mid = %message.mid, to = %message.to, "hub send");
        self.emit(&HubRequest::Send { message }).await
    }

    async fn broadcast(&mut self, message: Envelope) -> Result<(), DirectoryError> {
        if self.instance_id.is_none() {
            return Err(DirectoryError::NotRegistered);
        }
        trace!(mid = %message.mid, to = %message.to, "hub broadcast");
        self.emit(&HubRequest::Broadcast { message }).await
    }

    async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }

    async fn shutdown(&mut self) -> Result<(), DirectoryError> {
        if let Some(id) = self.instance_id.take() {
            self.emit(&HubRequest::Deregister).await?;
            debug!(%id, "deregistered from hub");
        }
        if let Err(err) = self.sink.close().await {
            // the hub may hang up first once we deregister
            debug!(%err, "closing hub connection");
        }
        Ok(())
    }
}

async fn read_frames(
    mut stream: SplitStream<WsStream>,
    pending: Arc<Mutex<Pending>>,
    inbound: mpsc::UnboundedSender<Envelope>)
{
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "hub connection failed");
                break;
            }
        };
        let event = match frame {
            WsMessage::Text(text) => serde_json::from_str::<HubEvent>(&text),
            WsMessage::Binary(data) => serde_json::from_slice::<HubEvent>(&data),
            WsMessage::Close(_) => break,
            _ => continue,
        };
        match event {
            Ok(event) => dispatch(event, &pending, &inbound),
            Err(err) => warn!(%err, "ignoring malformed hub frame"),
        }
    }

    debug!("hub connection closed");
    // dropping the waiters fails their requests with `Closed`
    *lock(&pending) = Pending::default();
}

fn dispatch(
    event: HubEvent,
    pending: &Mutex<Pending>,
    inbound: &mpsc::UnboundedSender<Envelope>)
{
    let mut pending = lock(pending);
    match event {
        HubEvent::Message { message } => {
            // the player may already have finished
            let _ = inbound.send(message);
        }
        HubEvent::Registered { instance_id } => {
            match pending.registration.take() {
                Some(tx) => { let _ = tx.send(Ok(instance_id)); }
                None => warn!(%instance_id, "unsolicited registration reply"),
            }
        }
        HubEvent::Presence { request_id, instances } => {
            match pending.presence.remove(&request_id) {
                Some(tx) => { let _ = tx.send(Ok(instances)); }
                None => debug!(request_id, "late presence reply"),
            }
        }
        HubEvent::Error { request_id, reason } => {
            let waiter = match request_id {
                Some(id) => pending.presence.remove(&id)
                    .map(|tx| tx.send(Err(reason.clone())).is_ok()),
                None => pending.registration.take()
                    .map(|tx| tx.send(Err(reason.clone())).is_ok()),
            };
            if waiter.is_none() {
                warn!(?request_id, %reason, "hub reported an error");
            }
        }
    }
}
