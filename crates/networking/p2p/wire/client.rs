use crate::wire::{KoordeCodec, Message, WireError};
use futures::{SinkExt as _, StreamExt as _, stream::SplitSink};
use koorde_common::Space;
use spawned_concurrency::{
    messages::Unused,
    tasks::{CastResponse, GenServer, GenServerHandle, InitResult, spawn_listener},
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    net::TcpStream,
    sync::oneshot,
};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, trace};

/// Handle to an outgoing peer connection. Cheap to clone; all clones share
/// the underlying connection task.
#[derive(Debug, Clone)]
pub struct PeerClient {
    addr: String,
    handle: GenServerHandle<PeerClientServer>,
}

impl PeerClient {
    /// Dials `addr` and spawns the connection task.
    pub async fn connect(addr: &str, space: Space) -> Result<PeerClient, WireError> {
        let stream = TcpStream::connect(addr).await?;
        let server = PeerClientServer {
            stream: Some(stream),
            space,
            sink: None,
            current_requests: HashMap::new(),
        };
        Ok(PeerClient {
            addr: addr.to_string(),
            handle: server.start(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends a request and waits for the matching response, the timeout or
    /// the cancellation signal, whichever comes first. The wait blocks the
    /// calling task, not the connection task.
    pub async fn request(
        &mut self,
        message: Message,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message, WireError> {
        let id = message.request_id();
        let (response_tx, response_rx) = oneshot::channel::<Message>();

        self.handle
            .cast(CastMessage::OutgoingRequest(message, Arc::new(response_tx)))
            .await
            .map_err(|err| WireError::Internal(err.to_string()))?;

        tokio::select! {
            _ = cancel.cancelled() => {
                self.abandon(id).await?;
                Err(WireError::Canceled)
            }
            outcome = tokio::time::timeout(timeout, response_rx) => match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(WireError::ConnectionClosed(err.to_string())),
                Err(_elapsed) => {
                    self.abandon(id).await?;
                    Err(WireError::Timeout)
                }
            }
        }
    }

    /// Drops the pending slot for `id` so a late response is ignored.
    async fn abandon(&mut self, id: u64) -> Result<(), WireError> {
        self.handle
            .cast(CastMessage::RequestTimeout { id })
            .await
            .map_err(|err| WireError::Internal(err.to_string()))
    }

    /// Closes the connection. Idempotent and best-effort.
    pub async fn close(&mut self) {
        let _ = self.handle.cast(CastMessage::Close).await;
    }
}

#[derive(Clone, Debug)]
pub enum CastMessage {
    /// A frame arrived from the remote peer.
    Incoming(Message),
    /// Send a request and route its response to the waiting caller.
    OutgoingRequest(Message, Arc<oneshot::Sender<Message>>),
    /// The caller gave up on a request id.
    RequestTimeout { id: u64 },
    Close,
}

#[derive(Debug)]
pub struct PeerClientServer {
    stream: Option<TcpStream>,
    space: Space,
    sink: Option<SplitSink<Framed<TcpStream, KoordeCodec>, Message>>,
    current_requests: HashMap<u64, oneshot::Sender<Message>>,
}

impl PeerClientServer {
    async fn send(&mut self, message: Message) -> Result<(), WireError> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| WireError::ConnectionClosed("connection not established".to_string()))?;
        sink.send(message).await
    }
}

impl GenServer for PeerClientServer {
    type CallMsg = Unused;
    type CastMsg = CastMessage;
    type OutMsg = Unused;
    type Error = WireError;

    async fn init(
        mut self,
        handle: &GenServerHandle<Self>,
    ) -> Result<InitResult<Self>, Self::Error> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| WireError::Internal("missing tcp stream".to_string()))?;
        let framed = Framed::new(stream, KoordeCodec::new(self.space.clone()));
        let (sink, reader) = framed.split();
        self.sink = Some(sink);

        spawn_listener(
            handle.clone(),
            reader.filter_map(|result| async move {
                match result {
                    Ok(message) => Some(CastMessage::Incoming(message)),
                    Err(err) => {
                        debug!(error = %err, "Error reading peer response");
                        None
                    }
                }
            }),
        );

        Ok(InitResult::Success(self))
    }

    async fn handle_cast(
        &mut self,
        message: Self::CastMsg,
        _handle: &GenServerHandle<Self>,
    ) -> CastResponse {
        match message {
            CastMessage::Incoming(response) => {
                let id = response.request_id();
                if let Some(sender) = self.current_requests.remove(&id) {
                    // Receiver may be gone if the caller timed out racing us.
                    let _ = sender.send(response);
                } else {
                    trace!(%response, %id, "Dropping unsolicited message");
                }
                CastResponse::NoReply
            }
            CastMessage::OutgoingRequest(request, sender) => {
                let id = request.request_id();
                let Some(sender) = Arc::into_inner(sender) else {
                    return CastResponse::NoReply;
                };
                self.current_requests.insert(id, sender);
                if let Err(err) = self.send(request).await {
                    debug!(error = %err, "Failed to send request");
                    // Dropping the sender wakes the caller with a recv error.
                    self.current_requests.remove(&id);
                    return CastResponse::Stop;
                }
                CastResponse::NoReply
            }
            CastMessage::RequestTimeout { id } => {
                self.current_requests.remove(&id);
                CastResponse::NoReply
            }
            CastMessage::Close => {
                if let Some(mut sink) = self.sink.take() {
                    let _ = sink
                        .close()
                        .await
                        .inspect_err(|err| debug!("Could not close the socket: {err}"));
                }
                CastResponse::Stop
            }
        }
    }
}
