use crate::{
    node::LocalNode,
    wire::{KoordeCodec, Message, WireError},
};
use futures::{SinkExt as _, StreamExt as _, stream::SplitSink};
use spawned_concurrency::{
    messages::Unused,
    tasks::{CastResponse, GenServer, GenServerHandle, InitResult, spawn_listener},
};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, info, trace, warn};

/// Accept loop for inbound peer connections. Each accepted socket gets its
/// own [`PeerConnectionServer`] bound to a child of `cancel`, so shutdown
/// also aborts in-flight request handlers; the loop exits when `cancel`
/// fires.
pub fn serve(node: LocalNode, listener: TcpListener, cancel: CancellationToken) {
    info!(addr = %node.node().addr, "Starting node server");
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Node server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        PeerConnectionServer::spawn(
                            node.clone(),
                            stream,
                            peer_addr,
                            cancel.child_token(),
                        );
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to accept peer connection");
                    }
                }
            }
        }
    });
}

#[derive(Clone, Debug)]
pub enum CastMessage {
    /// A frame arrived from the remote peer.
    Incoming(Message),
    /// A handler finished and its response is ready to send.
    Outgoing(Message),
}

/// Server half of one inbound peer connection. Requests are dispatched to
/// the facade on their own tasks so a multi-hop lookup does not stall the
/// connection's message loop.
#[derive(Debug)]
pub struct PeerConnectionServer {
    node: LocalNode,
    peer_addr: SocketAddr,
    stream: Option<TcpStream>,
    sink: Option<SplitSink<Framed<TcpStream, KoordeCodec>, Message>>,
    cancel: CancellationToken,
}

impl PeerConnectionServer {
    pub fn spawn(
        node: LocalNode,
        stream: TcpStream,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) {
        let server = PeerConnectionServer {
            node,
            peer_addr,
            stream: Some(stream),
            sink: None,
            cancel,
        };
        server.start();
    }
}

impl GenServer for PeerConnectionServer {
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
        let framed = Framed::new(stream, KoordeCodec::new(self.node.space().clone()));
        let (sink, reader) = framed.split();
        self.sink = Some(sink);

        trace!(peer = %self.peer_addr, "Peer connected");
        spawn_listener(
            handle.clone(),
            reader.filter_map(|result| async move {
                match result {
                    Ok(message) => Some(CastMessage::Incoming(message)),
                    Err(err) => {
                        debug!(error = %err, "Error decoding peer frame");
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
        handle: &GenServerHandle<Self>,
    ) -> CastResponse {
        match message {
            CastMessage::Incoming(request) => {
                trace!(peer = %self.peer_addr, %request, "Received peer request");
                if request.is_response() {
                    trace!(peer = %self.peer_addr, "Ignoring response frame on server connection");
                    return CastResponse::NoReply;
                }
                let node = self.node.clone();
                let mut handle = handle.clone();
                let cancel = self.cancel.child_token();
                tokio::spawn(async move {
                    let response = node.handle_request(request, cancel).await;
                    let _ = handle.cast(CastMessage::Outgoing(response)).await;
                });
                CastResponse::NoReply
            }
            CastMessage::Outgoing(response) => {
                let Some(sink) = self.sink.as_mut() else {
                    return CastResponse::Stop;
                };
                if let Err(err) = sink.send(response).await {
                    debug!(peer = %self.peer_addr, error = %err, "Failed to send response, closing");
                    return CastResponse::Stop;
                }
                CastResponse::NoReply
            }
        }
    }
}
