use crate::wire::codec::CodecError;
use bytes::{BufMut, BytesMut};
use koorde_common::{DhtError, Id, Node, Resource, Space};
use std::fmt::Display;

/// Per-message wire encoding. Every message starts with its `CODE` byte
/// followed by the request id, so responses correlate with in-flight
/// requests on the same connection.
pub trait WireMessage: Sized {
    const CODE: u8;

    fn encode(&self, buf: &mut BytesMut);

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError>;
}

/// Failure kind carried inside an [`ErrorResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireFault {
    InvalidArgument = 1,
    NotFound = 2,
    Timeout = 3,
    Canceled = 4,
    Unavailable = 5,
    Internal = 6,
}

impl WireFault {
    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(WireFault::InvalidArgument),
            2 => Ok(WireFault::NotFound),
            3 => Ok(WireFault::Timeout),
            4 => Ok(WireFault::Canceled),
            5 => Ok(WireFault::Unavailable),
            6 => Ok(WireFault::Internal),
            other => Err(CodecError::Malformed(format!("error kind {other}"))),
        }
    }

    pub fn into_error(self, message: String) -> DhtError {
        match self {
            WireFault::InvalidArgument => DhtError::InvalidArgument(message),
            WireFault::NotFound => DhtError::NotFound,
            WireFault::Timeout => DhtError::Timeout,
            WireFault::Canceled => DhtError::Canceled,
            WireFault::Unavailable => DhtError::Unavailable(message),
            WireFault::Internal => DhtError::Internal(message),
        }
    }
}

impl From<&DhtError> for WireFault {
    fn from(err: &DhtError) -> Self {
        match err {
            DhtError::InvalidArgument(_) => WireFault::InvalidArgument,
            DhtError::NotFound => WireFault::NotFound,
            DhtError::Timeout => WireFault::Timeout,
            DhtError::Canceled => WireFault::Canceled,
            DhtError::Unavailable(_) | DhtError::NotInPool(_) => WireFault::Unavailable,
            DhtError::Internal(_) => WireFault::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupMode {
    Initial,
    Step { current_i: Id, kshift: Id },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindSuccessor {
    pub id: u64,
    /// Remaining deadline budget in milliseconds, decremented hop by hop.
    pub ttl_ms: u32,
    pub target: Id,
    pub mode: LookupMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundSuccessor {
    pub id: u64,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPredecessor {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredecessorFound {
    pub id: u64,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSuccessorList {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessorListFound {
    pub id: u64,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notify {
    pub id: u64,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResources {
    pub id: u64,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieve {
    pub id: u64,
    pub key: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFound {
    pub id: u64,
    pub resource: Resource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remove {
    pub id: u64,
    pub key: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leave {
    pub id: u64,
    pub node: Node,
}

/// Empty success response for notify, store, remove and leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub id: u64,
    pub fault: WireFault,
    pub message: String,
}

impl ErrorResponse {
    pub fn from_error(id: u64, err: &DhtError) -> Self {
        Self {
            id,
            fault: WireFault::from(err),
            message: err.to_string(),
        }
    }

    pub fn into_error(self) -> DhtError {
        self.fault.into_error(self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    FindSuccessor(FindSuccessor),
    FoundSuccessor(FoundSuccessor),
    GetPredecessor(GetPredecessor),
    PredecessorFound(PredecessorFound),
    GetSuccessorList(GetSuccessorList),
    SuccessorListFound(SuccessorListFound),
    Notify(Notify),
    Ping(Ping),
    Pong(Pong),
    StoreResources(StoreResources),
    Retrieve(Retrieve),
    ResourceFound(ResourceFound),
    Remove(Remove),
    Leave(Leave),
    Ack(Ack),
    Error(ErrorResponse),
}

impl Message {
    pub const fn code(&self) -> u8 {
        match self {
            Message::FindSuccessor(_) => FindSuccessor::CODE,
            Message::FoundSuccessor(_) => FoundSuccessor::CODE,
            Message::GetPredecessor(_) => GetPredecessor::CODE,
            Message::PredecessorFound(_) => PredecessorFound::CODE,
            Message::GetSuccessorList(_) => GetSuccessorList::CODE,
            Message::SuccessorListFound(_) => SuccessorListFound::CODE,
            Message::Notify(_) => Notify::CODE,
            Message::Ping(_) => Ping::CODE,
            Message::Pong(_) => Pong::CODE,
            Message::StoreResources(_) => StoreResources::CODE,
            Message::Retrieve(_) => Retrieve::CODE,
            Message::ResourceFound(_) => ResourceFound::CODE,
            Message::Remove(_) => Remove::CODE,
            Message::Leave(_) => Leave::CODE,
            Message::Ack(_) => Ack::CODE,
            Message::Error(_) => ErrorResponse::CODE,
        }
    }

    pub const fn request_id(&self) -> u64 {
        match self {
            Message::FindSuccessor(m) => m.id,
            Message::FoundSuccessor(m) => m.id,
            Message::GetPredecessor(m) => m.id,
            Message::PredecessorFound(m) => m.id,
            Message::GetSuccessorList(m) => m.id,
            Message::SuccessorListFound(m) => m.id,
            Message::Notify(m) => m.id,
            Message::Ping(m) => m.id,
            Message::Pong(m) => m.id,
            Message::StoreResources(m) => m.id,
            Message::Retrieve(m) => m.id,
            Message::ResourceFound(m) => m.id,
            Message::Remove(m) => m.id,
            Message::Leave(m) => m.id,
            Message::Ack(m) => m.id,
            Message::Error(m) => m.id,
        }
    }

    /// True for messages that answer a request (everything a server sends).
    pub const fn is_response(&self) -> bool {
        matches!(
            self,
            Message::FoundSuccessor(_)
                | Message::PredecessorFound(_)
                | Message::SuccessorListFound(_)
                | Message::Pong(_)
                | Message::ResourceFound(_)
                | Message::Ack(_)
                | Message::Error(_)
        )
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.code());
        match self {
            Message::FindSuccessor(m) => m.encode(buf),
            Message::FoundSuccessor(m) => m.encode(buf),
            Message::GetPredecessor(m) => m.encode(buf),
            Message::PredecessorFound(m) => m.encode(buf),
            Message::GetSuccessorList(m) => m.encode(buf),
            Message::SuccessorListFound(m) => m.encode(buf),
            Message::Notify(m) => m.encode(buf),
            Message::Ping(m) => m.encode(buf),
            Message::Pong(m) => m.encode(buf),
            Message::StoreResources(m) => m.encode(buf),
            Message::Retrieve(m) => m.encode(buf),
            Message::ResourceFound(m) => m.encode(buf),
            Message::Remove(m) => m.encode(buf),
            Message::Leave(m) => m.encode(buf),
            Message::Ack(m) => m.encode(buf),
            Message::Error(m) => m.encode(buf),
        }
    }

    pub fn decode(frame: &[u8], space: &Space) -> Result<Message, CodecError> {
        let mut reader = Reader::new(frame);
        let code = reader.u8()?;
        let message = match code {
            FindSuccessor::CODE => Message::FindSuccessor(FindSuccessor::decode(&mut reader, space)?),
            FoundSuccessor::CODE => Message::FoundSuccessor(FoundSuccessor::decode(&mut reader, space)?),
            GetPredecessor::CODE => Message::GetPredecessor(GetPredecessor::decode(&mut reader, space)?),
            PredecessorFound::CODE => {
                Message::PredecessorFound(PredecessorFound::decode(&mut reader, space)?)
            }
            GetSuccessorList::CODE => {
                Message::GetSuccessorList(GetSuccessorList::decode(&mut reader, space)?)
            }
            SuccessorListFound::CODE => {
                Message::SuccessorListFound(SuccessorListFound::decode(&mut reader, space)?)
            }
            Notify::CODE => Message::Notify(Notify::decode(&mut reader, space)?),
            Ping::CODE => Message::Ping(Ping::decode(&mut reader, space)?),
            Pong::CODE => Message::Pong(Pong::decode(&mut reader, space)?),
            StoreResources::CODE => Message::StoreResources(StoreResources::decode(&mut reader, space)?),
            Retrieve::CODE => Message::Retrieve(Retrieve::decode(&mut reader, space)?),
            ResourceFound::CODE => Message::ResourceFound(ResourceFound::decode(&mut reader, space)?),
            Remove::CODE => Message::Remove(Remove::decode(&mut reader, space)?),
            Leave::CODE => Message::Leave(Leave::decode(&mut reader, space)?),
            Ack::CODE => Message::Ack(Ack::decode(&mut reader, space)?),
            ErrorResponse::CODE => Message::Error(ErrorResponse::decode(&mut reader, space)?),
            other => return Err(CodecError::UnknownCode(other)),
        };
        if !reader.is_empty() {
            return Err(CodecError::Malformed("trailing bytes".to_string()));
        }
        Ok(message)
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::FindSuccessor(m) => match m.mode {
                LookupMode::Initial => "FindSuccessor(initial)".fmt(f),
                LookupMode::Step { .. } => "FindSuccessor(step)".fmt(f),
            },
            Message::FoundSuccessor(_) => "FoundSuccessor".fmt(f),
            Message::GetPredecessor(_) => "GetPredecessor".fmt(f),
            Message::PredecessorFound(_) => "PredecessorFound".fmt(f),
            Message::GetSuccessorList(_) => "GetSuccessorList".fmt(f),
            Message::SuccessorListFound(_) => "SuccessorList".fmt(f),
            Message::Notify(_) => "Notify".fmt(f),
            Message::Ping(_) => "Ping".fmt(f),
            Message::Pong(_) => "Pong".fmt(f),
            Message::StoreResources(_) => "Store".fmt(f),
            Message::Retrieve(_) => "Retrieve".fmt(f),
            Message::ResourceFound(_) => "ResourceFound".fmt(f),
            Message::Remove(_) => "Remove".fmt(f),
            Message::Leave(_) => "Leave".fmt(f),
            Message::Ack(_) => "Ack".fmt(f),
            Message::Error(_) => "Error".fmt(f),
        }
    }
}

impl WireMessage for FindSuccessor {
    const CODE: u8 = 0x01;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        buf.put_u32(self.ttl_ms);
        put_id(buf, &self.target);
        match &self.mode {
            LookupMode::Initial => buf.put_u8(0),
            LookupMode::Step { current_i, kshift } => {
                buf.put_u8(1);
                put_id(buf, current_i);
                put_id(buf, kshift);
            }
        }
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        let id = reader.u64()?;
        let ttl_ms = reader.u32()?;
        let target = reader.id(space)?;
        let mode = match reader.u8()? {
            0 => LookupMode::Initial,
            1 => LookupMode::Step {
                current_i: reader.id(space)?,
                kshift: reader.id(space)?,
            },
            other => return Err(CodecError::Malformed(format!("lookup mode {other}"))),
        };
        Ok(Self {
            id,
            ttl_ms,
            target,
            mode,
        })
    }
}

impl WireMessage for FoundSuccessor {
    const CODE: u8 = 0x02;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        put_node(buf, &self.node);
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.u64()?,
            node: reader.node(space)?,
        })
    }
}

impl WireMessage for GetPredecessor {
    const CODE: u8 = 0x03;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
    }

    fn decode(reader: &mut Reader<'_>, _space: &Space) -> Result<Self, CodecError> {
        Ok(Self { id: reader.u64()? })
    }
}

impl WireMessage for PredecessorFound {
    const CODE: u8 = 0x04;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        put_node(buf, &self.node);
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.u64()?,
            node: reader.node(space)?,
        })
    }
}

impl WireMessage for GetSuccessorList {
    const CODE: u8 = 0x05;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
    }

    fn decode(reader: &mut Reader<'_>, _space: &Space) -> Result<Self, CodecError> {
        Ok(Self { id: reader.u64()? })
    }
}

impl WireMessage for SuccessorListFound {
    const CODE: u8 = 0x06;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        buf.put_u32(self.nodes.len() as u32);
        for node in &self.nodes {
            put_node(buf, node);
        }
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        let id = reader.u64()?;
        let count = reader.list_len()?;
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(reader.node(space)?);
        }
        Ok(Self { id, nodes })
    }
}

impl WireMessage for Notify {
    const CODE: u8 = 0x07;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        put_node(buf, &self.node);
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.u64()?,
            node: reader.node(space)?,
        })
    }
}

impl WireMessage for Ping {
    const CODE: u8 = 0x08;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
    }

    fn decode(reader: &mut Reader<'_>, _space: &Space) -> Result<Self, CodecError> {
        Ok(Self { id: reader.u64()? })
    }
}

impl WireMessage for Pong {
    const CODE: u8 = 0x09;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
    }

    fn decode(reader: &mut Reader<'_>, _space: &Space) -> Result<Self, CodecError> {
        Ok(Self { id: reader.u64()? })
    }
}

impl WireMessage for StoreResources {
    const CODE: u8 = 0x0a;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        buf.put_u32(self.resources.len() as u32);
        for resource in &self.resources {
            put_resource(buf, resource);
        }
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        let id = reader.u64()?;
        let count = reader.list_len()?;
        let mut resources = Vec::with_capacity(count);
        for _ in 0..count {
            resources.push(reader.resource(space)?);
        }
        Ok(Self { id, resources })
    }
}

impl WireMessage for Retrieve {
    const CODE: u8 = 0x0b;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        put_id(buf, &self.key);
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.u64()?,
            key: reader.id(space)?,
        })
    }
}

impl WireMessage for ResourceFound {
    const CODE: u8 = 0x0c;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        put_resource(buf, &self.resource);
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.u64()?,
            resource: reader.resource(space)?,
        })
    }
}

impl WireMessage for Remove {
    const CODE: u8 = 0x0d;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        put_id(buf, &self.key);
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.u64()?,
            key: reader.id(space)?,
        })
    }
}

impl WireMessage for Leave {
    const CODE: u8 = 0x0e;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        put_node(buf, &self.node);
    }

    fn decode(reader: &mut Reader<'_>, space: &Space) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.u64()?,
            node: reader.node(space)?,
        })
    }
}

impl WireMessage for Ack {
    const CODE: u8 = 0x0f;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
    }

    fn decode(reader: &mut Reader<'_>, _space: &Space) -> Result<Self, CodecError> {
        Ok(Self { id: reader.u64()? })
    }
}

impl WireMessage for ErrorResponse {
    const CODE: u8 = 0x10;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.id);
        buf.put_u8(self.fault as u8);
        put_string(buf, &self.message);
    }

    fn decode(reader: &mut Reader<'_>, _space: &Space) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.u64()?,
            fault: WireFault::from_wire(reader.u8()?)?,
            message: reader.string()?,
        })
    }
}

// Field encoding helpers. Identifiers are fixed-size big-endian buffers;
// strings and lists are u32-length-prefixed.

fn put_id(buf: &mut BytesMut, id: &Id) {
    buf.put_slice(id.as_bytes());
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_node(buf: &mut BytesMut, node: &Node) {
    put_id(buf, &node.id);
    put_string(buf, &node.addr);
}

fn put_resource(buf: &mut BytesMut, resource: &Resource) {
    put_id(buf, &resource.key);
    put_string(buf, &resource.raw_key);
    put_string(buf, &resource.value);
}

/// Cursor over one decoded frame.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::UnexpectedEof);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().expect("8 bytes")))
    }

    fn list_len(&mut self) -> Result<usize, CodecError> {
        let len = self.u32()? as usize;
        // A list longer than the remaining frame cannot be well formed.
        if len > self.buf.len() {
            return Err(CodecError::Malformed(format!("list length {len}")));
        }
        Ok(len)
    }

    fn id(&mut self, space: &Space) -> Result<Id, CodecError> {
        let bytes = self.take(space.byte_len())?;
        space
            .id_from_bytes(bytes)
            .map_err(|_| CodecError::InvalidId)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn node(&mut self, space: &Space) -> Result<Node, CodecError> {
        let id = self.id(space)?;
        let addr = self.string()?;
        Ok(Node::new(id, addr))
    }

    fn resource(&mut self, space: &Space) -> Result<Resource, CodecError> {
        let key = self.id(space)?;
        let raw_key = self.string()?;
        let value = self.string()?;
        Ok(Resource::new(key, raw_key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> Space {
        Space::new(32, 4, 4).unwrap()
    }

    fn round_trip(message: Message, space: &Space) -> Message {
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        Message::decode(&buf, space).expect("decode")
    }

    #[test]
    fn find_successor_step_round_trips() {
        let space = space();
        let message = Message::FindSuccessor(FindSuccessor {
            id: 42,
            ttl_ms: 1500,
            target: space.id_from_hex("C72140B0").unwrap(),
            mode: LookupMode::Step {
                current_i: space.id_from_u64(7),
                kshift: space.id_from_hex("1C8502C0").unwrap(),
            },
        });
        assert_eq!(round_trip(message.clone(), &space), message);
    }

    #[test]
    fn successor_list_round_trips() {
        let space = space();
        let message = Message::SuccessorListFound(SuccessorListFound {
            id: 7,
            nodes: vec![
                Node::new(space.id_from_u64(1), "10.0.0.1:4400"),
                Node::new(space.id_from_u64(2), "10.0.0.2:4400"),
            ],
        });
        assert_eq!(round_trip(message.clone(), &space), message);
    }

    #[test]
    fn store_and_error_round_trip() {
        let space = space();
        let store = Message::StoreResources(StoreResources {
            id: 9,
            resources: vec![Resource::new(space.id_from_key("a"), "a", "1")],
        });
        assert_eq!(round_trip(store.clone(), &space), store);

        let error = Message::Error(ErrorResponse::from_error(9, &DhtError::NotFound));
        let Message::Error(decoded) = round_trip(error, &space) else {
            panic!("expected error response");
        };
        assert_eq!(decoded.into_error(), DhtError::NotFound);
    }

    #[test]
    fn rejects_wrong_width_id() {
        let narrow = Space::new(16, 4, 4).unwrap();
        let wide = space();
        let message = Message::Retrieve(Retrieve {
            id: 1,
            key: wide.id_from_u64(5),
        });
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        assert!(Message::decode(&buf, &narrow).is_err());
    }

    #[test]
    fn rejects_unknown_code() {
        let space = space();
        assert!(matches!(
            Message::decode(&[0x7f, 0, 0], &space),
            Err(CodecError::UnknownCode(0x7f))
        ));
    }
}
