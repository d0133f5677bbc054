//! Zero-copy-eligible payload leaves.
//!
//! A transport that can move ownership of a buffer or a platform handle
//! instead of copying it receives these as transfer hints next to the
//! message they were found in.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Platform handle kinds that may be handed off without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    MessagePort,
    ReadableStream,
    WritableStream,
    TransformStream,
    ImageBitmap,
    OffscreenCanvas,
    AudioData,
    VideoFrame,
    DataChannel,
    MediaSourceHandle,
    MidiAccess,
    MediaStreamTrack,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::MessagePort => "message_port",
            EndpointKind::ReadableStream => "readable_stream",
            EndpointKind::WritableStream => "writable_stream",
            EndpointKind::TransformStream => "transform_stream",
            EndpointKind::ImageBitmap => "image_bitmap",
            EndpointKind::OffscreenCanvas => "offscreen_canvas",
            EndpointKind::AudioData => "audio_data",
            EndpointKind::VideoFrame => "video_frame",
            EndpointKind::DataChannel => "data_channel",
            EndpointKind::MediaSourceHandle => "media_source_handle",
            EndpointKind::MidiAccess => "midi_access",
            EndpointKind::MediaStreamTrack => "media_stream_track",
        }
    }
}

/// A typed platform handle. The resource itself is opaque to the protocol.
#[derive(Clone)]
pub struct Endpoint {
    kind: EndpointKind,
    resource: Arc<dyn Any + Send + Sync>,
}

impl Endpoint {
    pub fn new<R: Any + Send + Sync>(kind: EndpointKind, resource: R) -> Self {
        Self {
            kind,
            resource: Arc::new(resource),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Borrow the wrapped resource as a concrete type.
    pub fn downcast_ref<R: Any>(&self) -> Option<&R> {
        self.resource.downcast_ref::<R>()
    }

    pub fn ptr_eq(&self, other: &Endpoint) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.resource) as *const () as usize
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A payload leaf the transport may move instead of clone.
#[derive(Clone)]
pub enum Transferable {
    /// Binary buffer.
    Buffer(Bytes),
    /// Stream, port or media handle.
    Endpoint(Endpoint),
}

/// Identity key used to avoid visiting the same leaf or composite twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Identity {
    Composite(usize),
    Buffer(usize, usize),
    Endpoint(usize),
}

impl Transferable {
    pub fn kind(&self) -> &'static str {
        match self {
            Transferable::Buffer(_) => "buffer",
            Transferable::Endpoint(endpoint) => endpoint.kind.as_str(),
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Transferable::Buffer(bytes) => Some(bytes),
            Transferable::Endpoint(_) => None,
        }
    }

    pub fn as_endpoint(&self) -> Option<&Endpoint> {
        match self {
            Transferable::Endpoint(endpoint) => Some(endpoint),
            Transferable::Buffer(_) => None,
        }
    }

    /// Two buffers are the same leaf when they view the same bytes. Empty
    /// buffers may all share one static address, so they have no identity
    /// and are never deduplicated.
    pub(crate) fn identity(&self) -> Option<Identity> {
        match self {
            Transferable::Buffer(bytes) if bytes.is_empty() => None,
            Transferable::Buffer(bytes) => {
                Some(Identity::Buffer(bytes.as_ptr() as usize, bytes.len()))
            }
            Transferable::Endpoint(endpoint) => Some(Identity::Endpoint(endpoint.addr())),
        }
    }

    /// Whether this leaf should be listed, given the identities seen so far.
    pub(crate) fn first_visit(&self, visited: &mut HashSet<Identity>) -> bool {
        self.identity().is_none_or(|identity| visited.insert(identity))
    }
}

impl PartialEq for Transferable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Transferable::Buffer(a), Transferable::Buffer(b)) => a == b,
            (Transferable::Endpoint(a), Transferable::Endpoint(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Transferable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transferable::Buffer(bytes) => write!(f, "Buffer(<{} bytes>)", bytes.len()),
            Transferable::Endpoint(endpoint) => write!(f, "{endpoint:?}"),
        }
    }
}

impl From<Bytes> for Transferable {
    fn from(bytes: Bytes) -> Self {
        Transferable::Buffer(bytes)
    }
}

impl From<Endpoint> for Transferable {
    fn from(endpoint: Endpoint) -> Self {
        Transferable::Endpoint(endpoint)
    }
}
