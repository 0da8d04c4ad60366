//! Wire-level definitions for the connector protocol.
//!
//! All communication with the upstream connector uses JSON frames over one
//! WebSocket. Inbound frames are parsed into one of five [`Event`] variants
//! by [`EventBuilder`]; outbound traffic is an [`Action`] flattened to an
//! [`OutPacket`] `{action, params, echo?}`. When `echo` is present the
//! engine correlates a pending future by that id.

pub mod action;
pub mod error;
pub mod event;

pub use {
    action::{Action, OutPacket, message_action, reply_segment, text_segment},
    error::{Error, Result},
    event::{
        ArgGroup, EchoEvent, Event, EventBuilder, EventKind, MessageEvent, MetaEvent, NoticeEvent,
        ParsedArgs, ParserId, RequestEvent,
    },
};

/// Write half of the transport, as seen by the outbound pipeline.
///
/// Implementations bound the placement (the engine's `kernel_timeout`) and
/// surface a closed transport as [`Error::TransportClosed`].
#[async_trait::async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, packet: OutPacket) -> Result<()>;
}
