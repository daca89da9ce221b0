//! Typed errors that callers downcast out of `anyhow::Error`.

use thiserror::Error;

/// The master replied `die`. The process must exit without further cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("instructed to die by master")]
pub struct MasterTerminated;

/// The master handed out a node id this worker never collected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("master sent unknown node id {nodeid:?} (not in local collection)")]
pub struct UnknownNodeError {
    pub nodeid: String,
}

/// The master sent a well-formed reply the worker cannot interpret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("expected a list of node ids for {event}, got {reply}")]
    UnexpectedReply { event: &'static str, reply: String },
}

/// The channel to the master is unusable and the request/reply sequence is lost.
///
/// Nothing more may be sent on it: a late reply would be paired with the wrong
/// request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("master closed the connection")]
    Disconnected,
    #[error("{op} failed")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("master sent a malformed reply")]
    MalformedReply {
        #[source]
        source: serde_json::Error,
    },
}

/// True if `err` (or anything in its chain) is a `die` instruction.
pub fn is_terminated(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<MasterTerminated>().is_some())
}

/// True if `err` (or anything in its chain) is a broken channel to the master.
pub fn is_channel_broken(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<TransportError>().is_some())
}
