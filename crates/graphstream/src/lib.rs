//! Client side of a running execution: the reconnecting log stream and the
//! HTTP API for log history and status.

mod api;
mod buffer;
mod client;
pub mod sse;
mod transport;

pub use api::{ApiClient, SubmitResponse};
pub use buffer::LogBuffer;
pub use client::{
    ChannelHandler, ConnectionState, LogStreamClient, StreamEnd, StreamHandler, StreamUpdate,
    Subscription,
};
pub use sse::{CompletePayload, StreamEvent};
pub use transport::{EventStream, HttpPushTransport, PushTransport};
