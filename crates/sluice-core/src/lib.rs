//! Socket runtime primitives: the reactor and proactor engines, the
//! per-socket state machines they drive (shutdown, flow-control, detach),
//! the data-plane types they operate on (buffers, watermark queues,
//! endpoints) and the two small cross-cutting utilities (the controller
//! wake-up primitive and the timestamp correlator).
//!
//! This crate has no opinion on transport wiring — see `sluice-socket`
//! for the concrete stream/datagram/listener sessions built on top of it,
//! and `sluice-runtime` for the thread pool that owns engine instances.
#![deny(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod controller;
pub mod detach;
pub mod endpoint;
pub mod error;
pub mod flow_control;
pub mod observability;
pub mod proactor;
pub mod reactor;
pub mod registry;
pub mod resolver;
pub mod shutdown;
pub mod time;
pub mod timestamp;

/// Common imports for crates building on `sluice-core`.
pub mod prelude {
    pub use crate::buffer::{Buffer, BufferArray, ByteQueue, Data, QueueEvent, WatermarkQueue};
    pub use crate::config::{
        DatagramSocketOptions, EngineConfig, LingerOptions, ListenerSocketOptions,
        LoadBalancingOptions, ProactorConfig, ReactorConfig, StreamSocketOptions, WatermarkOptions,
    };
    pub use crate::controller::Controller;
    pub use crate::detach::{
        DetachContext, DetachState, Event, EventKind, EventLease, EventPool, SocketDetachListener,
    };
    pub use crate::endpoint::{Endpoint, LocalName, SocketHandle, Transport};
    pub use crate::error::{ErrorCategory, Result, SocketError};
    pub use crate::flow_control::{EngineAction, FlowControlState, Reconciliation};
    pub use crate::proactor::{CompletionResult, CompletionStatus, OperationId, Proactor, ProactorCallback};
    pub use crate::reactor::{InterestOptions, Reactor, ReactorCallback};
    pub use crate::registry::Registry;
    pub use crate::resolver::{Resolver, StaticResolver};
    pub use crate::shutdown::{CloseMode, Direction, Origin, ShutdownContext, ShutdownState};
    pub use crate::time::{Clock, MockClock, SystemClock};
    pub use crate::timestamp::{InvalidateOnHit, TimestampCorrelator, TimestampDelivery, TimestampKind};
}
