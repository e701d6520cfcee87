//! Actor model for the stream service.
//!
//! ```text
//! ConnectionDispatcher (socket registry, delivery primitives)
//! ├── disconnect feed ──► SignalingCoordinator (participant roster)
//! └── used by SignalingCoordinator and the socket handlers
//! ChunkStorageEngine (serialized ingestion; reads run on callers)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single consumer per actor**: each actor owns its state and handles
//!   its mailbox in arrival order
//! - **CancellationToken propagation**: actors get child tokens of the
//!   service root token and stop when it is cancelled
//! - **Mailbox monitoring**: depth thresholds with metrics
//!   (Dispatcher: 500/2000, Signaling: 100/500, Storage: 20/100)
//!
//! # Modules
//!
//! - [`dispatcher`] - `ConnectionDispatcher`, socket registry and fan-out
//! - [`signaling`] - `SignalingCoordinator`, join/leave/relay protocol
//! - [`storage`] - `ChunkStorageEngine`, chunked ingestion and retrieval
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring

pub mod dispatcher;
pub mod messages;
pub mod metrics;
pub mod signaling;
pub mod storage;

pub use dispatcher::{ConnectionDispatcher, ConnectionHandle, DisconnectFeed, DispatcherHandle};
pub use messages::*;
pub use metrics::{ActorType, MailboxLevel, MailboxMonitor};
pub use signaling::{SignalingCoordinator, SignalingHandle};
pub use storage::{ChunkStorageEngine, Download, PlaybackSlice, StorageEngineHandle};
