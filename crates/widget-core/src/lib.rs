//! widget-core: kernel-side state synchronization for the Jupyter widget protocol.
//!
//! This crate provides the core functionality for:
//! - Typed, observable widget properties with declared defaults
//! - Encoding/decoding widget state as JSON patches with binary buffers
//! - A transport state machine driving a comm channel (open, update, display, close)
//! - The base widget object carrying the mandatory protocol properties
//!
//! The comm runtime itself is abstracted behind the [`Comm`] and [`CommFactory`]
//! traits. [`CommManager`] is an in-process implementation that emits
//! [`CommMessage`] frames into an unbounded channel.

pub mod buffers;
pub mod comm;
pub mod error;
pub mod events;
pub mod object;
pub mod property;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod transport;

pub use buffers::{BinaryValue, Buffer, BufferAttachment, BufferPath, PathSegment};
pub use comm::{ChannelComm, Comm, CommError, CommFactory, CommId, CommManager};
pub use error::{Result, WidgetError};
pub use events::{EventBus, ObjectId, Subscription, WidgetEvent};
pub use object::{BaseProperties, BaseWidget, CommHandler, ModelState, Widget, WidgetObject};
pub use property::{Origin, Property};
pub use protocol::{CommMessage, WidgetMethod};
pub use registry::{Declare, PropertyDescriptor, PropertyRegistry};
pub use state::{PatchError, PatchErrors, StatePatch};
pub use transport::{Transport, TransportState};
