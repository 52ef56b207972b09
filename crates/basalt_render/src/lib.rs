//! # BASALT Render
//!
//! The producer/consumer core of the rendering runtime. One dedicated
//! render thread owns the backend context and drains a stream of
//! variable-length commands; any number of client threads produce commands
//! and immediately receive handles to resources that do not exist yet.
//!
//! ## Architecture
//!
//! ```text
//!   client threads                       render thread
//!   ──────────────                       ─────────────
//!   create/set/submit ──▶ active buffer
//!                          │ swap()
//!                          ▼
//!                        queued buffer ──▶ drain: execute each envelope,
//!                                          resolve handle slots, fulfill
//!                                          mapping promises
//! ```
//!
//! ## Guarantees
//!
//! 1. Commands from one producer into one buffer execute in submission order
//! 2. A handle returned by `create` is stable for the resource's lifetime
//! 3. A map request issued mid-frame resolves before `swap_frames` returns
//! 4. Shutdown drains any queued buffer; no command is silently dropped

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::perf)]

pub mod backend;
pub mod command;
pub mod config;
pub mod driver;
pub mod handle;
pub mod promise;
pub mod queue;
pub mod resource;

pub use backend::{BackendEnvironment, BackendError, HandleResolver, RenderBackend};
pub use backend::{DrawCall, SoftwareBackend, SoftwareProbe};
pub use command::{CommandHeader, CommandKind, MapAccess, RenderMessage};
pub use config::{ConfigError, DriverConfig};
pub use driver::RenderDriver;
pub use handle::{Handle, HandleTable, ResourceId, SlotValue};
pub use promise::{MappedRegion, MappingPromise, PromiseSet};
pub use queue::{CommandBuffer, CommandQueue};
pub use resource::{ResourceMeta, ResourceRegistry, ResourceState, ResourceType};
