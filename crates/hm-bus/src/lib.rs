//! In-process pub/sub and the client-facing wire protocol.
//!
//! - [`event_bus`]: typed publish/subscribe with a bounded activity ring;
//!   publishers never block, slow subscribers shed load.
//! - [`protocol`]: the typed events, inbound client commands, outbound
//!   server messages, and the full/light state snapshot shapes.
//! - [`broadcaster`]: turns bus traffic into throttled `state:full`
//!   snapshots (at most one per quiet window, plus a trailing coalesced
//!   delivery) and per-event `activity:log` lines.

pub mod broadcaster;
pub mod event_bus;
pub mod protocol;

pub use broadcaster::{Broadcaster, SnapshotSource};
pub use event_bus::{EventBus, Published};
pub use protocol::{BusEvent, ClientCommand, ServerMessage, StateSnapshot};
