//! # Network
//!
//! Message delivery between replicas. The engine only sees the
//! [`Transport`] trait; two in-process implementations ship with it.
//!
//! ```text
//! transport.rs — Transport trait and TransportError
//! channel.rs   — tokio mailboxes carrying bincode frames
//! simulated.rs — deterministic queue with reordering, duplication, isolation
//! ```

pub mod channel;
pub mod simulated;
pub mod transport;

pub use channel::{ChannelNetwork, Mailbox};
pub use simulated::{SimulatedNetwork, SimulationOptions};
pub use transport::{Transport, TransportError};
