//! Dynamic-subscription relay
//!
//! Bridges one client connection to the broker: the client names topics,
//! the session keeps one broker subscription per topic and streams every
//! message on those topics back to the client.
//!
//! ## Architecture
//!
//! - `RelayCoordinator::handle_connection` runs one session per connection
//! - Each session owns its broker connection and a topic → subscription table
//! - All subscriptions of a session share one bounded delivery channel
//! - One forwarding task per session is the only transport writer
//! - A cancellation token (child of the server shutdown token) stops
//!   producers and the forwarder; teardown runs exactly once

mod control;
mod coordinator;
mod delivery;
mod error;
mod registry;
mod session;
mod subscriptions;

pub use control::{ControlMessage, UNSUBSCRIBE_PREFIX};
pub use coordinator::{RelayConfig, RelayCoordinator, SessionEnd};
pub use delivery::{spawn_forwarder, DeliverySink, DeliveryStats, ForwarderExit};
pub use error::{RelayError, RelayResult};
pub use registry::{SessionId, SessionInfo, SessionRegistry};
pub use session::{Session, SessionReport, SessionState};
pub use subscriptions::{Subscription, SubscriptionTable};
