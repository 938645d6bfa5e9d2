//! Routing runtime: resolution, route caching, and message dispatch.

mod cache;
mod dispatcher;
mod envelope;
mod router;
mod transport;

pub use cache::RouteCache;
pub use dispatcher::{DispatchConfig, DispatchError, MessageDispatcher, PendingDelivery, SendOutcome};
pub use envelope::{CorrelationId, MessageEnvelope};
pub use router::{ActorRouter, RouterConfig, RouterError};
pub use transport::{Delivery, InMemoryTransport, Transport, TransportError};
