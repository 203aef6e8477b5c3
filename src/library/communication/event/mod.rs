//! Structures to consume events from a durable broker
//!
//! Events are published onto a [`Subject`] where the broker retains them in an append-only log,
//! assigning each message a monotonically increasing sequence number. Consumers never read
//! this log directly. Instead, they join a [`DurableGroup`] for which the broker maintains a
//! persistent cursor. All [`Listeners`](Listener) sharing a group on the same subject compete for
//! messages: each message is delivered to only one of them at a time, which effectively implements
//! load balancing and dynamic scalability.
//!
//! Every delivered [`Envelope`] has to be acknowledged once processing concludes. Envelopes that
//! are not acknowledged within the ack wait window of the [`SubscriptionPolicy`] are redelivered to
//! any member of the group. Delivery is thus at-least-once and [`Handlers`](Handler) have to be idempotent.
//! Upon restarting, a listener subscribing with the same group resumes right after the last
//! acknowledged message.

mod decoder;
mod envelope;
mod handler;
mod listener;
mod policy;
mod subject;
mod transport;

pub use decoder::*;
pub use envelope::*;
pub use handler::*;
pub use listener::*;
pub use policy::*;
pub use subject::*;
pub use transport::*;
