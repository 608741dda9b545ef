//! Core aggregate and domain event traits.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + std::fmt::Debug {
    /// Returns the event type name.
    ///
    /// Used for routing in the message bus and for log fields.
    fn event_type(&self) -> &'static str;
}

/// Version number of an aggregate, used for optimistic concurrency control.
///
/// A freshly created aggregate sits at version 0. Each successful state change
/// that must be serialized against concurrent writers advances it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Trait for aggregates.
///
/// An aggregate is a cluster of domain objects that can be treated as a single unit.
/// The aggregate root ensures consistency of changes being made within the aggregate.
///
/// Aggregates here are state-based: mutations change fields directly and may
/// record domain events on an internal queue. The queue is transient; it is
/// never persisted and is drained by the unit of work after a successful commit.
pub trait Aggregate: Send + Sync {
    /// The type of events this aggregate records.
    type Event: DomainEvent;

    /// The aggregate's natural identifier.
    type Id: Clone + Eq + std::hash::Hash + std::fmt::Debug + std::fmt::Display;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier.
    fn id(&self) -> &Self::Id;

    /// Returns the current version of the aggregate.
    fn version(&self) -> Version;

    /// Returns the events recorded but not yet dispatched, oldest first.
    fn pending_events(&self) -> &[Self::Event];

    /// Removes and returns the oldest pending event.
    fn pop_event(&mut self) -> Option<Self::Event>;

    /// Appends an event to the pending queue.
    fn record(&mut self, event: Self::Event);

    /// Drops every pending event without dispatching it.
    fn clear_events(&mut self);

    /// Returns true if any event is waiting to be dispatched.
    fn has_pending_events(&self) -> bool {
        !self.pending_events().is_empty()
    }
}
