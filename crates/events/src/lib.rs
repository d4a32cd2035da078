//! Cache invalidation messages and the pub/sub plumbing that carries them.
//!
//! Order state changes and stock movements make cached views stale. The core
//! never waits on invalidation: a sink failure is logged and dropped.

pub mod bus;
pub mod in_memory_bus;
pub mod invalidation;
pub mod sink;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use invalidation::CacheInvalidation;
pub use sink::{BusInvalidationSink, InvalidationSink, NoopInvalidationSink};
