//! Fire-and-forget invalidation output.

use std::sync::Arc;

use crate::bus::EventBus;
use crate::invalidation::CacheInvalidation;

/// Where invalidation messages go after a committed state change.
///
/// Implementations must not block the caller on delivery and must not
/// return errors: a lost invalidation only means a stale cache entry.
pub trait InvalidationSink: Send + Sync {
    fn invalidate(&self, message: CacheInvalidation);

    fn invalidate_all(&self, messages: Vec<CacheInvalidation>) {
        for message in messages {
            self.invalidate(message);
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidationSink;

impl InvalidationSink for NoopInvalidationSink {
    fn invalidate(&self, _message: CacheInvalidation) {}
}

/// Publishes onto any [`EventBus`], logging failures.
pub struct BusInvalidationSink<B: ?Sized> {
    bus: Arc<B>,
}

impl<B: ?Sized> BusInvalidationSink<B> {
    pub fn new(bus: Arc<B>) -> Self {
        Self { bus }
    }
}

impl<B> InvalidationSink for BusInvalidationSink<B>
where
    B: EventBus<CacheInvalidation> + ?Sized,
{
    fn invalidate(&self, message: CacheInvalidation) {
        let key = message.cache_key();
        if let Err(err) = self.bus.publish(message) {
            tracing::warn!(cache_key = %key, error = ?err, "cache invalidation failed");
        }
    }
}
