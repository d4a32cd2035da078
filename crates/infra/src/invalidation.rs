//! Redis pub/sub transport for cache invalidation (feature `redis`).
//!
//! Pub/sub is not durable: subscribers that are offline miss messages. That
//! matches the contract of the signal, which is best-effort.

use std::sync::{mpsc, Arc};
use std::thread;

use redis::Commands;
use thiserror::Error;

use cardvault_events::{CacheInvalidation, EventBus, InvalidationSink, Subscription};

pub const DEFAULT_CHANNEL: &str = "cardvault:invalidate";

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis: {0}")]
    Redis(String),
    #[error("serialize: {0}")]
    Serialize(String),
}

/// Redis pub/sub bus carrying [`CacheInvalidation`] as JSON.
#[derive(Debug, Clone)]
pub struct RedisInvalidationBus {
    client: redis::Client,
    channel: String,
}

impl RedisInvalidationBus {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

impl EventBus<CacheInvalidation> for RedisInvalidationBus {
    type Error = RedisBusError;

    fn publish(&self, message: CacheInvalidation) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message).map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        let _: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(())
    }

    fn subscribe(&self) -> Subscription<CacheInvalidation> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let channel = self.channel.clone();

        thread::spawn(move || {
            let Ok(mut conn) = client.get_connection() else {
                return;
            };
            let mut pubsub = conn.as_pubsub();
            if pubsub.subscribe(channel).is_err() {
                return;
            }

            loop {
                let Ok(msg) = pubsub.get_message() else {
                    return;
                };
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                let Ok(message) = serde_json::from_str::<CacheInvalidation>(&payload) else {
                    continue;
                };
                if tx.send(message).is_err() {
                    return;
                }
            }
        });

        Subscription::new(rx)
    }
}

/// Publishes off the async executor; the caller never waits on Redis.
#[derive(Debug, Clone)]
pub struct RedisInvalidationSink {
    bus: Arc<RedisInvalidationBus>,
}

impl RedisInvalidationSink {
    pub fn new(bus: RedisInvalidationBus) -> Self {
        Self { bus: Arc::new(bus) }
    }
}

impl InvalidationSink for RedisInvalidationSink {
    fn invalidate(&self, message: CacheInvalidation) {
        self.invalidate_all(vec![message]);
    }

    fn invalidate_all(&self, messages: Vec<CacheInvalidation>) {
        let bus = Arc::clone(&self.bus);
        let publish = move || {
            for message in messages {
                let key = message.cache_key();
                if let Err(err) = bus.publish(message) {
                    tracing::warn!(cache_key = %key, error = %err, "cache invalidation failed");
                }
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(publish);
            }
            Err(_) => publish(),
        }
    }
}
