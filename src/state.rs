use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::store::{AggregateStore, RedisStore};
use crate::votes::VoteService;

pub struct AppState {
    pub config: Config,
    pub service: VoteService,
    /// Which adapter backs the service, reported by the diag endpoint.
    pub store_kind: &'static str,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let store = RedisStore::connect(&config.redis_url)
            .await
            .expect("Redis misconfigured!");

        Self::with_store(config, Arc::new(store), "redis")
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn AggregateStore>,
        store_kind: &'static str,
    ) -> Arc<Self> {
        let service = VoteService::new(
            store,
            Duration::from_secs(config.cooldown_s),
            config.max_write_attempts,
        );

        Arc::new(Self {
            config,
            service,
            store_kind,
        })
    }
}
