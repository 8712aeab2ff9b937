//! Short-lived cache for dashboard statistics.

use dashmap::DashMap;
use service_core::error::AppError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::store::{DashboardStats, IrbStore};

const DASHBOARD_KEY: &str = "dashboard";

struct Entry {
    stored_at: Instant,
    generation: u64,
    stats: DashboardStats,
}

/// Entries remember the generation they were loaded under; `invalidate`
/// bumps the generation, so a load that overlaps a mutation is never served.
pub struct StatsCache {
    entries: DashMap<&'static str, Entry>,
    generation: AtomicU64,
    ttl: Duration,
}

impl StatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    /// Cached stats if still fresh, otherwise reload from the store.
    pub async fn dashboard(&self, store: &dyn IrbStore) -> Result<DashboardStats, AppError> {
        if let Some(stats) = self.fresh(DASHBOARD_KEY) {
            metrics::counter!("irb_stats_cache_total", "result" => "hit").increment(1);
            return Ok(stats);
        }
        metrics::counter!("irb_stats_cache_total", "result" => "miss").increment(1);

        let generation = self.current_generation();
        let stats = store.dashboard_stats().await?;
        self.store_loaded(DASHBOARD_KEY, generation, stats.clone());
        Ok(stats)
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn store_loaded(&self, key: &'static str, generation: u64, stats: DashboardStats) {
        if generation != self.current_generation() {
            return;
        }
        self.entries.insert(
            key,
            Entry {
                stored_at: Instant::now(),
                generation,
                stats,
            },
        );
    }

    fn fresh(&self, key: &'static str) -> Option<DashboardStats> {
        let entry = self.entries.get(key)?;
        let current = entry.generation == self.current_generation();
        if current && entry.stored_at.elapsed() < self.ttl {
            Some(entry.stats.clone())
        } else {
            None
        }
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, Role, User};
    use crate::services::memory::MemoryStore;

    fn user(email: &str) -> User {
        User::new(NewUser {
            email: email.to_string(),
            full_name: "U".to_string(),
            role: Role::Reviewer,
            password_hash: String::new(),
        })
    }

    #[tokio::test]
    async fn serves_cached_value_within_ttl() {
        let store = MemoryStore::new();
        let cache = StatsCache::new(Duration::from_secs(60));
        store.create_user(user("a@x.org")).await.unwrap();

        assert_eq!(cache.dashboard(&store).await.unwrap().total_users, 1);
        store.create_user(user("b@x.org")).await.unwrap();
        assert_eq!(cache.dashboard(&store).await.unwrap().total_users, 1);

        cache.invalidate();
        assert_eq!(cache.dashboard(&store).await.unwrap().total_users, 2);
    }

    #[tokio::test]
    async fn load_overlapping_an_invalidation_is_not_cached() {
        let store = MemoryStore::new();
        let cache = StatsCache::new(Duration::from_secs(60));

        let generation = cache.current_generation();
        let stale = store.dashboard_stats().await.unwrap();
        store.create_user(user("a@x.org")).await.unwrap();
        cache.invalidate();
        cache.store_loaded(DASHBOARD_KEY, generation, stale);

        assert_eq!(cache.dashboard(&store).await.unwrap().total_users, 1);
    }

    #[tokio::test]
    async fn entry_from_an_older_generation_is_ignored() {
        let store = MemoryStore::new();
        let cache = StatsCache::new(Duration::from_secs(60));

        let generation = cache.current_generation();
        let stale = store.dashboard_stats().await.unwrap();
        cache.store_loaded(DASHBOARD_KEY, generation, stale);
        store.create_user(user("a@x.org")).await.unwrap();
        cache.generation.fetch_add(1, Ordering::AcqRel);

        assert_eq!(cache.dashboard(&store).await.unwrap().total_users, 1);
    }

    #[tokio::test]
    async fn zero_ttl_always_reloads() {
        let store = MemoryStore::new();
        let cache = StatsCache::new(Duration::ZERO);
        assert_eq!(cache.dashboard(&store).await.unwrap().total_users, 0);
        store.create_user(user("a@x.org")).await.unwrap();
        assert_eq!(cache.dashboard(&store).await.unwrap().total_users, 1);
    }
}
