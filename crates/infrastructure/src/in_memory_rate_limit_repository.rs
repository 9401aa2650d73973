use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempo_application::RateLimitRepository;
use tempo_core::{AppError, AppResult};
use tempo_domain::RateLimitRecord;
use tokio::sync::RwLock;
use uuid::Uuid;

type ClientKey = (String, String);

#[derive(Debug, Default)]
struct WindowStore {
    windows: HashMap<ClientKey, Vec<RateLimitRecord>>,
    owners: HashMap<Uuid, ClientKey>,
}

impl WindowStore {
    fn record_mut(&mut self, id: Uuid) -> Option<&mut RateLimitRecord> {
        let owner = self.owners.get(&id)?;
        self.windows
            .get_mut(owner)?
            .iter_mut()
            .find(|record| record.id == id)
    }

    /// Drops matching rows under one key and forgets their ids.
    fn remove_where(
        &mut self,
        client_key: &ClientKey,
        predicate: impl Fn(&RateLimitRecord) -> bool,
    ) -> u64 {
        let Some(records) = self.windows.get_mut(client_key) else {
            return 0;
        };

        let mut deleted = 0_u64;
        records.retain(|record| {
            if predicate(record) {
                self.owners.remove(&record.id);
                deleted += 1;
                false
            } else {
                true
            }
        });

        if records.is_empty() {
            self.windows.remove(client_key);
        }
        deleted
    }
}

/// In-memory throttle repository for tests and single-process development.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitRepository {
    store: RwLock<WindowStore>,
}

impl InMemoryRateLimitRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored windows across all clients.
    pub async fn window_count(&self) -> usize {
        self.store.read().await.windows.values().map(Vec::len).sum()
    }
}

fn key(ip: &str, limit_type: &str) -> ClientKey {
    (ip.to_owned(), limit_type.to_owned())
}

fn latest<'a>(records: impl Iterator<Item = &'a RateLimitRecord>) -> Option<RateLimitRecord> {
    records.max_by_key(|record| record.window_end).cloned()
}

#[async_trait]
impl RateLimitRepository for InMemoryRateLimitRepository {
    async fn find_active_block(
        &self,
        ip: &str,
        limit_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RateLimitRecord>> {
        let store = self.store.read().await;
        Ok(store.windows.get(&key(ip, limit_type)).and_then(|records| {
            records
                .iter()
                .filter(|record| record.is_block_active(now))
                .max_by_key(|record| record.blocked_until)
                .cloned()
        }))
    }

    async fn find_active_window(
        &self,
        ip: &str,
        limit_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RateLimitRecord>> {
        let store = self.store.read().await;
        Ok(store.windows.get(&key(ip, limit_type)).and_then(|records| {
            latest(
                records
                    .iter()
                    .filter(|record| record.is_window_active(now)),
            )
        }))
    }

    async fn find_latest_window(
        &self,
        ip: &str,
        limit_type: &str,
    ) -> AppResult<Option<RateLimitRecord>> {
        let store = self.store.read().await;
        Ok(store
            .windows
            .get(&key(ip, limit_type))
            .and_then(|records| latest(records.iter())))
    }

    async fn create_window(&self, record: &RateLimitRecord) -> AppResult<RateLimitRecord> {
        let mut store = self.store.write().await;
        let client_key = key(record.ip.as_str(), record.limit_type.as_str());
        let records = store.windows.entry(client_key.clone()).or_default();

        if records
            .iter()
            .any(|existing| existing.window_end == record.window_end)
        {
            return Err(AppError::Conflict(format!(
                "rate limit window for '{}' ({}) ending at {} already exists",
                record.ip, record.limit_type, record.window_end
            )));
        }

        records.push(record.clone());
        store.owners.insert(record.id, client_key);
        Ok(record.clone())
    }

    async fn increment_attempts(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<RateLimitRecord> {
        let mut store = self.store.write().await;
        let record = store
            .record_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("rate limit window '{id}' does not exist")))?;

        record.attempts += 1;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn mark_blocked(
        &self,
        id: Uuid,
        blocked_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut store = self.store.write().await;
        if let Some(record) = store.record_mut(id) {
            record.blocked = true;
            record.blocked_until = Some(blocked_until);
            record.updated_at = now;
        }

        Ok(())
    }

    async fn delete_stale_windows(
        &self,
        ip: &str,
        limit_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut store = self.store.write().await;
        Ok(store.remove_where(&key(ip, limit_type), |record| record.is_stale_window(now)))
    }

    async fn delete_client_windows(&self, ip: &str, limit_type: &str) -> AppResult<u64> {
        let mut store = self.store.write().await;
        Ok(store.remove_where(&key(ip, limit_type), |_| true))
    }

    async fn delete_inert(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut store = self.store.write().await;
        let client_keys: Vec<ClientKey> = store.windows.keys().cloned().collect();

        Ok(client_keys
            .iter()
            .map(|client_key| store.remove_where(client_key, |record| record.is_inert(now)))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use tempo_application::RateLimitRepository;
    use tempo_domain::RateLimitRecord;

    use super::InMemoryRateLimitRepository;

    fn at(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, 9, 0, 0)
            .single()
            .unwrap_or_default()
            + Duration::seconds(seconds)
    }

    fn window(ip: &str, limit_type: &str, start: i64, end: i64) -> RateLimitRecord {
        RateLimitRecord::open_window(ip, limit_type, at(start), at(end))
    }

    #[tokio::test]
    async fn duplicate_window_end_is_a_conflict() {
        let repository = InMemoryRateLimitRepository::new();
        assert!(repository.create_window(&window("10.0.0.1", "login", 0, 10)).await.is_ok());

        let duplicate = repository
            .create_window(&window("10.0.0.1", "login", 1, 10))
            .await;
        assert!(matches!(duplicate, Err(tempo_core::AppError::Conflict(_))));

        let other_type = repository
            .create_window(&window("10.0.0.1", "registration", 0, 10))
            .await;
        assert!(other_type.is_ok());
    }

    #[tokio::test]
    async fn active_window_lookup_prefers_latest_end() {
        let repository = InMemoryRateLimitRepository::new();
        let earlier = window("10.0.0.1", "login", 0, 10);
        let later = window("10.0.0.1", "login", 0, 11);
        assert!(repository.create_window(&later).await.is_ok());
        assert!(repository.create_window(&earlier).await.is_ok());

        let active = repository
            .find_active_window("10.0.0.1", "login", at(5))
            .await
            .ok()
            .flatten();
        assert_eq!(active.map(|record| record.id), Some(later.id));

        let none = repository
            .find_active_window("10.0.0.1", "login", at(11))
            .await
            .ok()
            .flatten();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn stale_cleanup_is_idempotent_and_spares_active_and_blocked_rows() {
        let repository = InMemoryRateLimitRepository::new();
        let stale = window("10.0.0.1", "login", 0, 10);
        let blocked = window("10.0.0.1", "login", 0, 12);
        let active = window("10.0.0.1", "login", 15, 30);
        for record in [&stale, &blocked, &active] {
            assert!(repository.create_window(record).await.is_ok());
        }
        assert!(
            repository
                .mark_blocked(blocked.id, at(3_600), at(12))
                .await
                .is_ok()
        );

        for expected in [1, 0, 0] {
            let deleted = repository
                .delete_stale_windows("10.0.0.1", "login", at(20))
                .await;
            assert_eq!(deleted.ok(), Some(expected));
        }
        assert_eq!(repository.window_count().await, 2);

        let block = repository
            .find_active_block("10.0.0.1", "login", at(20))
            .await
            .ok()
            .flatten();
        assert_eq!(block.map(|record| record.id), Some(blocked.id));
    }

    #[tokio::test]
    async fn increment_updates_stored_row() {
        let repository = InMemoryRateLimitRepository::new();
        let record = window("10.0.0.1", "login", 0, 10);
        assert!(repository.create_window(&record).await.is_ok());

        let updated = repository.increment_attempts(record.id, at(2)).await;
        assert_eq!(updated.ok().map(|record| record.attempts), Some(2));

        let missing = repository
            .increment_attempts(uuid::Uuid::new_v4(), at(2))
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn inert_sweep_keeps_live_blocks() {
        let repository = InMemoryRateLimitRepository::new();
        let expired = window("10.0.0.1", "login", 0, 10);
        let blocked = window("10.0.0.2", "login", 0, 10);
        assert!(repository.create_window(&expired).await.is_ok());
        assert!(repository.create_window(&blocked).await.is_ok());
        assert!(
            repository
                .mark_blocked(blocked.id, at(100), at(5))
                .await
                .is_ok()
        );

        assert_eq!(repository.delete_inert(at(50)).await.ok(), Some(1));
        assert_eq!(repository.delete_inert(at(100)).await.ok(), Some(1));
        assert_eq!(repository.window_count().await, 0);
    }

    #[tokio::test]
    async fn client_reset_removes_only_that_limit_type() {
        let repository = InMemoryRateLimitRepository::new();
        assert!(repository.create_window(&window("10.0.0.1", "login", 0, 10)).await.is_ok());
        assert!(repository.create_window(&window("10.0.0.1", "login", 0, 20)).await.is_ok());
        assert!(
            repository
                .create_window(&window("10.0.0.1", "registration", 0, 10))
                .await
                .is_ok()
        );

        assert_eq!(
            repository.delete_client_windows("10.0.0.1", "login").await.ok(),
            Some(2)
        );
        assert_eq!(repository.window_count().await, 1);
    }

    #[tokio::test]
    async fn removed_windows_are_no_longer_addressable_by_id() {
        let repository = InMemoryRateLimitRepository::new();
        let kept = window("10.0.0.1", "login", 0, 10);
        let reset = window("10.0.0.2", "login", 0, 10);
        let swept = window("10.0.0.3", "login", 0, 5);
        for record in [&kept, &reset, &swept] {
            assert!(repository.create_window(record).await.is_ok());
        }

        assert_eq!(
            repository.delete_client_windows("10.0.0.2", "login").await.ok(),
            Some(1)
        );
        assert_eq!(repository.delete_inert(at(6)).await.ok(), Some(1));

        for id in [reset.id, swept.id] {
            let missing = repository.increment_attempts(id, at(7)).await;
            assert!(matches!(missing, Err(tempo_core::AppError::NotFound(_))));
        }

        let updated = repository.increment_attempts(kept.id, at(7)).await;
        assert_eq!(updated.ok().map(|record| record.attempts), Some(2));
        assert_eq!(repository.window_count().await, 1);
    }
}
