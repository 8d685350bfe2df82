//! In-memory store
//!
//! A transaction holds the store's lock for its whole lifetime and works on a
//! snapshot; `commit` swaps the snapshot in, drop discards it. Transactions
//! are therefore serializable, which is what the redemption protocols need.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    EmergencyActionRecord, RefreshRecord, SingleUseToken, Store, StoreTx, Tenant, TokenPurpose,
    UserAccount,
};
use crate::error::StoreError;

#[derive(Debug, Default, Clone)]
struct MemoryState {
    refresh_records: HashMap<Uuid, RefreshRecord>,
    single_use_tokens: HashMap<String, SingleUseToken>,
    emergency_records: HashMap<Uuid, EmergencyActionRecord>,
    users: HashMap<Uuid, UserAccount>,
    tenants: HashMap<Uuid, Tenant>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.state.lock().await.tenants.insert(tenant.id, tenant);
    }

    pub async fn insert_user(&self, user: UserAccount) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn user(&self, user_id: Uuid) -> Option<UserAccount> {
        self.state.lock().await.users.get(&user_id).cloned()
    }

    pub async fn tenant(&self, tenant_id: Uuid) -> Option<Tenant> {
        self.state.lock().await.tenants.get(&tenant_id).cloned()
    }

    pub async fn refresh_record(&self, jti: Uuid) -> Option<RefreshRecord> {
        self.state.lock().await.refresh_records.get(&jti).cloned()
    }

    pub async fn refresh_records_for(&self, user_id: Uuid) -> Vec<RefreshRecord> {
        self.state
            .lock()
            .await
            .refresh_records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn single_use_tokens_for(&self, user_id: Uuid) -> Vec<SingleUseToken> {
        self.state
            .lock()
            .await
            .single_use_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn emergency_record(&self, jti: Uuid) -> Option<EmergencyActionRecord> {
        self.state.lock().await.emergency_records.get(&jti).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_refresh_record(&mut self, record: &RefreshRecord) -> Result<(), StoreError> {
        if self.staged.refresh_records.contains_key(&record.jti) {
            return Err(StoreError::Conflict(format!("refresh record {}", record.jti)));
        }
        self.staged.refresh_records.insert(record.jti, record.clone());
        Ok(())
    }

    async fn fetch_refresh_record(&mut self, jti: Uuid) -> Result<Option<RefreshRecord>, StoreError> {
        Ok(self.staged.refresh_records.get(&jti).cloned())
    }

    async fn mark_refresh_used(&mut self, jti: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.staged.refresh_records.get_mut(&jti) {
            Some(record) if record.used_at.is_none() && record.revoked_at.is_none() => {
                record.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_refresh_record(&mut self, jti: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.staged.refresh_records.get_mut(&jti) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_user_refresh_records(
        &mut self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut count = 0;
        for record in self.staged.refresh_records.values_mut() {
            if record.user_id == user_id && record.revoked_at.is_none() {
                record.revoked_at = Some(at);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn insert_single_use_token(&mut self, token: &SingleUseToken) -> Result<(), StoreError> {
        if self.staged.single_use_tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict("single-use token hash".to_string()));
        }
        self.staged
            .single_use_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn fetch_single_use_token(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<SingleUseToken>, StoreError> {
        Ok(self.staged.single_use_tokens.get(token_hash).cloned())
    }

    async fn mark_single_use_token_used(
        &mut self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.staged.single_use_tokens.get_mut(token_hash) {
            Some(token) if token.used_at.is_none() => {
                token.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_outstanding_tokens(
        &mut self,
        user_id: Uuid,
        purpose: TokenPurpose,
    ) -> Result<u64, StoreError> {
        let before = self.staged.single_use_tokens.len();
        self.staged.single_use_tokens.retain(|_, t| {
            !(t.user_id == user_id && t.purpose == purpose && t.used_at.is_none())
        });
        Ok((before - self.staged.single_use_tokens.len()) as u64)
    }

    async fn insert_emergency_record(&mut self, record: &EmergencyActionRecord) -> Result<(), StoreError> {
        if self.staged.emergency_records.contains_key(&record.jti) {
            return Err(StoreError::Conflict(format!("emergency record {}", record.jti)));
        }
        self.staged.emergency_records.insert(record.jti, record.clone());
        Ok(())
    }

    async fn fetch_emergency_record(
        &mut self,
        jti: Uuid,
    ) -> Result<Option<EmergencyActionRecord>, StoreError> {
        Ok(self.staged.emergency_records.get(&jti).cloned())
    }

    async fn mark_emergency_record_used(&mut self, jti: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.staged.emergency_records.get_mut(&jti) {
            Some(record) if record.used_at.is_none() => {
                record.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fetch_user(&mut self, user_id: Uuid) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.staged.users.get(&user_id).cloned())
    }

    async fn fetch_user_by_email(&mut self, email: &str) -> Result<Option<UserAccount>, StoreError> {
        Ok(self
            .staged
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn fetch_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.staged.tenants.get(&tenant_id).cloned())
    }

    async fn activate_user(&mut self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .staged
            .users
            .get_mut(&user_id)
            .map(|user| user.is_active = true)
            .is_some())
    }

    async fn set_password_hash(&mut self, user_id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .staged
            .users
            .get_mut(&user_id)
            .map(|user| user.password_hash = Some(password_hash.to_string()))
            .is_some())
    }

    async fn set_email(&mut self, user_id: Uuid, email: &str) -> Result<bool, StoreError> {
        let taken = self
            .staged
            .users
            .values()
            .any(|u| u.id != user_id && u.email.eq_ignore_ascii_case(email));
        if taken {
            return Err(StoreError::Conflict("email already registered".to_string()));
        }
        Ok(self
            .staged
            .users
            .get_mut(&user_id)
            .map(|user| user.email = email.to_string())
            .is_some())
    }

    async fn set_tenant_ip_allowlist(&mut self, tenant_id: Uuid, enabled: bool) -> Result<bool, StoreError> {
        Ok(self
            .staged
            .tenants
            .get_mut(&tenant_id)
            .map(|tenant| tenant.ip_allowlist_enabled = enabled)
            .is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(user_id: Uuid) -> RefreshRecord {
        RefreshRecord::new(
            Uuid::new_v4(),
            user_id,
            "agent".to_string(),
            "10.0.0.1".to_string(),
            Utc::now(),
            Duration::days(7),
        )
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let record = record(Uuid::new_v4());

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_refresh_record(&record).await.unwrap();
        }

        assert!(store.refresh_record(record.jti).await.is_none());
    }

    #[tokio::test]
    async fn test_committed_transaction_is_visible() {
        let store = MemoryStore::new();
        let record = record(Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        tx.insert_refresh_record(&record).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.refresh_record(record.jti).await, Some(record));
    }

    #[tokio::test]
    async fn test_mark_used_is_conditional() {
        let store = MemoryStore::new();
        let record = record(Uuid::new_v4());
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        tx.insert_refresh_record(&record).await.unwrap();
        assert!(tx.mark_refresh_used(record.jti, now).await.unwrap());
        assert!(!tx.mark_refresh_used(record.jti, now).await.unwrap());
        assert!(!tx.mark_refresh_used(Uuid::new_v4(), now).await.unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_revoked_record_cannot_be_marked_used() {
        let store = MemoryStore::new();
        let record = record(Uuid::new_v4());
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        tx.insert_refresh_record(&record).await.unwrap();
        assert!(tx.revoke_refresh_record(record.jti, now).await.unwrap());
        assert!(!tx.mark_refresh_used(record.jti, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_revoke_only_touches_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let mine = [record(owner), record(owner)];
        let theirs = record(Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        for r in mine.iter().chain(std::iter::once(&theirs)) {
            tx.insert_refresh_record(r).await.unwrap();
        }
        assert_eq!(tx.revoke_user_refresh_records(owner, Utc::now()).await.unwrap(), 2);
        tx.commit().await.unwrap();

        assert!(store.refresh_record(theirs.jti).await.unwrap().revoked_at.is_none());
    }
}
