//! PostgreSQL store
//!
//! Each `StoreTx` wraps one `sqlx::Transaction`; sqlx rolls it back on drop.
//! The `mark_*_used` methods are single conditional UPDATEs, so two
//! concurrent redemptions of the same row cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    EmergencyActionRecord, RefreshRecord, SingleUseToken, Store, StoreTx, Tenant, TokenPurpose,
    UserAccount,
};
use crate::error::StoreError;

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema under `migrations/`
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {}", e)))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

type RefreshRow = (
    Uuid,
    Uuid,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

fn refresh_from_row(row: RefreshRow) -> RefreshRecord {
    let (jti, user_id, device, origin, expires_at, used_at, revoked_at, created_at) = row;
    RefreshRecord {
        jti,
        user_id,
        device,
        origin,
        expires_at,
        used_at,
        revoked_at,
        created_at,
    }
}

type SingleUseRow = (
    String,
    Uuid,
    String,
    serde_json::Value,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

fn single_use_from_row(row: SingleUseRow) -> Result<SingleUseToken, StoreError> {
    let (token_hash, user_id, purpose, payload, expires_at, used_at, created_at) = row;
    Ok(SingleUseToken {
        token_hash,
        user_id,
        purpose: purpose.parse()?,
        payload,
        expires_at,
        used_at,
        created_at,
    })
}

type UserRow = (Uuid, Uuid, String, String, Option<String>, bool);

fn user_from_row(row: UserRow) -> UserAccount {
    let (id, tenant_id, email, role, password_hash, is_active) = row;
    UserAccount {
        id,
        tenant_id,
        email,
        role,
        password_hash,
        is_active,
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_refresh_record(&mut self, record: &RefreshRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (jti, user_id, device, origin, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.jti)
        .bind(record.user_id)
        .bind(&record.device)
        .bind(&record.origin)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn fetch_refresh_record(&mut self, jti: Uuid) -> Result<Option<RefreshRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshRow>(
            r#"
            SELECT jti, user_id, device, origin, expires_at, used_at, revoked_at, created_at
            FROM refresh_tokens
            WHERE jti = $1
            "#,
        )
        .bind(jti)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(refresh_from_row))
    }

    async fn mark_refresh_used(&mut self, jti: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET used_at = $1
            WHERE jti = $2 AND used_at IS NULL AND revoked_at IS NULL
            "#,
        )
        .bind(at)
        .bind(jti)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_refresh_record(&mut self, jti: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1
            WHERE jti = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(at)
        .bind(jti)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_user_refresh_records(
        &mut self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1
            WHERE user_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(at)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_single_use_token(&mut self, token: &SingleUseToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO single_use_tokens (token_hash, user_id, purpose, payload, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(token.purpose.as_str())
        .bind(&token.payload)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn fetch_single_use_token(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<SingleUseToken>, StoreError> {
        let row = sqlx::query_as::<_, SingleUseRow>(
            r#"
            SELECT token_hash, user_id, purpose, payload, expires_at, used_at, created_at
            FROM single_use_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(single_use_from_row).transpose()
    }

    async fn mark_single_use_token_used(
        &mut self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE single_use_tokens
            SET used_at = $1
            WHERE token_hash = $2 AND used_at IS NULL
            "#,
        )
        .bind(at)
        .bind(token_hash)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_outstanding_tokens(
        &mut self,
        user_id: Uuid,
        purpose: TokenPurpose,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM single_use_tokens
            WHERE user_id = $1 AND purpose = $2 AND used_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(purpose.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_emergency_record(&mut self, record: &EmergencyActionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO emergency_action_tokens (jti, created_at)
            VALUES ($1, $2)
            "#,
        )
        .bind(record.jti)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn fetch_emergency_record(
        &mut self,
        jti: Uuid,
    ) -> Result<Option<EmergencyActionRecord>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, DateTime<Utc>, Option<DateTime<Utc>>)>(
            "SELECT jti, created_at, used_at FROM emergency_action_tokens WHERE jti = $1",
        )
        .bind(jti)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|(jti, created_at, used_at)| EmergencyActionRecord {
            jti,
            created_at,
            used_at,
        }))
    }

    async fn mark_emergency_record_used(&mut self, jti: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE emergency_action_tokens
            SET used_at = $1
            WHERE jti = $2 AND used_at IS NULL
            "#,
        )
        .bind(at)
        .bind(jti)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_user(&mut self, user_id: Uuid) -> Result<Option<UserAccount>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, tenant_id, email, role, password_hash, is_active FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn fetch_user_by_email(&mut self, email: &str) -> Result<Option<UserAccount>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, tenant_id, email, role, password_hash, is_active
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn fetch_tenant(&mut self, tenant_id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, bool, bool)>(
            "SELECT id, name, is_active, ip_allowlist_enabled FROM tenants WHERE id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|(id, name, is_active, ip_allowlist_enabled)| Tenant {
            id,
            name,
            is_active,
            ip_allowlist_enabled,
        }))
    }

    async fn activate_user(&mut self, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET is_active = true, updated_at = now() WHERE id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_password_hash(&mut self, user_id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE id = $2")
                .bind(password_hash)
                .bind(user_id)
                .execute(&mut *self.tx)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_email(&mut self, user_id: Uuid, email: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET email = $1, updated_at = now() WHERE id = $2")
            .bind(email)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_tenant_ip_allowlist(&mut self, tenant_id: Uuid, enabled: bool) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tenants SET ip_allowlist_enabled = $1, updated_at = now() WHERE id = $2",
        )
        .bind(enabled)
        .bind(tenant_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
