//! Postgres-backed relation store.
//!
//! # Data model
//! Two tables, one per relation, each keyed by the full tuple:
//! - `rbac_grants (role, domain, object, action)`
//! - `rbac_assignments (user_id, role, domain)`
//!
//! Composite primary keys make `INSERT ... ON CONFLICT DO NOTHING` the
//! idempotent insert, and a `DELETE` that matches no row is the idempotent
//! delete.
//!
//! # Queries
//! Pattern fields are bound as nullable parameters; `($1::text IS NULL OR col = $1)`
//! turns an absent field into a wildcard without building SQL at runtime.
//!
//! # Operational notes
//! - Migrations run at connect time via `sqlx::migrate!("./migrations")`.
//! - Database URLs may contain credentials; avoid logging them.
//! - Pool exhaustion and I/O failures surface as `StoreError::Unavailable`.
use crate::config::PostgresConfig;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use tollgate_authz::{
    AssignmentPattern, AssignmentTuple, GrantPattern, GrantTuple, RelationStore, StoreError,
    StoreResult, Tuple, TuplePattern,
};

#[derive(Clone)]
pub struct PostgresRelationStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct DbGrant {
    role: String,
    domain: String,
    object: String,
    action: String,
}

#[derive(Debug, FromRow)]
struct DbAssignment {
    user_id: String,
    role: String,
    domain: String,
}

/// Open a pool sized by `pg`. Shared by the store and the Postgres notifier.
pub async fn connect_pool(pg: &PostgresConfig) -> StoreResult<PgPool> {
    let connect_options = PgConnectOptions::from_str(&pg.url).map_err(db_error)?;
    PgPoolOptions::new()
        .max_connections(pg.max_connections)
        .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
        .connect_with(connect_options)
        .await
        .map_err(db_error)
}

impl PostgresRelationStore {
    /// Connect and apply embedded migrations before returning.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let pool = connect_pool(pg).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying migrations first.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        // Fail startup rather than serve against a missing schema.
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|err| StoreError::Unexpected(err.into()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn query_grants(&self, pattern: &GrantPattern) -> StoreResult<Vec<Tuple>> {
        let rows: Vec<DbGrant> = sqlx::query_as(
            "SELECT role, domain, object, action FROM rbac_grants \
             WHERE ($1::text IS NULL OR role = $1) \
               AND ($2::text IS NULL OR domain = $2) \
               AND ($3::text IS NULL OR object = $3) \
               AND ($4::text IS NULL OR action = $4) \
             ORDER BY role, domain, object, action",
        )
        .bind(pattern.role.as_deref())
        .bind(pattern.domain.as_deref())
        .bind(pattern.object.as_deref())
        .bind(pattern.action.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|row| Tuple::Grant(GrantTuple::new(row.role, row.domain, row.object, row.action)))
            .collect())
    }

    async fn query_assignments(&self, pattern: &AssignmentPattern) -> StoreResult<Vec<Tuple>> {
        let rows: Vec<DbAssignment> = sqlx::query_as(
            "SELECT user_id, role, domain FROM rbac_assignments \
             WHERE ($1::text IS NULL OR user_id = $1) \
               AND ($2::text IS NULL OR role = $2) \
               AND ($3::text IS NULL OR domain = $3) \
             ORDER BY user_id, role, domain",
        )
        .bind(pattern.user.as_deref())
        .bind(pattern.role.as_deref())
        .bind(pattern.domain.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|row| Tuple::Assignment(AssignmentTuple::new(row.user_id, row.role, row.domain)))
            .collect())
    }
}

#[async_trait]
impl RelationStore for PostgresRelationStore {
    async fn insert(&self, tuple: &Tuple) -> StoreResult<()> {
        let query = match tuple {
            Tuple::Grant(grant) => sqlx::query(
                "INSERT INTO rbac_grants (role, domain, object, action) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&grant.role)
            .bind(&grant.domain)
            .bind(&grant.object)
            .bind(&grant.action),
            Tuple::Assignment(assignment) => sqlx::query(
                "INSERT INTO rbac_assignments (user_id, role, domain) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&assignment.user)
            .bind(&assignment.role)
            .bind(&assignment.domain),
        };
        query.execute(&self.pool).await.map_err(db_error)?;
        Ok(())
    }

    async fn delete(&self, tuple: &Tuple) -> StoreResult<()> {
        let query = match tuple {
            Tuple::Grant(grant) => sqlx::query(
                "DELETE FROM rbac_grants \
                 WHERE role = $1 AND domain = $2 AND object = $3 AND action = $4",
            )
            .bind(&grant.role)
            .bind(&grant.domain)
            .bind(&grant.object)
            .bind(&grant.action),
            Tuple::Assignment(assignment) => sqlx::query(
                "DELETE FROM rbac_assignments \
                 WHERE user_id = $1 AND role = $2 AND domain = $3",
            )
            .bind(&assignment.user)
            .bind(&assignment.role)
            .bind(&assignment.domain),
        };
        query.execute(&self.pool).await.map_err(db_error)?;
        Ok(())
    }

    async fn query(&self, pattern: &TuplePattern) -> StoreResult<Vec<Tuple>> {
        match pattern {
            TuplePattern::Grant(grant) => self.query_grants(grant).await,
            TuplePattern::Assignment(assignment) => self.query_assignments(assignment).await,
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// Map driver errors onto the store taxonomy.
pub(crate) fn db_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some("23505") => {
            StoreError::Conflict(err.to_string())
        }
        other => StoreError::Unexpected(other.into()),
    }
}
