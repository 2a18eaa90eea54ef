//! Controls store. Mutations and queries run through tower pipelines with the
//! shutdown admission layers installed in front of the executors.

use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use common_database::{Database, DatabaseError};
use futures::future::BoxFuture;
use lifecycle::{Admission, AdmissionLayer, GatedDriver, LifecycleError};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tower::{Service, ServiceBuilder, ServiceExt};

pub const DEFAULT_LIST_LIMIT: i64 = 100;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("control {0} not found")]
    NotFound(i64),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(DatabaseError::Sqlx(e))
    }
}

impl StoreError {
    pub fn is_shutting_down(&self) -> bool {
        match self {
            StoreError::Lifecycle(e) => e.is_shutting_down(),
            StoreError::Database(e) => e.is_shutting_down(),
            StoreError::NotFound(_) => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => e.is_transient(),
            _ => self.is_shutting_down(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Control {
    pub id: i64,
    pub ref_code: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewControl {
    pub ref_code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "not_implemented".to_owned()
}

#[derive(Debug, Clone)]
pub enum Mutation {
    Create(NewControl),
    SetStatus { id: i64, status: String },
    Delete { id: i64 },
}

#[derive(Debug, Clone)]
pub enum Query {
    Get { id: i64 },
    List { limit: i64 },
}

const CONTROL_COLUMNS: &str = "id, ref_code, description, status, created_at, updated_at";

/// Rows touched by a mutation or returned by a query. Keyed operations yield at most one.
pub type Controls = Vec<Control>;

/// The single row of a keyed operation, or `missing` when there was none.
fn single(mut rows: Controls, missing: StoreError) -> Result<Control, StoreError> {
    rows.pop().ok_or(missing)
}

/// Runs each mutation in its own transaction opened through the gated driver and returns
/// the affected rows.
#[derive(Clone)]
pub struct MutationExecutor {
    driver: Arc<GatedDriver<Database>>,
}

impl Service<Mutation> for MutationExecutor {
    type Response = Controls;
    type Error = StoreError;
    type Future = BoxFuture<'static, Result<Controls, StoreError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mutation: Mutation) -> Self::Future {
        let driver = self.driver.clone();
        Box::pin(async move {
            let mut tx = driver.begin_tx().await?;

            let rows = match mutation {
                Mutation::Create(new) => {
                    sqlx::query_as::<_, Control>(&format!(
                        "INSERT INTO controls (ref_code, description, status) VALUES ($1, $2, $3) RETURNING {CONTROL_COLUMNS}"
                    ))
                    .bind(&new.ref_code)
                    .bind(&new.description)
                    .bind(&new.status)
                    .fetch_all(tx.conn())
                    .await?
                }
                Mutation::SetStatus { id, status } => {
                    sqlx::query_as::<_, Control>(&format!(
                        "UPDATE controls SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {CONTROL_COLUMNS}"
                    ))
                    .bind(id)
                    .bind(&status)
                    .fetch_all(tx.conn())
                    .await?
                }
                Mutation::Delete { id } => {
                    sqlx::query_as::<_, Control>(&format!(
                        "DELETE FROM controls WHERE id = $1 RETURNING {CONTROL_COLUMNS}"
                    ))
                    .bind(id)
                    .fetch_all(tx.conn())
                    .await?
                }
            };

            tx.commit().await?;
            Ok(rows)
        })
    }
}

/// Reads straight from the pool.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: PgPool,
}

impl Service<Query> for QueryExecutor {
    type Response = Controls;
    type Error = StoreError;
    type Future = BoxFuture<'static, Result<Controls, StoreError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, query: Query) -> Self::Future {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = match query {
                Query::Get { id } => {
                    sqlx::query_as::<_, Control>(&format!(
                        "SELECT {CONTROL_COLUMNS} FROM controls WHERE id = $1"
                    ))
                    .bind(id)
                    .fetch_all(&pool)
                    .await?
                }
                Query::List { limit } => {
                    sqlx::query_as::<_, Control>(&format!(
                        "SELECT {CONTROL_COLUMNS} FROM controls ORDER BY id LIMIT $1"
                    ))
                    .bind(limit)
                    .fetch_all(&pool)
                    .await?
                }
            };
            Ok(rows)
        })
    }
}

#[derive(Clone)]
pub struct Store {
    mutations: Admission<MutationExecutor>,
    queries: Admission<QueryExecutor>,
}

impl Store {
    /// Build both pipelines on top of `driver`. The hook and interceptor share the
    /// driver's gate, so all three enforcement points close together.
    pub fn new(driver: Arc<GatedDriver<Database>>) -> Self {
        let gate = driver.gate().clone();
        let pool = driver.inner().pool().clone();

        let mutations = ServiceBuilder::new()
            .layer(AdmissionLayer::hook(gate.clone()))
            .service(MutationExecutor { driver });
        let queries = ServiceBuilder::new()
            .layer(AdmissionLayer::interceptor(gate))
            .service(QueryExecutor { pool });

        Self {
            mutations,
            queries,
        }
    }

    pub async fn mutate(&self, mutation: Mutation) -> Result<Controls, StoreError> {
        self.mutations.clone().oneshot(mutation).await
    }

    pub async fn query(&self, query: Query) -> Result<Controls, StoreError> {
        self.queries.clone().oneshot(query).await
    }

    pub async fn create_control(&self, new: NewControl) -> Result<Control, StoreError> {
        let rows = self.mutate(Mutation::Create(new)).await?;
        single(rows, StoreError::from(sqlx::Error::RowNotFound))
    }

    pub async fn set_status(&self, id: i64, status: String) -> Result<Control, StoreError> {
        let rows = self.mutate(Mutation::SetStatus { id, status }).await?;
        single(rows, StoreError::NotFound(id))
    }

    pub async fn delete_control(&self, id: i64) -> Result<(), StoreError> {
        let rows = self.mutate(Mutation::Delete { id }).await?;
        single(rows, StoreError::NotFound(id)).map(drop)
    }

    pub async fn get_control(&self, id: i64) -> Result<Control, StoreError> {
        let rows = self.query(Query::Get { id }).await?;
        single(rows, StoreError::NotFound(id))
    }

    pub async fn list_controls(&self, limit: i64) -> Result<Controls, StoreError> {
        self.query(Query::List { limit }).await
    }
}

pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
