//! Stock and allocation endpoints.

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use common::BatchReference;
use serde::Serialize;
use services::{AddBatch, Allocate, AllocationService, ServiceError};
use store::UnitOfWorkFactory;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<F: UnitOfWorkFactory> {
    pub service: AllocationService<F>,
    /// Extra attempts after a concurrency conflict.
    pub max_retries: u32,
}

impl<F: UnitOfWorkFactory> AppState<F> {
    pub fn new(uow_factory: F, max_retries: u32) -> Self {
        Self {
            service: AllocationService::new(uow_factory),
            max_retries,
        }
    }

    /// Runs `op` again while it fails with a concurrency conflict, up to
    /// `max_retries` extra times. Each attempt is a fresh unit of work.
    pub async fn with_retries<T, Op, Fut>(&self, mut op: Op) -> Result<T, ServiceError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_conflict() && attempt < self.max_retries => {
                    attempt += 1;
                    metrics::counter!("http_conflict_retries_total").increment(1);
                    tracing::info!(attempt, error = %e, "retrying after conflict");
                }
                result => return result,
            }
        }
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct AllocateResponse {
    pub batch_ref: BatchReference,
}

// -- Handlers --

/// POST /add_batch: registers a purchased batch.
#[tracing::instrument(skip(state, payload))]
pub async fn add_batch<F: UnitOfWorkFactory + 'static>(
    State(state): State<Arc<AppState<F>>>,
    payload: Result<Json<AddBatch>, JsonRejection>,
) -> Result<(StatusCode, &'static str), ApiError> {
    let Json(cmd) = payload?;
    state
        .with_retries(|| state.service.add_batch(cmd.clone()))
        .await?;
    Ok((StatusCode::CREATED, "OK"))
}

/// POST /allocate: allocates an order line to the preferred batch.
#[tracing::instrument(skip(state, payload))]
pub async fn allocate<F: UnitOfWorkFactory + 'static>(
    State(state): State<Arc<AppState<F>>>,
    payload: Result<Json<Allocate>, JsonRejection>,
) -> Result<(StatusCode, Json<AllocateResponse>), ApiError> {
    let Json(cmd) = payload?;
    let batch_ref = state
        .with_retries(|| state.service.allocate(cmd.clone()))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(AllocateResponse { batch_ref })))
}
