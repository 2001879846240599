pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use crate::database::postgres::PgStore;
use crate::services::answer_key_service::BookletKeyService;
use crate::services::audit_service::AuditService;
use crate::services::exam_lock::ExamLocks;
use crate::services::queue_service::AnalyticsQueueService;
use crate::services::recompute_service::{RecomputeOptions, RecomputeService};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub recompute_service: RecomputeService<PgStore, AnalyticsQueueService, AuditService>,
    pub booklet_key_service: BookletKeyService<PgStore, AuditService>,
    pub queue_service: AnalyticsQueueService,
}

impl AppState {
    pub fn new(pool: PgPool, options: RecomputeOptions) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        let queue_service = AnalyticsQueueService::new(pool.clone());
        let audit = Arc::new(AuditService::new(pool.clone()));
        let locks = ExamLocks::new();

        let booklet_key_service =
            BookletKeyService::new(store.clone(), audit.clone(), locks.clone(), options.lock_timeout);
        let recompute_service = RecomputeService::new(
            store,
            Arc::new(queue_service.clone()),
            audit,
            locks,
            options,
        );

        Self {
            pool,
            recompute_service,
            booklet_key_service,
            queue_service,
        }
    }
}
