//! Planboard Library
//!
//! Project planning service (projects, requirements, sprints and tasks) with a
//! field-level change history recorded on every save.

pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod models;
pub mod utils;

pub use audit::AuditInterceptor;
pub use config::AppConfig;
pub use db::{DataContext, DbPool};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Database connection pool
    pub db: DbPool,
    /// Change history interceptor built from `config.audit`
    pub interceptor: AuditInterceptor,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let interceptor = AuditInterceptor::new(&config.audit);
        Self {
            config,
            db,
            interceptor,
        }
    }

    /// A fresh unit of work for one request
    pub fn data_context(&self) -> DataContext {
        DataContext::with_interceptor(self.db.clone(), self.interceptor.clone())
    }
}
