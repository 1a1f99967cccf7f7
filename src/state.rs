use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbConnection, DbPool},
    error::{AppError, AppResult},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    pub fn db(&self) -> AppResult<DbConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err:#}")))
    }

    /// Runs blocking database work off the async runtime, bounded by the
    /// configured request timeout.
    pub async fn with_conn<F, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut DbConnection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = state.db()?;
            f(&mut conn)
        });

        match tokio::time::timeout(self.config.request_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(AppError::internal(format!("database task failed: {err}"))),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "database work exceeded request timeout"
                );
                Err(AppError::gateway_timeout())
            }
        }
    }
}
