use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use http_body_util::BodyExt;
use paperlink::config::AppConfig;
use paperlink::db::{DbConnection, DbPool, PoolSettings, SqlParam};
use paperlink::dialect::Engine;
use paperlink::routes;
use paperlink::state::AppState;
use serde::Serialize;
use tower::util::ServiceExt;

/// Tables owned by the document-management application. In production they
/// already exist; tests create a minimal copy.
const DOCUMENT_SCHEMA: &str = r#"
CREATE TABLE documents_correspondent (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE documents_documenttype (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE documents_storagepath (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE documents_tag (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE documents_document (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    created TEXT NOT NULL,
    correspondent_id INTEGER,
    document_type_id INTEGER,
    storage_path_id INTEGER,
    owner_id INTEGER,
    archive_serial_number INTEGER,
    is_in_inbox INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);
CREATE TABLE documents_document_tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL
);
CREATE TABLE documents_customfield (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    data_type TEXT NOT NULL,
    extra_data TEXT
);
CREATE TABLE documents_customfieldinstance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    field_id INTEGER NOT NULL,
    value_text TEXT,
    value_url TEXT,
    value_date TEXT,
    value_bool INTEGER,
    value_int INTEGER,
    value_float REAL,
    value_monetary TEXT,
    value_document_ids TEXT,
    value_select TEXT,
    value_long_text TEXT,
    deleted_at TEXT
);
"#;

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let config = AppConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            engine: Engine::Sqlite,
            database_url: ":memory:".to_string(),
            database_max_pool_size: 1,
            database_min_idle: 1,
            database_max_lifetime: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(15),
            cors_allowed_origin: None,
        };

        // A single connection keeps every request on the same in-memory database.
        let settings = PoolSettings {
            max_size: 1,
            min_idle: 1,
            ..config.pool_settings()
        };
        let pool = DbPool::connect(config.engine, &config.database_url, &settings)?;
        prepare_database(&pool).await?;

        let state = AppState::new(pool, config);
        let router = routes::create_router(state.clone());
        Ok(Self { state, router })
    }

    #[allow(dead_code)]
    pub async fn insert_document(&self, id: i64, title: &str) -> Result<()> {
        self.insert_document_with(id, title, DocumentRefs::default())
            .await
    }

    #[allow(dead_code)]
    pub async fn insert_document_with(
        &self,
        id: i64,
        title: &str,
        refs: DocumentRefs,
    ) -> Result<()> {
        let title = title.to_string();
        self.execute(
            "INSERT INTO documents_document \
             (id, title, created, correspondent_id, document_type_id, owner_id, is_in_inbox, deleted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            vec![
                SqlParam::Int(id),
                SqlParam::Text(title),
                SqlParam::Text(refs.created.unwrap_or("2024-01-15").to_string()),
                optional_int(refs.correspondent_id),
                optional_int(refs.document_type_id),
                optional_int(refs.owner_id),
                SqlParam::Bool(refs.is_in_inbox),
                SqlParam::NullableText(refs.deleted_at.map(str::to_string)),
            ],
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_field(
        &self,
        id: i64,
        name: &str,
        data_type: &str,
        extra_data: Option<&str>,
    ) -> Result<()> {
        self.execute(
            "INSERT INTO documents_customfield (id, name, data_type, extra_data) VALUES (?, ?, ?, ?)",
            vec![
                SqlParam::Int(id),
                SqlParam::Text(name.to_string()),
                SqlParam::Text(data_type.to_string()),
                SqlParam::NullableText(extra_data.map(str::to_string)),
            ],
        )
        .await
    }

    /// Stores `value` in the column named `column` of a new field instance.
    #[allow(dead_code)]
    pub async fn insert_instance(
        &self,
        document_id: i64,
        field_id: i64,
        column: &str,
        value: &str,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO documents_customfieldinstance (document_id, field_id, {column}) VALUES (?, ?, ?)"
        );
        self.execute(
            &sql,
            vec![
                SqlParam::Int(document_id),
                SqlParam::Int(field_id),
                SqlParam::Text(value.to_string()),
            ],
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_named(&self, table: &str, id: i64, name: &str) -> Result<()> {
        let sql = format!("INSERT INTO {table} (id, name) VALUES (?, ?)");
        self.execute(&sql, vec![SqlParam::Int(id), SqlParam::Text(name.to_string())])
            .await
    }

    #[allow(dead_code)]
    pub async fn tag_document(&self, document_id: i64, tag_id: i64) -> Result<()> {
        self.execute(
            "INSERT INTO documents_document_tags (document_id, tag_id) VALUES (?, ?)",
            vec![SqlParam::Int(document_id), SqlParam::Int(tag_id)],
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        user_id: Option<i64>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, user_id).await
    }

    #[allow(dead_code)]
    pub async fn post_raw(&self, path: &str, body: &'static str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        user_id: Option<i64>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, user_id).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        user_id: Option<i64>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, user_id).await
    }

    pub async fn get(&self, path: &str, user_id: Option<i64>) -> Result<hyper::Response<Body>> {
        let request = with_user(Request::builder().method(Method::GET).uri(path), user_id)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, user_id: Option<i64>) -> Result<hyper::Response<Body>> {
        let request = with_user(Request::builder().method(Method::DELETE).uri(path), user_id)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        user_id: Option<i64>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        let request = with_user(builder, user_id).body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn execute(&self, sql: &str, params: Vec<SqlParam>) -> Result<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.execute(&sql, &params)
                .with_context(|| format!("failed to run fixture statement: {sql}"))?;
            Ok(())
        })
        .await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut DbConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentRefs {
    pub created: Option<&'static str>,
    pub correspondent_id: Option<i64>,
    pub document_type_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub is_in_inbox: bool,
    pub deleted_at: Option<&'static str>,
}

fn optional_int(value: Option<i64>) -> SqlParam {
    value.map_or(SqlParam::NullableText(None), SqlParam::Int)
}

fn with_user(
    builder: axum::http::request::Builder,
    user_id: Option<i64>,
) -> axum::http::request::Builder {
    match user_id {
        Some(user_id) => builder
            .header("x-user-id", user_id.to_string())
            .header("x-username", format!("user{user_id}")),
        None => builder,
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn prepare_database(pool: &DbPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool.get()?;
        conn.run_migrations()?;
        conn.batch_execute(DOCUMENT_SCHEMA)
            .context("failed to create document tables")?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}
