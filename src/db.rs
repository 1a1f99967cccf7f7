use std::time::Duration;

use anyhow::{anyhow, Context};
use diesel::backend::Backend;
use diesel::connection::SimpleConnection;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection, R2D2Connection};
use diesel::serialize::ToSql;
use diesel::sql_types::{BigInt, Bool, HasSqlType, Nullable, Text};
use diesel::{QueryResult, QueryableByName, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

#[cfg(feature = "mysql")]
use diesel::mysql::{Mysql, MysqlConnection};
#[cfg(feature = "postgres")]
use diesel::pg::{Pg, PgConnection};
#[cfg(feature = "sqlite")]
use diesel::sqlite::{Sqlite, SqliteConnection};

use crate::dialect::{Engine, SqlDialect, UnsupportedEngine};

#[cfg(not(any(feature = "postgres", feature = "mysql", feature = "sqlite")))]
compile_error!("enable at least one of the `postgres`, `mysql` or `sqlite` features");

pub const DEFAULT_MAX_POOL_SIZE: u32 = 25;
pub const DEFAULT_MIN_IDLE: u32 = 5;
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(300);

#[cfg(feature = "postgres")]
const POSTGRES_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/postgres");
#[cfg(feature = "mysql")]
const MYSQL_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/mysql");
#[cfg(feature = "sqlite")]
const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_size: u32,
    pub min_idle: u32,
    pub max_lifetime: Duration,
    pub statement_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_POOL_SIZE,
            min_idle: DEFAULT_MIN_IDLE,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            statement_timeout: Duration::from_secs(15),
        }
    }
}

/// A bind parameter for a raw statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Int(i64),
    Text(String),
    NullableText(Option<String>),
    Bool(bool),
}

#[derive(Clone)]
pub enum DbPool {
    #[cfg(feature = "postgres")]
    Postgres(Pool<ConnectionManager<PgConnection>>),
    #[cfg(feature = "mysql")]
    Mysql(Pool<ConnectionManager<MysqlConnection>>),
    #[cfg(feature = "sqlite")]
    Sqlite(Pool<ConnectionManager<SqliteConnection>>),
}

pub enum DbConnection {
    #[cfg(feature = "postgres")]
    Postgres(PooledConnection<ConnectionManager<PgConnection>>),
    #[cfg(feature = "mysql")]
    Mysql(PooledConnection<ConnectionManager<MysqlConnection>>),
    #[cfg(feature = "sqlite")]
    Sqlite(PooledConnection<ConnectionManager<SqliteConnection>>),
}

// Expands `$body` once per compiled-in backend with `$conn` bound to the
// concrete diesel connection and `$db` naming its backend type.
macro_rules! with_backend {
    ($target:expr, |$conn:ident, $db:ident| $body:expr) => {
        match $target {
            #[cfg(feature = "postgres")]
            DbConnection::Postgres(pooled) => {
                #[allow(dead_code)]
                type $db = Pg;
                let $conn: &mut PgConnection = pooled;
                $body
            }
            #[cfg(feature = "mysql")]
            DbConnection::Mysql(pooled) => {
                #[allow(dead_code)]
                type $db = Mysql;
                let $conn: &mut MysqlConnection = pooled;
                $body
            }
            #[cfg(feature = "sqlite")]
            DbConnection::Sqlite(pooled) => {
                #[allow(dead_code)]
                type $db = Sqlite;
                let $conn: &mut SqliteConnection = pooled;
                $body
            }
        }
    };
}

#[cfg(feature = "postgres")]
pub trait PgRow: QueryableByName<Pg> {}
#[cfg(feature = "postgres")]
impl<T: QueryableByName<Pg>> PgRow for T {}
#[cfg(not(feature = "postgres"))]
pub trait PgRow {}
#[cfg(not(feature = "postgres"))]
impl<T> PgRow for T {}

#[cfg(feature = "mysql")]
pub trait MysqlRow: QueryableByName<Mysql> {}
#[cfg(feature = "mysql")]
impl<T: QueryableByName<Mysql>> MysqlRow for T {}
#[cfg(not(feature = "mysql"))]
pub trait MysqlRow {}
#[cfg(not(feature = "mysql"))]
impl<T> MysqlRow for T {}

#[cfg(feature = "sqlite")]
pub trait SqliteRow: QueryableByName<Sqlite> {}
#[cfg(feature = "sqlite")]
impl<T: QueryableByName<Sqlite>> SqliteRow for T {}
#[cfg(not(feature = "sqlite"))]
pub trait SqliteRow {}
#[cfg(not(feature = "sqlite"))]
impl<T> SqliteRow for T {}

/// A row type that can be read from every compiled-in backend.
pub trait DbRow: PgRow + MysqlRow + SqliteRow + Send + 'static {}
impl<T: PgRow + MysqlRow + SqliteRow + Send + 'static> DbRow for T {}

#[derive(QueryableByName)]
struct InsertedId {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

#[derive(QueryableByName)]
pub struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

impl DbPool {
    pub fn connect(engine: Engine, database_url: &str, settings: &PoolSettings) -> anyhow::Result<Self> {
        match engine {
            #[cfg(feature = "postgres")]
            Engine::Postgres => Ok(DbPool::Postgres(build_pool(database_url, settings)?)),
            #[cfg(feature = "mysql")]
            Engine::Mysql => Ok(DbPool::Mysql(build_pool(database_url, settings)?)),
            #[cfg(feature = "sqlite")]
            Engine::Sqlite => Ok(DbPool::Sqlite(build_pool(database_url, settings)?)),
            #[allow(unreachable_patterns)]
            other => Err(anyhow!(UnsupportedEngine(format!(
                "{other} (support not compiled in)"
            )))),
        }
    }

    pub fn engine(&self) -> Engine {
        match self {
            #[cfg(feature = "postgres")]
            DbPool::Postgres(_) => Engine::Postgres,
            #[cfg(feature = "mysql")]
            DbPool::Mysql(_) => Engine::Mysql,
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(_) => Engine::Sqlite,
        }
    }

    pub fn get(&self) -> anyhow::Result<DbConnection> {
        let conn = match self {
            #[cfg(feature = "postgres")]
            DbPool::Postgres(pool) => DbConnection::Postgres(
                pool.get().context("failed to check out a database connection")?,
            ),
            #[cfg(feature = "mysql")]
            DbPool::Mysql(pool) => DbConnection::Mysql(
                pool.get().context("failed to check out a database connection")?,
            ),
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(pool) => DbConnection::Sqlite(
                pool.get().context("failed to check out a database connection")?,
            ),
        };
        Ok(conn)
    }
}

fn build_pool<C>(
    database_url: &str,
    settings: &PoolSettings,
) -> anyhow::Result<Pool<ConnectionManager<C>>>
where
    C: R2D2Connection + Send + 'static,
    StatementDeadline: CustomizeConnection<C, diesel::r2d2::Error>,
{
    let manager = ConnectionManager::<C>::new(database_url);
    let max_size = settings.max_size.max(1);
    let pool = Pool::builder()
        .max_size(max_size)
        .min_idle(Some(settings.min_idle.min(max_size)))
        .max_lifetime(Some(settings.max_lifetime))
        .connection_timeout(Duration::from_secs(10))
        .connection_customizer(Box::new(StatementDeadline(settings.statement_timeout)))
        .build(manager)?;
    Ok(pool)
}

/// Applies the per-statement deadline to every new connection so a
/// request that times out does not leave its query running.
#[derive(Debug, Clone, Copy)]
struct StatementDeadline(Duration);

#[cfg(feature = "postgres")]
impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for StatementDeadline {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!("SET statement_timeout = {}", self.0.as_millis()))
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[cfg(feature = "mysql")]
impl CustomizeConnection<MysqlConnection, diesel::r2d2::Error> for StatementDeadline {
    fn on_acquire(&self, conn: &mut MysqlConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "SET SESSION max_execution_time = {}",
            self.0.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[cfg(feature = "sqlite")]
impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for StatementDeadline {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.0.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

fn bind_params<'f, DB>(
    mut query: BoxedSqlQuery<'f, DB, SqlQuery>,
    params: &[SqlParam],
) -> BoxedSqlQuery<'f, DB, SqlQuery>
where
    DB: Backend + HasSqlType<BigInt> + HasSqlType<Text> + HasSqlType<Bool>,
    i64: ToSql<BigInt, DB>,
    String: ToSql<Text, DB>,
    bool: ToSql<Bool, DB>,
    Option<String>: ToSql<Nullable<Text>, DB>,
{
    for param in params {
        query = match param {
            SqlParam::Int(value) => query.bind::<BigInt, _>(*value),
            SqlParam::Text(value) => query.bind::<Text, _>(value.clone()),
            SqlParam::NullableText(value) => query.bind::<Nullable<Text>, _>(value.clone()),
            SqlParam::Bool(value) => query.bind::<Bool, _>(*value),
        };
    }
    query
}

impl DbConnection {
    pub fn engine(&self) -> Engine {
        match self {
            #[cfg(feature = "postgres")]
            DbConnection::Postgres(_) => Engine::Postgres,
            #[cfg(feature = "mysql")]
            DbConnection::Mysql(_) => Engine::Mysql,
            #[cfg(feature = "sqlite")]
            DbConnection::Sqlite(_) => Engine::Sqlite,
        }
    }

    pub fn dialect(&self) -> &'static dyn SqlDialect {
        self.engine().dialect()
    }

    /// Runs `sql` with `params` bound in order and reads every row as `U`.
    pub fn load<U: DbRow>(&mut self, sql: &str, params: &[SqlParam]) -> QueryResult<Vec<U>> {
        tracing::trace!(sql, params = params.len(), "running query");
        with_backend!(self, |conn, Db| {
            bind_params(diesel::sql_query(sql).into_boxed::<Db>(), params).load::<U>(conn)
        })
    }

    pub fn load_optional<U: DbRow>(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> QueryResult<Option<U>> {
        Ok(self.load::<U>(sql, params)?.into_iter().next())
    }

    pub fn count(&mut self, sql: &str, params: &[SqlParam]) -> QueryResult<i64> {
        Ok(self
            .load_optional::<CountRow>(sql, params)?
            .map(|row| row.count)
            .unwrap_or(0))
    }

    pub fn execute(&mut self, sql: &str, params: &[SqlParam]) -> QueryResult<usize> {
        tracing::trace!(sql, params = params.len(), "running statement");
        with_backend!(self, |conn, Db| {
            bind_params(diesel::sql_query(sql).into_boxed::<Db>(), params).execute(conn)
        })
    }

    /// Runs an `INSERT` and returns the generated `id`.
    pub fn insert_returning_id(&mut self, sql: &str, params: &[SqlParam]) -> QueryResult<i64> {
        let dialect = self.dialect();
        let row = match dialect.last_insert_id_query() {
            None => {
                let returning = format!("{sql} RETURNING {} AS id", dialect.cast_bigint("id"));
                self.load_optional::<InsertedId>(&returning, params)?
            }
            Some(last_insert_id) => {
                self.execute(sql, params)?;
                self.load_optional::<InsertedId>(last_insert_id, &[])?
            }
        };
        row.map(|row| row.id).ok_or(diesel::result::Error::NotFound)
    }

    pub fn ping(&mut self) -> QueryResult<()> {
        let sql = format!("SELECT {} AS count", self.dialect().cast_bigint("1"));
        self.count(&sql, &[]).map(|_| ())
    }

    pub fn batch_execute(&mut self, sql: &str) -> QueryResult<()> {
        with_backend!(self, |conn, Db| conn.batch_execute(sql))
    }

    pub fn run_migrations(&mut self) -> anyhow::Result<()> {
        let applied = match self {
            #[cfg(feature = "postgres")]
            DbConnection::Postgres(conn) => {
                MigrationHarness::run_pending_migrations(&mut **conn, POSTGRES_MIGRATIONS)
                    .map(|versions| versions.len())
            }
            #[cfg(feature = "mysql")]
            DbConnection::Mysql(conn) => {
                MigrationHarness::run_pending_migrations(&mut **conn, MYSQL_MIGRATIONS)
                    .map(|versions| versions.len())
            }
            #[cfg(feature = "sqlite")]
            DbConnection::Sqlite(conn) => {
                MigrationHarness::run_pending_migrations(&mut **conn, SQLITE_MIGRATIONS)
                    .map(|versions| versions.len())
            }
        }
        .map_err(|err| anyhow!("failed to run migrations: {err}"))?;

        tracing::info!(engine = %self.engine(), applied, "database migrations up to date");
        Ok(())
    }
}
