//! MySQL and PostgreSQL backend over `sqlx`.
//!
//! One single-connection pool per invocation. Catalog reads go through
//! `information_schema`; identifiers are quoted by [`Dialect`] and every
//! literal is bound as a parameter.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode, Postgres};
use sqlx::query_builder::Separated;
use sqlx::{Column, QueryBuilder, Row as _, TypeInfo, ValueRef};
use uuid::Uuid;

use super::{Backend, RowSelection};
use crate::catalog::{ColumnInfo, ForeignKey, TableDescriptor};
use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};
use crate::value::{Row, Value};

/// Upper bound on bind parameters per INSERT statement.
const MAX_BINDS_PER_STATEMENT: usize = 60_000;
const MAX_ROWS_PER_STATEMENT: usize = 1_000;

const MYSQL_COLUMNS_SQL: &str = "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR), \
            CAST(IS_NULLABLE AS CHAR), CAST(COLUMN_COMMENT AS CHAR) \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

// User-defined types are schema-qualified so casts resolve without `search_path`.
const PG_COLUMNS_SQL: &str = "SELECT column_name::text, \
            CASE WHEN data_type = 'USER-DEFINED' \
                      THEN quote_ident(udt_schema::text) || '.' || quote_ident(udt_name::text) \
                 WHEN data_type = 'ARRAY' THEN udt_name::text \
                 ELSE data_type::text END, \
            is_nullable::text, \
            COALESCE(col_description(format('%I.%I', table_schema, table_name)::regclass, \
                                     ordinal_position::int), '') \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

/// One row per constraint column: name, column, referenced schema, table and
/// column, update rule, delete rule.
const MYSQL_FOREIGN_KEYS_SQL: &str = "SELECT CAST(k.CONSTRAINT_NAME AS CHAR), CAST(k.COLUMN_NAME AS CHAR), \
            CAST(k.REFERENCED_TABLE_SCHEMA AS CHAR), CAST(k.REFERENCED_TABLE_NAME AS CHAR), \
            CAST(k.REFERENCED_COLUMN_NAME AS CHAR), CAST(r.UPDATE_RULE AS CHAR), CAST(r.DELETE_RULE AS CHAR) \
     FROM information_schema.KEY_COLUMN_USAGE k \
     JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
       ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA \
      AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
      AND r.TABLE_NAME = k.TABLE_NAME \
     WHERE k.TABLE_SCHEMA = ? AND k.TABLE_NAME = ? AND k.REFERENCED_TABLE_NAME IS NOT NULL \
     ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION";

const PG_FOREIGN_KEYS_SQL: &str = "SELECT c.conname::text, a.attname::text, fn.nspname::text, ft.relname::text, \
            fa.attname::text, \
            CASE c.confupdtype WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL' \
                 WHEN 'd' THEN 'SET DEFAULT' WHEN 'r' THEN 'RESTRICT' ELSE 'NO ACTION' END, \
            CASE c.confdeltype WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL' \
                 WHEN 'd' THEN 'SET DEFAULT' WHEN 'r' THEN 'RESTRICT' ELSE 'NO ACTION' END \
     FROM pg_constraint c \
     JOIN pg_class t ON t.oid = c.conrelid \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     JOIN pg_class ft ON ft.oid = c.confrelid \
     JOIN pg_namespace fn ON fn.oid = ft.relnamespace \
     CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, fattnum, ord) \
     JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum \
     JOIN pg_attribute fa ON fa.attrelid = c.confrelid AND fa.attnum = k.fattnum \
     WHERE c.contype = 'f' AND n.nspname = $1 AND t.relname = $2 \
     ORDER BY c.conname, k.ord";

/// Objects a MySQL schema rename would leave behind in the dropped database.
const MYSQL_RENAME_BLOCKERS_SQL: &str = "SELECT CAST(CONCAT('view ', TABLE_NAME) AS CHAR) \
       FROM information_schema.VIEWS WHERE TABLE_SCHEMA = ? \
     UNION ALL SELECT CAST(CONCAT(LOWER(ROUTINE_TYPE), ' ', ROUTINE_NAME) AS CHAR) \
       FROM information_schema.ROUTINES WHERE ROUTINE_SCHEMA = ? \
     UNION ALL SELECT CAST(CONCAT('trigger ', TRIGGER_NAME) AS CHAR) \
       FROM information_schema.TRIGGERS WHERE TRIGGER_SCHEMA = ? \
     UNION ALL SELECT CAST(CONCAT('event ', EVENT_NAME) AS CHAR) \
       FROM information_schema.EVENTS WHERE EVENT_SCHEMA = ?";

enum Pool {
    Mysql(MySqlPool),
    Postgres(PgPool),
}

/// [`Backend`] backed by a live MySQL or PostgreSQL server.
pub struct SqlxBackend {
    pool: Pool,
    dialect: Dialect,
}

impl SqlxBackend {
    /// Connect using explicit settings. Any failure is a `Connection` error.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        tracing::info!(
            backend = %config.backend,
            host = %config.host,
            port = config.port(),
            user = config.user(),
            "connecting"
        );
        let pool = match config.backend {
            Dialect::Mysql => {
                let options = MySqlConnectOptions::new()
                    .host(&config.host)
                    .port(config.port())
                    .username(config.user())
                    .password(config.password())
                    .ssl_mode(if config.use_tls {
                        MySqlSslMode::Required
                    } else {
                        MySqlSslMode::Disabled
                    });
                let pool = MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(config.connect_timeout())
                    .connect_with(options)
                    .await
                    .map_err(|e| MigrateError::Connection(e.to_string()))?;
                Pool::Mysql(pool)
            }
            Dialect::Postgresql => {
                let options = PgConnectOptions::new()
                    .host(&config.host)
                    .port(config.port())
                    .username(config.user())
                    .password(config.password())
                    .database(&config.database)
                    .ssl_mode(if config.use_tls {
                        PgSslMode::Require
                    } else {
                        PgSslMode::Disable
                    });
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(config.connect_timeout())
                    .connect_with(options)
                    .await
                    .map_err(|e| MigrateError::Connection(e.to_string()))?;
                Pool::Postgres(pool)
            }
        };
        Ok(Self {
            pool,
            dialect: config.backend,
        })
    }

    /// Run a statement with no result set.
    async fn execute(&self, sql: &str) -> Result<u64> {
        tracing::debug!(sql, "execute");
        let affected = match &self.pool {
            Pool::Mysql(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
            Pool::Postgres(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
        };
        Ok(affected)
    }

    /// Run a catalog query whose columns are all text, binding string parameters.
    async fn text_rows(&self, sql: &str, binds: &[&str]) -> Result<Vec<Vec<String>>> {
        tracing::debug!(sql, ?binds, "catalog query");
        let rows = match &self.pool {
            Pool::Mysql(pool) => {
                let mut query = sqlx::query(sql);
                for b in binds {
                    query = query.bind(b.to_string());
                }
                let rows = query.fetch_all(pool).await?;
                rows.iter()
                    .map(|r| {
                        (0..r.len())
                            .map(|i| r.try_get::<Option<String>, _>(i).map(Option::unwrap_or_default))
                            .collect::<std::result::Result<Vec<_>, _>>()
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            Pool::Postgres(pool) => {
                let mut query = sqlx::query(sql);
                for b in binds {
                    query = query.bind(b.to_string());
                }
                let rows = query.fetch_all(pool).await?;
                rows.iter()
                    .map(|r| {
                        (0..r.len())
                            .map(|i| r.try_get::<Option<String>, _>(i).map(Option::unwrap_or_default))
                            .collect::<std::result::Result<Vec<_>, _>>()
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// Run a `SELECT COUNT(*)`-style query.
    async fn count(&self, sql: &str, binds: &[&str]) -> Result<u64> {
        tracing::debug!(sql, ?binds, "count");
        let n: i64 = match &self.pool {
            Pool::Mysql(pool) => {
                let mut query = sqlx::query_scalar::<_, i64>(sql);
                for b in binds {
                    query = query.bind(b.to_string());
                }
                query.fetch_one(pool).await?
            }
            Pool::Postgres(pool) => {
                let mut query = sqlx::query_scalar::<_, i64>(sql);
                for b in binds {
                    query = query.bind(b.to_string());
                }
                query.fetch_one(pool).await?
            }
        };
        Ok(n.max(0) as u64)
    }

    async fn primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let sql = match self.dialect {
            Dialect::Mysql => {
                "SELECT CAST(COLUMN_NAME AS CHAR) FROM information_schema.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
                 ORDER BY ORDINAL_POSITION"
            }
            Dialect::Postgresql => {
                "SELECT kcu.column_name::text \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                  AND tc.table_name = kcu.table_name \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
                   AND tc.table_schema = $1 AND tc.table_name = $2 \
                 ORDER BY kcu.ordinal_position"
            }
        };
        let rows = self.text_rows(sql, &[schema, table]).await?;
        Ok(rows.into_iter().filter_map(|mut r| r.drain(..).next()).collect())
    }

    async fn foreign_keys(&self, schema: &str, table: &str) -> Result<Vec<ForeignKey>> {
        let sql = match self.dialect {
            Dialect::Mysql => MYSQL_FOREIGN_KEYS_SQL,
            Dialect::Postgresql => PG_FOREIGN_KEYS_SQL,
        };
        let rows = self.text_rows(sql, &[schema, table]).await?;
        group_foreign_keys(schema, rows)
    }

    fn select_sql(&self, schema: &str, table: &TableDescriptor, selection: &RowSelection) -> (String, Vec<Value>) {
        let d = self.dialect;
        let columns = if selection.columns.is_empty() {
            table.column_names()
        } else {
            selection.columns.clone()
        };
        let cols: Vec<String> = columns.iter().map(|c| d.quote_identifier(c)).collect();
        let mut sql = format!("SELECT {} FROM {}", cols.join(", "), d.qualified(schema, &table.name));

        let mut params = Vec::new();
        if let Some(filter) = &selection.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.to_sql(d, table, &mut params));
        }
        if !selection.order_by.is_empty() {
            let order: Vec<String> = selection.order_by.iter().map(|c| d.quote_identifier(c)).collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        if let Some(limit) = selection.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        (sql, params)
    }
}

#[async_trait]
impl Backend for SqlxBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn schema_exists(&mut self, schema: &str) -> Result<bool> {
        let sql = match self.dialect {
            Dialect::Mysql => "SELECT COUNT(*) FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
            Dialect::Postgresql => "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = $1",
        };
        Ok(self.count(sql, &[schema]).await? > 0)
    }

    async fn list_schemas(&mut self, prefix: &str) -> Result<Vec<String>> {
        let sql = match self.dialect {
            Dialect::Mysql => {
                "SELECT CAST(SCHEMA_NAME AS CHAR) FROM information_schema.SCHEMATA \
                 WHERE SCHEMA_NAME LIKE ? ORDER BY SCHEMA_NAME"
            }
            Dialect::Postgresql => {
                "SELECT schema_name::text FROM information_schema.schemata \
                 WHERE schema_name LIKE $1 ORDER BY schema_name"
            }
        };
        let pattern = format!("{}%", escape_like(prefix));
        let mut schemas: Vec<String> = self
            .text_rows(sql, &[&pattern])
            .await?
            .into_iter()
            .filter_map(|mut r| r.drain(..).next())
            .filter(|s| s.starts_with(prefix))
            .collect();
        schemas.sort();
        Ok(schemas)
    }

    async fn table_names(&mut self, schema: &str) -> Result<Vec<String>> {
        let sql = match self.dialect {
            Dialect::Mysql => {
                "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'"
            }
            Dialect::Postgresql => {
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE'"
            }
        };
        let mut tables: Vec<String> = self
            .text_rows(sql, &[schema])
            .await?
            .into_iter()
            .filter_map(|mut r| r.drain(..).next())
            .collect();
        // Sort here rather than in SQL so the order does not depend on collation.
        tables.sort();
        Ok(tables)
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<TableDescriptor> {
        let sql = match self.dialect {
            Dialect::Mysql => MYSQL_COLUMNS_SQL,
            Dialect::Postgresql => PG_COLUMNS_SQL,
        };
        let rows = self.text_rows(sql, &[schema, table]).await?;
        if rows.is_empty() {
            return Err(MigrateError::TableNotFound {
                schema: schema.to_string(),
                table: table.to_string(),
            });
        }

        let mut descriptor = TableDescriptor::new(table);
        for r in rows {
            let [name, column_type, nullable, comment]: [String; 4] = r
                .try_into()
                .map_err(|_| MigrateError::Query("unexpected catalog row shape".to_string()))?;
            descriptor.columns.push(ColumnInfo {
                name,
                column_type,
                nullable: nullable == "YES",
                comment,
            });
        }
        descriptor.primary_key = self.primary_key(schema, table).await?;
        descriptor.foreign_keys = self.foreign_keys(schema, table).await?;

        let count_sql = format!("SELECT COUNT(*) FROM {}", self.dialect.qualified(schema, table));
        descriptor.row_count = self.count(&count_sql, &[]).await?;
        Ok(descriptor)
    }

    async fn create_schema(&mut self, schema: &str) -> Result<()> {
        if self.schema_exists(schema).await? {
            return Err(MigrateError::SchemaExists(schema.to_string()));
        }
        self.execute(&self.dialect.create_schema(schema)).await?;
        Ok(())
    }

    async fn drop_schema(&mut self, schema: &str) -> Result<()> {
        self.execute(&self.dialect.drop_schema(schema)).await?;
        Ok(())
    }

    async fn create_table_like(&mut self, source: &str, dest: &str, table: &str) -> Result<()> {
        self.execute(&self.dialect.create_table_like(source, dest, table)).await?;
        Ok(())
    }

    async fn add_foreign_key(&mut self, schema: &str, table: &str, fk: &ForeignKey) -> Result<()> {
        self.execute(&self.dialect.add_foreign_key(schema, table, fk)).await?;
        Ok(())
    }

    async fn fetch_rows(
        &mut self,
        schema: &str,
        table: &TableDescriptor,
        selection: &RowSelection,
    ) -> Result<Vec<Row>> {
        let (sql, params) = self.select_sql(schema, table, selection);
        tracing::debug!(sql = %sql, params = params.len(), "fetch rows");
        match &self.pool {
            Pool::Mysql(pool) => {
                let mut query = sqlx::query(&sql);
                for p in &params {
                    query = bind_mysql(query, p);
                }
                let rows = query.fetch_all(pool).await?;
                rows.iter().map(decode_mysql_row).collect()
            }
            Pool::Postgres(pool) => {
                let mut query = sqlx::query(&sql);
                for p in &params {
                    query = bind_pg(query, p);
                }
                let rows = query.fetch_all(pool).await?;
                rows.iter().map(decode_pg_row).collect()
            }
        }
    }

    async fn insert_rows(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let d = self.dialect;
        let cols: Vec<String> = columns.iter().map(|c| d.quote_identifier(c)).collect();
        let head = format!("INSERT INTO {} ({}) ", d.qualified(schema, table), cols.join(", "));
        let chunk = (MAX_BINDS_PER_STATEMENT / columns.len().max(1)).clamp(1, MAX_ROWS_PER_STATEMENT);
        tracing::debug!(sql = %head, rows = rows.len(), chunk, "insert rows");

        let mut inserted = 0u64;
        match &self.pool {
            Pool::Mysql(pool) => {
                let mut tx = pool.begin().await?;
                for batch in rows.chunks(chunk) {
                    let mut qb = QueryBuilder::<MySql>::new(&head);
                    qb.push_values(batch, |mut b, row| {
                        for v in row {
                            push_mysql(&mut b, v);
                        }
                    });
                    inserted += qb.build().execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            }
            Pool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for batch in rows.chunks(chunk) {
                    let mut qb = QueryBuilder::<Postgres>::new(&head);
                    qb.push_values(batch, |mut b, row| {
                        for v in row {
                            push_pg(&mut b, v);
                        }
                    });
                    inserted += qb.build().execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            }
        }
        Ok(inserted)
    }

    async fn rename_schema(&mut self, from: &str, to: &str) -> Result<()> {
        let blockers = self.rename_blockers(from).await?;
        if !blockers.is_empty() {
            return Err(MigrateError::Query(format!(
                "`{}` holds {}; they would be lost by the rename",
                from,
                blockers.join(", ")
            )));
        }
        let tables = match self.dialect {
            Dialect::Mysql => self.table_names(from).await?,
            Dialect::Postgresql => Vec::new(),
        };
        for stmt in self.dialect.rename_schema(from, to, &tables) {
            self.execute(&stmt).await?;
        }
        Ok(())
    }

    async fn rename_blockers(&mut self, schema: &str) -> Result<Vec<String>> {
        match self.dialect {
            Dialect::Mysql => Ok(self
                .text_rows(MYSQL_RENAME_BLOCKERS_SQL, &[schema, schema, schema, schema])
                .await?
                .into_iter()
                .filter_map(|mut r| r.drain(..).next())
                .collect()),
            // ALTER SCHEMA .. RENAME carries every object along.
            Dialect::Postgresql => Ok(Vec::new()),
        }
    }

    async fn active_connections(&mut self, schema: &str) -> Result<u64> {
        let sql = match self.dialect {
            Dialect::Mysql => {
                "SELECT COUNT(*) FROM information_schema.PROCESSLIST \
                 WHERE DB = ? AND COMMAND <> 'Sleep' AND ID <> CONNECTION_ID()"
            }
            // Postgres sessions are per database, so look for the schema in the running query.
            Dialect::Postgresql => {
                "SELECT COUNT(*) FROM pg_stat_activity \
                 WHERE datname = current_database() AND pid <> pg_backend_pid() \
                   AND state IS DISTINCT FROM 'idle' AND position($1 in query) > 0"
            }
        };
        self.count(sql, &[schema]).await
    }
}

/// Fold per-column catalog rows (ordered by constraint, then position) into
/// foreign keys. References into `schema` itself are stored as local.
fn group_foreign_keys(schema: &str, rows: Vec<Vec<String>>) -> Result<Vec<ForeignKey>> {
    let mut keys: Vec<ForeignKey> = Vec::new();
    for r in rows {
        let [name, column, ref_schema, ref_table, ref_column, on_update, on_delete]: [String; 7] = r
            .try_into()
            .map_err(|_| MigrateError::Query("unexpected foreign key row shape".to_string()))?;
        match keys.last_mut() {
            Some(fk) if fk.name == name => {
                fk.columns.push(column);
                fk.referenced_columns.push(ref_column);
            }
            _ => keys.push(ForeignKey {
                name,
                columns: vec![column],
                referenced_schema: (ref_schema != schema).then_some(ref_schema),
                referenced_table: ref_table,
                referenced_columns: vec![ref_column],
                on_update,
                on_delete,
            }),
        }
    }
    Ok(keys)
}

/// Escape `LIKE` wildcards so a prefix matches literally.
fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

macro_rules! try_decode {
    ($row:expr, $idx:expr, $($ty:ty => $wrap:expr),+ $(,)?) => {
        $(
            if let Ok(Some(v)) = $row.try_get::<Option<$ty>, _>($idx) {
                return Ok($wrap(v));
            }
        )+
    };
}

fn decode_mysql_value(row: &MySqlRow, idx: usize) -> Result<Value> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }
    try_decode!(row, idx,
        i64 => Value::Int,
        u64 => Value::UInt,
        f64 => Value::Float,
        f32 => |v: f32| Value::Float(v as f64),
        Decimal => Value::Decimal,
        NaiveDateTime => Value::DateTime,
        NaiveDate => Value::Date,
        NaiveTime => Value::Time,
        bool => Value::Bool,
        String => Value::Text,
        Vec<u8> => Value::Bytes,
    );
    Err(unsupported(row.column(idx)))
}

fn decode_pg_value(row: &PgRow, idx: usize) -> Result<Value> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }
    try_decode!(row, idx,
        i64 => Value::Int,
        i32 => |v: i32| Value::Int(v as i64),
        i16 => |v: i16| Value::Int(v as i64),
        f64 => Value::Float,
        f32 => |v: f32| Value::Float(v as f64),
        Decimal => Value::Decimal,
        bool => Value::Bool,
        NaiveDateTime => Value::DateTime,
        DateTime<Utc> => Value::Timestamp,
        NaiveDate => Value::Date,
        NaiveTime => Value::Time,
        Uuid => Value::Uuid,
        String => Value::Text,
        Vec<u8> => Value::Bytes,
    );
    Err(unsupported(row.column(idx)))
}

fn unsupported<C: Column>(column: &C) -> MigrateError {
    MigrateError::Query(format!(
        "unsupported column type {} for `{}`",
        column.type_info().name(),
        column.name()
    ))
}

fn decode_mysql_row(row: &MySqlRow) -> Result<Row> {
    (0..row.len()).map(|i| decode_mysql_value(row, i)).collect()
}

fn decode_pg_row(row: &PgRow) -> Result<Row> {
    (0..row.len()).map(|i| decode_pg_value(row, i)).collect()
}

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>;
type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

fn bind_mysql<'q>(query: MySqlQuery<'q>, value: &Value) -> MySqlQuery<'q> {
    match value.clone() {
        Value::Null => query.bind(None::<String>),
        Value::Int(v) => query.bind(v),
        Value::UInt(v) => query.bind(v),
        Value::Float(v) => query.bind(v),
        Value::Decimal(v) => query.bind(v),
        Value::Bool(v) => query.bind(v),
        Value::Text(v) => query.bind(v),
        Value::Bytes(v) => query.bind(v),
        Value::Date(v) => query.bind(v),
        Value::Time(v) => query.bind(v),
        Value::DateTime(v) => query.bind(v),
        Value::Timestamp(v) => query.bind(v),
        Value::Uuid(v) => query.bind(v.to_string()),
    }
}

fn bind_pg<'q>(query: PgQuery<'q>, value: &Value) -> PgQuery<'q> {
    match value.clone() {
        Value::Null => query.bind(None::<String>),
        Value::Int(v) => query.bind(v),
        Value::UInt(v) => query.bind(Decimal::from(v)),
        Value::Float(v) => query.bind(v),
        Value::Decimal(v) => query.bind(v),
        Value::Bool(v) => query.bind(v),
        Value::Text(v) => query.bind(v),
        Value::Bytes(v) => query.bind(v),
        Value::Date(v) => query.bind(v),
        Value::Time(v) => query.bind(v),
        Value::DateTime(v) => query.bind(v),
        Value::Timestamp(v) => query.bind(v),
        Value::Uuid(v) => query.bind(v),
    }
}

// NULL is written as a literal: a typed NULL parameter can clash with the
// column type on PostgreSQL.
fn push_mysql(b: &mut Separated<'_, '_, MySql, &'static str>, value: &Value) {
    match value.clone() {
        Value::Null => {
            b.push("NULL");
        }
        Value::Int(v) => {
            b.push_bind(v);
        }
        Value::UInt(v) => {
            b.push_bind(v);
        }
        Value::Float(v) => {
            b.push_bind(v);
        }
        Value::Decimal(v) => {
            b.push_bind(v);
        }
        Value::Bool(v) => {
            b.push_bind(v);
        }
        Value::Text(v) => {
            b.push_bind(v);
        }
        Value::Bytes(v) => {
            b.push_bind(v);
        }
        Value::Date(v) => {
            b.push_bind(v);
        }
        Value::Time(v) => {
            b.push_bind(v);
        }
        Value::DateTime(v) => {
            b.push_bind(v);
        }
        Value::Timestamp(v) => {
            b.push_bind(v);
        }
        Value::Uuid(v) => {
            b.push_bind(v.to_string());
        }
    }
}

fn push_pg(b: &mut Separated<'_, '_, Postgres, &'static str>, value: &Value) {
    match value.clone() {
        Value::Null => {
            b.push("NULL");
        }
        Value::Int(v) => {
            b.push_bind(v);
        }
        Value::UInt(v) => {
            b.push_bind(Decimal::from(v));
        }
        Value::Float(v) => {
            b.push_bind(v);
        }
        Value::Decimal(v) => {
            b.push_bind(v);
        }
        Value::Bool(v) => {
            b.push_bind(v);
        }
        Value::Text(v) => {
            b.push_bind(v);
        }
        Value::Bytes(v) => {
            b.push_bind(v);
        }
        Value::Date(v) => {
            b.push_bind(v);
        }
        Value::Time(v) => {
            b.push_bind(v);
        }
        Value::DateTime(v) => {
            b.push_bind(v);
        }
        Value::Timestamp(v) => {
            b.push_bind(v);
        }
        Value::Uuid(v) => {
            b.push_bind(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk_row(name: &str, column: &str, ref_schema: &str, ref_table: &str) -> Vec<String> {
        [name, column, ref_schema, ref_table, column, "CASCADE", "RESTRICT"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_group_foreign_keys() {
        let rows = vec![
            fk_row("fk_session", "subject_id", "lab", "session"),
            fk_row("fk_session", "session_idx", "lab", "session"),
            fk_row("fk_rig", "rig_id", "common", "rig"),
        ];
        let keys = group_foreign_keys("lab", rows).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].columns, vec!["subject_id", "session_idx"]);
        assert_eq!(keys[0].referenced_schema, None);
        assert_eq!(keys[1].referenced_schema.as_deref(), Some("common"));
        assert!(group_foreign_keys("lab", vec![vec!["short".to_string()]]).is_err());
    }

    #[test]
    fn test_pg_columns_qualify_user_types() {
        assert!(PG_COLUMNS_SQL.contains("quote_ident(udt_schema::text) || '.' || quote_ident(udt_name::text)"));
        assert!(MYSQL_RENAME_BLOCKERS_SQL.matches('?').count() == 4);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("tutorial_"), "tutorial\\_");
        assert_eq!(escape_like("50%"), "50\\%");
        assert_eq!(escape_like("plain"), "plain");
    }
}
