//! PostGIS reader and writer.
//!
//! Connections go through a deadpool pool, optionally over rustls TLS.
//! Reading discovers the geometry column and SRID from `geometry_columns`
//! and the attribute schema from `information_schema`. Writing creates the
//! target table when absent and loads features in concurrent COPY batches,
//! one transaction per batch; a failed batch does not roll back batches
//! that already committed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime, Timeouts};
use futures::SinkExt;
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::crs;
use crate::error::GuotuError;
use crate::types::{AttrValue, Feature, Field, FieldKind, FieldValue, GeometryKind, Layer};
use crate::wkt;

/// Geometry column created by the writer
const GEOMETRY_COLUMN: &str = "geom";
/// Serial key column created by the writer
const KEY_COLUMN: &str = "gid";
/// Features per COPY batch
const BATCH_SIZE: usize = 1000;

/// SSL mode for the PostgreSQL connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    #[default]
    Disable,
    Prefer,
    Require,
}

impl FromStr for SslMode {
    type Err = GuotuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" | "off" | "false" | "no" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" | "on" | "true" | "yes" => Ok(SslMode::Require),
            _ => Err(GuotuError::format_error(format!(
                "invalid SSL mode '{s}', use disable, prefer or require"
            ))),
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SslMode::Disable => f.write_str("disable"),
            SslMode::Prefer => f.write_str("prefer"),
            SslMode::Require => f.write_str("require"),
        }
    }
}

/// PostGIS connection parameters.
///
/// Parses from and renders to the `PG:host=... port=... dbname=...`
/// connection string form.
#[derive(Debug, Clone)]
pub struct PgConnInfo {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub schema: String,
    pub pool_size: usize,
    pub ssl_mode: SslMode,
}

impl Default for PgConnInfo {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            dbname: "postgres".into(),
            user: "postgres".into(),
            password: None,
            schema: "public".into(),
            pool_size: 16,
            ssl_mode: SslMode::Disable,
        }
    }
}

impl PgConnInfo {
    /// Loads connection parameters from the standard `PG*` environment
    /// variables; absent ones keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("PGHOST").unwrap_or(defaults.host),
            port: std::env::var("PGPORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("PGDATABASE").unwrap_or(defaults.dbname),
            user: std::env::var("PGUSER").unwrap_or(defaults.user),
            password: std::env::var("PGPASSWORD").ok(),
            schema: std::env::var("PGSCHEMA").unwrap_or(defaults.schema),
            pool_size: std::env::var("POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pool_size),
            ssl_mode: std::env::var("PGSSLMODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }
}

impl FromStr for PgConnInfo {
    type Err = GuotuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim().strip_prefix("PG:").unwrap_or(s.trim());
        let mut info = Self::default();
        for token in body.split_whitespace() {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                GuotuError::format_error(format!(
                    "malformed connection token '{token}' (expected key=value)"
                ))
            })?;
            match key.to_ascii_lowercase().as_str() {
                "host" => info.host = value.to_string(),
                "port" => {
                    info.port = value.parse().map_err(|_| {
                        GuotuError::format_error(format!("invalid port '{value}'"))
                    })?
                }
                "dbname" | "database" => info.dbname = value.to_string(),
                "user" => info.user = value.to_string(),
                "password" | "passwd" => info.password = Some(value.to_string()),
                "schemas" | "schema" | "active_schema" => info.schema = value.to_string(),
                "sslmode" => info.ssl_mode = value.parse()?,
                other => {
                    tracing::warn!(key = other, "Unknown connection parameter ignored");
                }
            }
        }
        Ok(info)
    }
}

impl fmt::Display for PgConnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PG:host={} port={} dbname={} user={}",
            self.host, self.port, self.dbname, self.user
        )?;
        if let Some(password) = &self.password {
            write!(f, " password={password}")?;
        }
        write!(f, " active_schema={}", self.schema)
    }
}

fn make_tls_connector() -> MakeRustlsConnect {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    MakeRustlsConnect::new(config)
}

/// Creates a connection pool for the given parameters
pub async fn create_pool(info: &PgConnInfo) -> Result<Pool, GuotuError> {
    let mut cfg = Config::new();
    cfg.host = Some(info.host.clone());
    cfg.port = Some(info.port);
    cfg.dbname = Some(info.dbname.clone());
    cfg.user = Some(info.user.clone());
    cfg.password = info.password.clone();
    cfg.pool = Some(PoolConfig {
        max_size: info.pool_size,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(30)),
            create: Some(Duration::from_secs(10)),
            recycle: Some(Duration::from_secs(30)),
        },
        ..Default::default()
    });

    let pool = match info.ssl_mode {
        SslMode::Disable => cfg.create_pool(Some(Runtime::Tokio1), NoTls),
        SslMode::Prefer | SslMode::Require => {
            cfg.create_pool(Some(Runtime::Tokio1), make_tls_connector())
        }
    }
    .map_err(|e| GuotuError::data_source(format!("cannot create database pool: {e}")))?;
    tracing::debug!(host = %info.host, dbname = %info.dbname, "Database pool created");
    Ok(pool)
}

/// Runs a trivial query to verify the pool can reach the database
pub async fn test_connection(pool: &Pool) -> Result<(), GuotuError> {
    let client = pool.get().await?;
    client.execute("SELECT 1", &[]).await?;
    Ok(())
}

/// True when the table exists in the schema
pub async fn table_exists(pool: &Pool, schema: &str, table: &str) -> Result<bool, GuotuError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)",
            &[&schema, &table],
        )
        .await?;
    Ok(row.get(0))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Reads a PostGIS table into a layer.
///
/// `where_clause` is passed through as SQL; `bbox` is `[min x, min y,
/// max x, max y]` in the table's CRS and becomes an `ST_Intersects`
/// envelope filter.
pub async fn read_layer(
    pool: &Pool,
    schema: &str,
    table: &str,
    where_clause: Option<&str>,
    bbox: Option<[f64; 4]>,
) -> Result<Layer, GuotuError> {
    let client = pool.get().await?;

    let geometry_row = client
        .query_opt(
            "SELECT f_geometry_column, srid, type FROM geometry_columns \
             WHERE f_table_schema = $1 AND f_table_name = $2",
            &[&schema, &table],
        )
        .await?
        .ok_or_else(|| {
            GuotuError::data_source(format!(
                "table {schema}.{table} has no registered geometry column"
            ))
        })?;
    let geometry_column: String = geometry_row.get(0);
    let srid: i32 = geometry_row.get(1);
    let type_name: String = geometry_row.get(2);

    let wkid = u32::try_from(srid)
        .map_err(|_| GuotuError::crs_unsupported(format!("negative SRID {srid}")))?;
    let crs = crs::lookup(wkid)?;
    let tolerance = crs::tolerance(&crs);
    let decimals = wkt::decimals_for_tolerance(tolerance);

    let column_rows = client
        .query(
            "SELECT column_name, data_type, character_maximum_length, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await?;

    let mut fields = Vec::new();
    let mut has_key = false;
    for row in &column_rows {
        let name: String = row.get(0);
        if name == geometry_column {
            continue;
        }
        if name == KEY_COLUMN {
            has_key = true;
            continue;
        }
        let data_type: String = row.get(1);
        let max_length: Option<i32> = row.get(2);
        let nullable: String = row.get(3);
        let mut field = Field::new(name, field_kind_for(&data_type));
        field.length = max_length.and_then(|l| u32::try_from(l).ok());
        field.nullable = Some(nullable == "YES");
        fields.push(field);
    }

    // geometry first, then the optional key, then one expression per field
    let mut select = vec![format!("ST_AsBinary({})", quote_ident(&geometry_column))];
    if has_key {
        select.push(format!("{}::text", quote_ident(KEY_COLUMN)));
    }
    for field in &fields {
        select.push(select_expr(field));
    }

    let mut sql = format!(
        "SELECT {} FROM {}.{}",
        select.join(", "),
        quote_ident(schema),
        quote_ident(table)
    );
    let mut filters = Vec::new();
    if let Some(clause) = where_clause {
        filters.push(format!("({clause})"));
    }
    if let Some([min_x, min_y, max_x, max_y]) = bbox {
        filters.push(format!(
            "ST_Intersects({}, ST_MakeEnvelope({min_x}, {min_y}, {max_x}, {max_y}, {srid}))",
            quote_ident(&geometry_column)
        ));
    }
    if !filters.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&filters.join(" AND "));
    }

    tracing::debug!(schema, table, "Reading PostGIS table");
    let rows = client.query(&sql, &[]).await?;

    let value_base = if has_key { 2 } else { 1 };
    let mut features = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut feature = if has_key {
            match row.try_get::<_, Option<String>>(1)? {
                Some(id) => Feature::with_id(id),
                None => Feature::generated(),
            }
        } else {
            Feature::generated()
        };
        if let Some(data) = row.try_get::<_, Option<Vec<u8>>>(0)? {
            let geom = wkb::wkb_to_geom(&mut data.as_slice())
                .map_err(|e| GuotuError::format_error(format!("invalid WKB geometry: {e:?}")))?;
            feature.geometry = Some(wkt::to_wkt(&wkt::round_geometry(&geom, decimals)));
        }
        feature.values = fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                Ok(FieldValue::new(
                    field.clone(),
                    attr_from_row(row, value_base + i, field.kind)?,
                ))
            })
            .collect::<Result<_, GuotuError>>()?;
        features.push(feature);
    }

    tracing::debug!(schema, table, features = features.len(), "PostGIS table read");
    Ok(Layer {
        name: Some(table.to_string()),
        alias: Some(table.to_string()),
        wkid: Some(wkid),
        geometry_kind: Some(GeometryKind::from_name(&type_name)),
        tolerance: Some(tolerance),
        fields,
        features,
        metadata: None,
    })
}

fn field_kind_for(data_type: &str) -> FieldKind {
    match data_type {
        "smallint" | "integer" => FieldKind::Integer,
        "bigint" => FieldKind::Long,
        "double precision" | "real" | "numeric" => FieldKind::Double,
        "bytea" => FieldKind::Binary,
        "date" => FieldKind::Date,
        "time without time zone" | "time with time zone" => FieldKind::Time,
        "timestamp without time zone" | "timestamp with time zone" => FieldKind::DateTime,
        _ => FieldKind::String,
    }
}

/// Select expression for one field, casting to a wire type the row
/// decoder understands without driver extensions.
fn select_expr(field: &Field) -> String {
    let ident = quote_ident(&field.name);
    match field.kind {
        FieldKind::Integer | FieldKind::Long | FieldKind::Binary => ident,
        FieldKind::Double => format!("{ident}::float8"),
        _ => format!("{ident}::text"),
    }
}

fn attr_from_row(
    row: &tokio_postgres::Row,
    index: usize,
    kind: FieldKind,
) -> Result<Option<AttrValue>, GuotuError> {
    let value = match kind {
        FieldKind::Integer => row
            .try_get::<_, Option<i32>>(index)?
            .map(|v| AttrValue::Int(v as i64)),
        FieldKind::Long => row.try_get::<_, Option<i64>>(index)?.map(AttrValue::Int),
        FieldKind::Double => row.try_get::<_, Option<f64>>(index)?.map(AttrValue::Double),
        FieldKind::Binary => row
            .try_get::<_, Option<Vec<u8>>>(index)?
            .map(AttrValue::Bytes),
        _ => row.try_get::<_, Option<String>>(index)?.map(AttrValue::Text),
    };
    Ok(value)
}

fn pg_type_for(field: &Field) -> String {
    match field.kind {
        FieldKind::Integer => "INTEGER".into(),
        FieldKind::Long => "BIGINT".into(),
        FieldKind::Double => "DOUBLE PRECISION".into(),
        FieldKind::Binary => "BYTEA".into(),
        FieldKind::Date => "DATE".into(),
        FieldKind::Time => "TIME".into(),
        FieldKind::DateTime => "TIMESTAMP".into(),
        FieldKind::String => match field.length {
            Some(length) if length > 0 => format!("VARCHAR({length})"),
            _ => "TEXT".into(),
        },
    }
}

/// Creates the schema and the target table when absent, with a serial
/// key, a typed geometry column and a GIST index.
async fn ensure_table(
    client: &deadpool_postgres::Object,
    schema: &str,
    table: &str,
    layer: &Layer,
    wkid: u32,
    kind: GeometryKind,
) -> Result<(), GuotuError> {
    client
        .execute(
            &format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)),
            &[],
        )
        .await?;

    let mut columns = vec![
        format!("{} SERIAL PRIMARY KEY", quote_ident(KEY_COLUMN)),
        format!(
            "{} geometry({}, {wkid})",
            quote_ident(GEOMETRY_COLUMN),
            kind.name()
        ),
    ];
    for field in &layer.fields {
        let mut column = format!("{} {}", quote_ident(&field.name), pg_type_for(field));
        if field.nullable == Some(false) {
            column.push_str(" NOT NULL");
        }
        columns.push(column);
    }
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {}.{} ({})",
        quote_ident(schema),
        quote_ident(table),
        columns.join(", ")
    );
    client.execute(&sql, &[]).await?;

    client
        .execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}.{} USING GIST ({})",
                quote_ident(&format!("idx_{table}_geom")),
                quote_ident(schema),
                quote_ident(table),
                quote_ident(GEOMETRY_COLUMN)
            ),
            &[],
        )
        .await?;
    Ok(())
}

/// Writes a layer into a PostGIS table, creating it when absent.
///
/// Features are loaded with COPY in batches of [`BATCH_SIZE`], each batch
/// in its own transaction on its own pooled connection, running
/// concurrently. Returns the number of rows written; when batches fail,
/// the committed ones stay in place and the error names the failed ones.
pub async fn write_layer(
    pool: &Pool,
    schema: &str,
    table: Option<&str>,
    layer: &Layer,
) -> Result<u64, GuotuError> {
    let wkid = layer
        .wkid
        .ok_or_else(|| GuotuError::layer_validation("CRS identifier is missing"))?;
    let kind = layer
        .geometry_kind
        .ok_or_else(|| GuotuError::layer_validation("geometry kind is missing"))?;
    let table = match table.or(layer.name.as_deref()) {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => return Err(GuotuError::layer_validation("layer name is missing")),
    };

    {
        let client = pool.get().await?;
        ensure_table(&client, schema, &table, layer, wkid, kind).await?;
    }

    let mut copy_columns = vec![quote_ident(GEOMETRY_COLUMN)];
    copy_columns.extend(layer.fields.iter().map(|f| quote_ident(&f.name)));
    let copy_sql: Arc<str> = format!(
        "COPY {}.{} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER '|', QUOTE E'\\x01', NULL '')",
        quote_ident(schema),
        quote_ident(&table),
        copy_columns.join(", ")
    )
    .into();

    let batches = render_batches(layer, wkid)?;
    let batch_count = batches.len();
    let mut handles = Vec::with_capacity(batch_count);
    for (index, data) in batches.into_iter().enumerate() {
        let pool = pool.clone();
        let copy_sql = copy_sql.clone();
        handles.push(tokio::spawn(async move {
            copy_batch(&pool, &copy_sql, data).await.map_err(|e| (index, e))
        }));
    }

    let mut written = 0u64;
    let mut failures = Vec::new();
    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok(Ok(rows)) => written += rows,
            Ok(Err((index, e))) => failures.push(format!("batch {index}: {e}")),
            Err(e) => failures.push(format!("batch task panicked: {e}")),
        }
    }
    if !failures.is_empty() {
        return Err(GuotuError::data_source(format!(
            "{} of {batch_count} COPY batches failed ({written} rows committed): {}",
            failures.len(),
            failures.join("; ")
        )));
    }

    tracing::info!(schema, table = %table, rows = written, "PostGIS table written");
    Ok(written)
}

/// Renders all features as COPY payloads of at most [`BATCH_SIZE`] rows
fn render_batches(layer: &Layer, wkid: u32) -> Result<Vec<Bytes>, GuotuError> {
    let mut batches = Vec::new();
    let mut current = String::new();
    for (count, feature) in layer.features.iter().enumerate() {
        if count > 0 && count % BATCH_SIZE == 0 {
            batches.push(Bytes::from(std::mem::take(&mut current)));
        }
        render_row(&mut current, layer, feature, wkid)?;
    }
    if !current.is_empty() {
        batches.push(Bytes::from(current));
    }
    Ok(batches)
}

fn render_row(
    out: &mut String,
    layer: &Layer,
    feature: &Feature,
    wkid: u32,
) -> Result<(), GuotuError> {
    match feature.geometry.as_deref() {
        Some(text) => {
            // EWKT carries the SRID inline
            let mut geom = wkt::parse_wkt_lenient(text)?;
            if let Some(kind) = layer.geometry_kind {
                geom = promote_to_kind(geom, kind);
            }
            out.push_str(&format!("SRID={wkid};{}", wkt::to_wkt(&geom)));
        }
        None => {}
    }
    for field in &layer.fields {
        out.push('|');
        let value = feature.attribute(&field.name).and_then(csv_value);
        if let Some(value) = value {
            out.push_str(&value);
        }
    }
    out.push('\n');
    Ok(())
}

/// Wraps a single geometry in the layer's multi kind; a typed geometry
/// column rejects a Polygon row in a MultiPolygon table.
fn promote_to_kind(geom: geo::Geometry, kind: GeometryKind) -> geo::Geometry {
    match (kind, geom) {
        (GeometryKind::MultiPolygon, geo::Geometry::Polygon(p)) => {
            geo::Geometry::MultiPolygon(geo::MultiPolygon(vec![p]))
        }
        (GeometryKind::MultiLineString, geo::Geometry::LineString(l)) => {
            geo::Geometry::MultiLineString(geo::MultiLineString(vec![l]))
        }
        (GeometryKind::MultiPoint, geo::Geometry::Point(p)) => {
            geo::Geometry::MultiPoint(geo::MultiPoint(vec![p]))
        }
        (_, geom) => geom,
    }
}

fn csv_value(value: &FieldValue) -> Option<String> {
    match &value.value {
        None => None,
        Some(AttrValue::Int(i)) => Some(i.to_string()),
        Some(AttrValue::Double(d)) => Some(d.to_string()),
        Some(AttrValue::Bool(b)) => Some(b.to_string()),
        Some(AttrValue::Text(s)) => Some(escape_csv(s)),
        Some(AttrValue::Bytes(b)) => {
            let mut hex = String::with_capacity(2 + b.len() * 2);
            hex.push_str("\\x");
            for byte in b {
                hex.push_str(&format!("{byte:02x}"));
            }
            Some(hex)
        }
    }
}

/// Replaces the COPY delimiter and line breaks; the quote character is
/// E'\x01' so ordinary text never needs quoting.
fn escape_csv(value: &str) -> String {
    value.replace('|', " ").replace('\n', " ").replace('\r', " ")
}

async fn copy_batch(pool: &Pool, copy_sql: &str, data: Bytes) -> Result<u64, GuotuError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;
    let sink = tx.copy_in(copy_sql).await?;
    let mut pinned = std::pin::pin!(sink);
    pinned.as_mut().send(data).await?;
    let rows = pinned.as_mut().finish().await?;
    tx.commit().await?;
    Ok(rows)
}

/// Deletes features matching the filter; without a filter the table is
/// emptied. Returns the number of rows removed.
pub async fn delete_features(
    pool: &Pool,
    schema: &str,
    table: &str,
    where_clause: Option<&str>,
) -> Result<u64, GuotuError> {
    let client = pool.get().await?;
    let mut sql = format!(
        "DELETE FROM {}.{}",
        quote_ident(schema),
        quote_ident(table)
    );
    if let Some(clause) = where_clause {
        sql.push_str(&format!(" WHERE ({clause})"));
    }
    let removed = client.execute(&sql, &[]).await?;
    tracing::info!(schema, table, removed, "Features deleted");
    Ok(removed)
}
