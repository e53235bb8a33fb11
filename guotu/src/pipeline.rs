//! One-call layer read and write over the backend registry.
//!
//! A request names the format, the source or target, and optional
//! filters; the registry resolves a backend and the call dispatches to
//! it. Writing always validates the layer, strips reserved system
//! fields and reprojects when a target CRS is requested.

use std::path::Path;

use geo::Intersects;

use crate::backend;
use crate::crs;
use crate::engine::{BackendKind, EnginePreference, EngineRegistry, Format};
use crate::error::GuotuError;
use crate::txt;
use crate::types::{Layer, LayerMetadata};
use crate::wkt;

/// Where to read a layer from and how
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub format: Format,
    /// File path, FileGDB directory or `PG:` connection string
    pub source: String,
    /// Layer or table name, for multi-layer sources
    pub layer_name: Option<String>,
    /// Attribute filter, passed through as SQL where supported
    pub where_clause: Option<String>,
    /// Spatial filter `[min x, min y, max x, max y]` in layer coordinates
    pub bbox: Option<[f64; 4]>,
    pub engine: EnginePreference,
}

impl ReadRequest {
    pub fn new(format: Format, source: impl Into<String>) -> Self {
        Self {
            format,
            source: source.into(),
            layer_name: None,
            where_clause: None,
            bbox: None,
            engine: EnginePreference::Auto,
        }
    }
}

/// Where to write a layer to and how
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub format: Format,
    /// File path, FileGDB directory or `PG:` connection string
    pub target: String,
    /// Layer or table name override
    pub layer_name: Option<String>,
    pub engine: EnginePreference,
    /// Reproject into this CRS before writing
    pub target_wkid: Option<u32>,
    /// GuoTu TXT zone override
    pub zone: Option<i32>,
    /// GuoTu TXT header override
    pub metadata: Option<LayerMetadata>,
    /// GuoTu TXT attribute order override
    pub field_names: Option<Vec<String>>,
    /// FileGDB feature dataset to place the layer in
    pub feature_dataset: Option<String>,
}

impl WriteRequest {
    pub fn new(format: Format, target: impl Into<String>) -> Self {
        Self {
            format,
            target: target.into(),
            layer_name: None,
            engine: EnginePreference::Auto,
            target_wkid: None,
            zone: None,
            metadata: None,
            field_names: None,
            feature_dataset: None,
        }
    }
}

/// Reads a layer from the requested source.
///
/// Attribute filters need a backend that can evaluate them; the spatial
/// filter is applied in memory for library file formats.
pub async fn read_layer(
    registry: &EngineRegistry,
    request: &ReadRequest,
) -> Result<Layer, GuotuError> {
    let backend = registry.select(request.engine, request.format)?;
    tracing::debug!(
        format = %request.format,
        backend = %backend,
        source = %request.source,
        "Read dispatched"
    );

    let mut layer = match (backend, request.format) {
        (BackendKind::Native, _) => backend::native::read_layer(
            &request.source,
            request.layer_name.as_deref(),
            request.where_clause.as_deref(),
            request.bbox,
        )?,
        (BackendKind::Library, Format::PostGis) => {
            let info: backend::postgis::PgConnInfo = request.source.parse()?;
            let table = request.layer_name.as_deref().ok_or_else(|| {
                GuotuError::layer_validation("PostGIS reads need a table name")
            })?;
            let pool = backend::postgis::create_pool(&info).await?;
            backend::postgis::read_layer(
                &pool,
                &info.schema,
                table,
                request.where_clause.as_deref(),
                request.bbox,
            )
            .await?
        }
        (BackendKind::Library, format) => {
            if request.where_clause.is_some() {
                return Err(GuotuError::engine_not_supported(format!(
                    "attribute filters on {format} need the native backend"
                )));
            }
            let path = Path::new(&request.source);
            let mut layer = match format {
                Format::Shp => backend::shp::read_layer(path)?,
                Format::GeoJson => backend::geojson::read_layer(path)?,
                Format::Txt => txt::parse_file(path, None)?,
                other => {
                    return Err(GuotuError::engine_not_supported(format!(
                        "library backend does not support format {other}"
                    )))
                }
            };
            if let Some(bbox) = request.bbox {
                filter_bbox(&mut layer, bbox)?;
            }
            layer
        }
    };

    if let Some(name) = &request.layer_name {
        if request.format != Format::PostGis {
            layer.alias = Some(name.clone());
        }
    }
    Ok(layer)
}

fn filter_bbox(layer: &mut Layer, [min_x, min_y, max_x, max_y]: [f64; 4]) -> Result<(), GuotuError> {
    let envelope = geo::Rect::new(
        geo::coord! { x: min_x, y: min_y },
        geo::coord! { x: max_x, y: max_y },
    );
    let before = layer.features.len();
    let mut keep = Vec::with_capacity(before);
    for feature in layer.features.drain(..) {
        let retained = match feature.geometry.as_deref() {
            Some(text) => envelope.intersects(&wkt::parse_wkt_lenient(text)?),
            None => false,
        };
        if retained {
            keep.push(feature);
        }
    }
    layer.features = keep;
    tracing::debug!(before, after = layer.features.len(), "Spatial filter applied");
    Ok(())
}

/// Writes a layer to the requested target and returns the number of
/// features written.
pub async fn write_layer(
    registry: &EngineRegistry,
    layer: &Layer,
    request: &WriteRequest,
) -> Result<u64, GuotuError> {
    let backend = registry.select(request.engine, request.format)?;

    let mut layer = layer.clone();
    layer.validate()?;
    strip_reserved_fields(&mut layer);
    if let Some(target_wkid) = request.target_wkid {
        if layer.wkid != Some(target_wkid) {
            layer = crs::reproject_layer(&layer, target_wkid)?;
        }
    }

    tracing::debug!(
        format = %request.format,
        backend = %backend,
        target = %request.target,
        features = layer.features.len(),
        "Write dispatched"
    );
    let count = layer.features.len() as u64;
    match (backend, request.format) {
        (BackendKind::Native, format) => {
            let driver = format.native_driver().ok_or_else(|| {
                GuotuError::engine_not_supported(format!(
                    "no native driver for format {format}"
                ))
            })?;
            backend::native::write_layer(
                &layer,
                &request.target,
                driver,
                request.layer_name.as_deref(),
                request.feature_dataset.as_deref(),
            )?;
            Ok(count)
        }
        (BackendKind::Library, Format::Shp) => {
            backend::shp::write_layer(&layer, Path::new(&request.target))?;
            Ok(count)
        }
        (BackendKind::Library, Format::GeoJson) => {
            backend::geojson::write_layer(&layer, Path::new(&request.target))?;
            Ok(count)
        }
        (BackendKind::Library, Format::Txt) => {
            let options = txt::TxtWriteOptions {
                metadata: request.metadata.clone(),
                field_names: request.field_names.clone(),
                zone: request.zone,
            };
            txt::write_file(&layer, Path::new(&request.target), &options)?;
            Ok(count)
        }
        (BackendKind::Library, Format::PostGis) => {
            let info: backend::postgis::PgConnInfo = request.target.parse()?;
            let pool = backend::postgis::create_pool(&info).await?;
            backend::postgis::write_layer(
                &pool,
                &info.schema,
                request.layer_name.as_deref(),
                &layer,
            )
            .await
        }
        (BackendKind::Library, other) => Err(GuotuError::engine_not_supported(format!(
            "library backend does not support format {other}"
        ))),
    }
}

/// Whether a field belongs to a source system rather than the data.
///
/// Shapefile and geodatabase sources expose managed columns (`SHAPE_*`,
/// `OBJECTID`) that target systems recreate themselves; carrying them
/// over breaks writes.
pub fn is_reserved_field(name: &str) -> bool {
    let upper = name.trim().to_ascii_uppercase();
    upper.starts_with("SHAPE") || upper.starts_with("OBJECTID")
}

fn strip_reserved_fields(layer: &mut Layer) {
    let before = layer.fields.len();
    layer.fields.retain(|f| !is_reserved_field(&f.name));
    if layer.fields.len() == before {
        return;
    }
    for feature in &mut layer.features {
        feature.values.retain(|v| !is_reserved_field(&v.field.name));
    }
    tracing::debug!(
        removed = before - layer.fields.len(),
        "Reserved fields stripped before write"
    );
}
