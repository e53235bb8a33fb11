//! GuoTu TXT writer

use std::path::Path;

use geo::Area;
use tracing::warn;

use crate::error::GuotuError;
use crate::types::{Coordinate, Layer, LayerMetadata};
use crate::{crs, wkt};

use super::{default_field_names, ATTR_SECTION, COORD_SECTION};

/// Options for writing a layer as GuoTu TXT
#[derive(Debug, Clone, Default)]
pub struct TxtWriteOptions {
    /// Metadata block; absent keys get the standard defaults.
    /// Falls back to the layer's own metadata when not given.
    pub metadata: Option<LayerMetadata>,

    /// Output fields in file order; defaults to the standard thirteen
    pub field_names: Option<Vec<String>>,

    /// Projection zone override. When absent the zone is derived once from
    /// the first feature's centroid and reused for the whole file.
    pub zone: Option<i32>,
}

/// Serialises a layer to GuoTu TXT and writes it as UTF-8
pub fn write_file(layer: &Layer, path: &Path, options: &TxtWriteOptions) -> Result<(), GuotuError> {
    let content = write_string(layer, options)?;
    std::fs::write(path, content)?;
    tracing::info!(
        path = %path.display(),
        features = layer.features.len(),
        "Wrote GuoTu TXT file"
    );
    Ok(())
}

/// Serialises a layer to GuoTu TXT content.
///
/// Only polygonal geometries can be represented; anything else fails with
/// a format error. All features are reprojected into a single zone: the
/// explicit option wins, otherwise the first feature's centroid decides,
/// and a mixed-zone layer is forced into that zone with a warning.
pub fn write_string(layer: &Layer, options: &TxtWriteOptions) -> Result<String, GuotuError> {
    let source_wkid = layer
        .wkid
        .ok_or_else(|| GuotuError::layer_validation("CRS identifier is missing"))?;
    let metadata = options
        .metadata
        .clone()
        .or_else(|| layer.metadata.clone())
        .unwrap_or_default();
    let field_names = options
        .field_names
        .clone()
        .unwrap_or_else(default_field_names);

    let mut body: Vec<String> = Vec::new();
    let mut zone_and_wkid: Option<(i32, u32)> = options.zone.map(|z| (z, crs::projected_id_of(z)));
    let mut warned_mixed = false;

    for feature in &layer.features {
        let text = feature.geometry.as_deref().ok_or_else(|| {
            GuotuError::format_error(format!("feature {} has no geometry", feature.id))
        })?;
        let geom = wkt::parse_wkt_lenient(text)?;

        let natural_zone = crs::zone_of(&geom)?;
        let (zone, target_wkid) = match zone_and_wkid {
            Some(pair) => pair,
            None => {
                if natural_zone <= 0 {
                    return Err(GuotuError::format_error(
                        "cannot derive a zone from the first feature's coordinates; \
                         set the zone option explicitly",
                    ));
                }
                let pair = (natural_zone, crs::projected_id_of(natural_zone));
                zone_and_wkid = Some(pair);
                pair
            }
        };
        if natural_zone > 0 && natural_zone != zone && !warned_mixed {
            warn!(
                zone,
                found = natural_zone,
                feature = %feature.id,
                "Layer spans multiple zones; all features are written in one zone"
            );
            warned_mixed = true;
        }

        let projected = crs::reproject(&geom, source_wkid, target_wkid)?;
        let decimals = wkt::decimals_for_tolerance(crs::tolerance_of(target_wkid)?);
        let rounded = wkt::round_geometry(&projected, decimals);

        let coordinates = decompose_rings(&rounded)?;

        let mut values: Vec<String> = Vec::with_capacity(field_names.len());
        for field_name in &field_names {
            match field_name.as_str() {
                "JZDS" => values.push(coordinates.len().to_string()),
                "DKMJ" => values.push(plain_decimal(rounded.unsigned_area() / 10_000.0)),
                "JLTXSX" => values.push("面".to_string()),
                _ => values.push(
                    feature
                        .attribute(field_name)
                        .and_then(|v| v.as_text())
                        .filter(|t| !t.is_empty())
                        .unwrap_or_default(),
                ),
            }
        }
        body.push(format!("{},@", values.join(",")));

        for coord in &coordinates {
            body.push(format!(
                "{},{},{},{}",
                coord.point_number,
                coord.ring_number,
                plain_decimal(coord.y),
                plain_decimal(coord.x),
            ));
        }
    }

    let zone_text = metadata
        .zone_number
        .clone()
        .or_else(|| zone_and_wkid.map(|(z, _)| z.to_string()))
        .unwrap_or_default();

    let mut lines: Vec<String> = Vec::new();
    for info in &metadata.extended {
        lines.push(format!("[{}]", info.name));
        for (key, value) in &info.properties {
            lines.push(format!("{key}={value}"));
        }
    }
    lines.push(ATTR_SECTION.to_string());
    lines.push(format!(
        "格式版本号={}",
        metadata.format_version.as_deref().unwrap_or("")
    ));
    lines.push(format!(
        "数据产生单位={}",
        metadata.producer.as_deref().unwrap_or("自然资源部")
    ));
    lines.push(format!(
        "数据产生日期={}",
        metadata
            .produced_date
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string())
    ));
    lines.push(format!(
        "坐标系={}",
        metadata.crs_name.as_deref().unwrap_or("2000国家大地坐标系")
    ));
    lines.push(format!(
        "几度分带={}",
        metadata.zone_width.as_deref().unwrap_or("3")
    ));
    lines.push(format!(
        "投影类型={}",
        metadata.projection_name.as_deref().unwrap_or("高斯克吕格")
    ));
    lines.push(format!("计量单位={}", metadata.unit.as_deref().unwrap_or("米")));
    lines.push(format!("带号={zone_text}"));
    lines.push(format!(
        "精度={}",
        metadata.precision.as_deref().unwrap_or("0.01")
    ));
    lines.push(format!(
        "转换参数={}",
        metadata.transform_params.as_deref().unwrap_or("0,0,0,0,0,0,0")
    ));
    lines.push(COORD_SECTION.to_string());
    lines.extend(body);

    Ok(lines.join("\n") + "\n")
}

/// Flattens a polygonal geometry into numbered coordinate records.
///
/// The ring counter runs across all rings of the feature (shells and holes
/// of every part); point numbers restart at 1 for each ring. The closing
/// duplicate point of each ring is emitted, as the format expects.
fn decompose_rings(geom: &geo::Geometry) -> Result<Vec<Coordinate>, GuotuError> {
    let polygons: Vec<&geo::Polygon> = match geom {
        geo::Geometry::Polygon(p) => vec![p],
        geo::Geometry::MultiPolygon(mp) => mp.0.iter().collect(),
        other => {
            return Err(GuotuError::format_error(format!(
                "unsupported geometry type for GuoTu TXT: {}",
                wkt::kind_of(other).name()
            )))
        }
    };

    let mut coordinates: Vec<Coordinate> = Vec::new();
    let mut ring_number = 1;
    for polygon in polygons {
        let mut rings: Vec<&geo::LineString> = vec![polygon.exterior()];
        rings.extend(polygon.interiors().iter());
        for ring in rings {
            for (index, point) in ring.coords().enumerate() {
                coordinates.push(Coordinate {
                    x: point.x,
                    y: point.y,
                    z: None,
                    point_number: (index + 1).to_string(),
                    ring_number,
                });
            }
            ring_number += 1;
        }
    }
    Ok(coordinates)
}

/// Plain decimal rendering; `Display` for f64 never uses scientific notation
#[inline]
fn plain_decimal(value: f64) -> String {
    value.to_string()
}
