//! GeoJSON reader and writer.
//!
//! Reading goes through the `geojson` crate; the 2008-style `crs` member
//! is honored when present and the document defaults to geographic
//! CGCS2000 otherwise. Writing streams features one by one, with the
//! geometry encoded by geozero.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;
use serde_json::Value as JsonValue;

use crate::crs;
use crate::encoding;
use crate::error::GuotuError;
use crate::types::{AttrValue, Feature, Field, FieldKind, FieldValue, Layer};
use crate::wkt;

/// CRS identifier assumed for documents without a `crs` member
const DEFAULT_WKID: u32 = 4490;

/// Reads a GeoJSON file into a layer
pub fn read_layer(path: &Path) -> Result<Layer, GuotuError> {
    let (text, enc) = encoding::read_to_string(path)?;
    tracing::debug!(path = %path.display(), encoding = enc.name(), "Reading GeoJSON");
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    read_str(&text, &name)
}

/// Parses GeoJSON text into a layer.
///
/// Accepts a FeatureCollection or a single Feature document.
pub fn read_str(text: &str, name: &str) -> Result<Layer, GuotuError> {
    let document = text
        .parse::<geojson::GeoJson>()
        .map_err(|e| GuotuError::format_error(format!("invalid GeoJSON: {e}")))?;
    let (json_features, foreign) = match document {
        geojson::GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
        geojson::GeoJson::Feature(feature) => (vec![feature], None),
        geojson::GeoJson::Geometry(_) => {
            return Err(GuotuError::format_error(
                "expected a FeatureCollection, got a bare geometry",
            ))
        }
    };

    let wkid = crs_member_wkid(foreign.as_ref()).unwrap_or(DEFAULT_WKID);
    let crs = crs::lookup(wkid)?;
    let tolerance = crs::tolerance(&crs);
    let decimals = wkt::decimals_for_tolerance(tolerance);

    // first pass: the union of property names, in first-encounter order
    let mut fields: Vec<Field> = Vec::new();
    for feature in &json_features {
        let Some(properties) = &feature.properties else {
            continue;
        };
        for (key, value) in properties {
            if !fields.iter().any(|f| f.name.eq_ignore_ascii_case(key)) {
                fields.push(Field::new(key.clone(), field_kind_of(value)));
            }
        }
    }

    let mut geometry_kind = None;
    let mut features = Vec::with_capacity(json_features.len());
    for json_feature in json_features {
        let mut feature = match &json_feature.id {
            Some(geojson::feature::Id::String(id)) => Feature::with_id(id.clone()),
            Some(geojson::feature::Id::Number(n)) => Feature::with_id(n.to_string()),
            None => Feature::generated(),
        };
        if let Some(geometry) = json_feature.geometry {
            let geom = geo::Geometry::try_from(geometry.value)
                .map_err(|e| GuotuError::format_error(format!("invalid GeoJSON geometry: {e}")))?;
            let geom = wkt::round_geometry(&geom, decimals);
            if geometry_kind.is_none() {
                geometry_kind = Some(wkt::kind_of(&geom));
            }
            feature.geometry = Some(wkt::to_wkt(&geom));
        }
        feature.values = fields
            .iter()
            .map(|field| {
                let value = json_feature
                    .properties
                    .as_ref()
                    .and_then(|p| p.get(&field.name))
                    .and_then(json_to_attr);
                FieldValue::new(field.clone(), value)
            })
            .collect();
        features.push(feature);
    }

    tracing::debug!(layer = name, features = features.len(), "GeoJSON read");
    Ok(Layer {
        name: Some(name.to_string()),
        alias: Some(name.to_string()),
        wkid: Some(wkid),
        geometry_kind,
        tolerance: Some(tolerance),
        fields,
        features,
        metadata: None,
    })
}

/// Extracts the EPSG code from a 2008-style `crs` member
fn crs_member_wkid(foreign: Option<&geojson::JsonObject>) -> Option<u32> {
    let name = foreign?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    name.rsplit(|c| c == ':' || c == '/')
        .find_map(|token| token.parse::<u32>().ok())
}

fn field_kind_of(value: &JsonValue) -> FieldKind {
    match value {
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => FieldKind::Long,
        JsonValue::Number(_) => FieldKind::Double,
        _ => FieldKind::String,
    }
}

fn json_to_attr(value: &JsonValue) -> Option<AttrValue> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(AttrValue::Bool(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(AttrValue::Int(i))
            } else {
                n.as_f64().map(AttrValue::Double)
            }
        }
        JsonValue::String(s) => Some(AttrValue::Text(s.clone())),
        // nested structures are kept as raw JSON text
        other => Some(AttrValue::Text(other.to_string())),
    }
}

/// Writes a layer as a GeoJSON FeatureCollection with a `crs` member.
///
/// Features are streamed one by one; the geometry is encoded by geozero
/// without an intermediate document tree.
pub fn write_layer(layer: &Layer, path: &Path) -> Result<(), GuotuError> {
    let wkid = layer
        .wkid
        .ok_or_else(|| GuotuError::layer_validation("CRS identifier is missing"))?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write!(
        writer,
        r#"{{"type":"FeatureCollection","crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:EPSG::{wkid}"}}}},"features":["#
    )?;
    for (i, feature) in layer.features.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write_feature(&mut writer, feature)?;
    }
    write!(writer, "]}}")?;
    writer.flush()?;

    tracing::info!(
        path = %path.display(),
        features = layer.features.len(),
        "GeoJSON written"
    );
    Ok(())
}

fn write_feature<W: Write>(writer: &mut W, feature: &Feature) -> Result<(), GuotuError> {
    write!(
        writer,
        r#"{{"type":"Feature","id":"{}","geometry":"#,
        escape_json(&feature.id)
    )?;
    match feature.geometry.as_deref() {
        Some(text) => {
            let geom = wkt::parse_wkt_lenient(text)?;
            let mut buf = Vec::new();
            let mut geom_writer = GeoJsonWriter::new(&mut buf);
            geom.process_geom(&mut geom_writer)
                .map_err(|e| GuotuError::format_error(format!("GeoJSON encode failed: {e}")))?;
            writer.write_all(&buf)?;
        }
        None => write!(writer, "null")?,
    }

    write!(writer, r#","properties":{{"#)?;
    for (i, value) in feature.values.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write!(
            writer,
            r#""{}":{}"#,
            escape_json(&value.field.name),
            serde_json::to_string(&value.value)?
        )?;
    }
    write!(writer, "}}}}")?;
    Ok(())
}

/// Escapes a string for embedding in JSON
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeometryKind;

    fn sample_layer() -> Layer {
        let fields = vec![
            Field::string("DKBH", "地块编号"),
            Field::new("JZDS", FieldKind::Long),
            Field::new("DKMJ", FieldKind::Double),
        ];
        let mut feature = Feature::with_id("f1");
        feature.geometry = Some("POINT(114.35 30.5)".to_string());
        feature.values = vec![
            FieldValue::new(fields[0].clone(), Some(AttrValue::Text("110101JC001".into()))),
            FieldValue::new(fields[1].clone(), Some(AttrValue::Int(5))),
            FieldValue::new(fields[2].clone(), Some(AttrValue::Double(1.25))),
        ];
        Layer {
            name: Some("sample".into()),
            alias: None,
            wkid: Some(4490),
            geometry_kind: Some(GeometryKind::Point),
            tolerance: Some(1e-9),
            fields,
            features: vec![feature],
            metadata: None,
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "guotu_geojson_{}_roundtrip.geojson",
            std::process::id()
        ));
        let layer = sample_layer();
        write_layer(&layer, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(r#""type":"FeatureCollection""#));
        assert!(content.contains("EPSG::4490"));
        assert!(content.contains(r#""id":"f1""#));

        let read = read_layer(&path).unwrap();
        assert_eq!(read.wkid, Some(4490));
        assert_eq!(read.geometry_kind, Some(GeometryKind::Point));
        let feature = &read.features[0];
        assert_eq!(feature.id, "f1");
        assert_eq!(
            feature.attribute("DKBH").unwrap().as_text().as_deref(),
            Some("110101JC001")
        );
        assert_eq!(feature.attribute("JZDS").unwrap().as_i64(), Some(5));
        assert_eq!(feature.attribute("DKMJ").unwrap().as_f64(), Some(1.25));
        assert_eq!(feature.geometry.as_deref(), Some("POINT(114.35 30.5)"));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_read_crs_member() {
        let text = r#"{"type":"FeatureCollection",
            "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:EPSG::4526"}},
            "features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[38500000.0,3380000.0]},"properties":{"DKBH":"A"}}]}"#;
        let layer = read_str(text, "t").unwrap();
        assert_eq!(layer.wkid, Some(4526));
        assert_eq!(layer.tolerance, Some(1e-4));
    }

    #[test]
    fn test_read_without_crs_defaults_to_geographic() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","geometry":{"type":"Point","coordinates":[114.0,30.0]},"properties":{}}]}"#;
        let layer = read_str(text, "t").unwrap();
        assert_eq!(layer.wkid, Some(4490));
    }

    #[test]
    fn test_read_rejects_foreign_crs() {
        let text = r#"{"type":"FeatureCollection",
            "crs":{"type":"name","properties":{"name":"EPSG:4326"}},
            "features":[]}"#;
        let err = read_str(text, "t").unwrap_err();
        assert!(matches!(err, GuotuError::CrsUnsupported(_)), "err={err}");
    }

    #[test]
    fn test_field_union_across_features() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","geometry":null,"properties":{"a":1}},
            {"type":"Feature","geometry":null,"properties":{"a":2,"b":"x"}}]}"#;
        let layer = read_str(text, "t").unwrap();
        let names: Vec<&str> = layer.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(layer.features[0].attribute("b").unwrap().value.is_none());
        assert_eq!(layer.features[1].attribute("b").unwrap().as_text().as_deref(), Some("x"));
    }

    #[test]
    fn test_single_feature_document() {
        let text = r#"{"type":"Feature","geometry":{"type":"Point","coordinates":[114.0,30.0]},"properties":{"n":1}}"#;
        let layer = read_str(text, "single").unwrap();
        assert_eq!(layer.features.len(), 1);
        assert_eq!(layer.wkid, Some(4490));
    }

    #[test]
    fn test_escape_json() {
        assert_eq!(escape_json("hello"), "hello");
        assert_eq!(escape_json("hello\"world"), "hello\\\"world");
        assert_eq!(escape_json("line\nbreak"), "line\\nbreak");
    }
}
