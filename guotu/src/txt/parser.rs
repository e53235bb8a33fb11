//! GuoTu TXT reader

use std::path::Path;

use crate::encoding;
use crate::error::GuotuError;
use crate::types::{
    AttrValue, Coordinate, ExtendedInfo, Feature, Field, FieldValue, GeometryKind, Layer,
    LayerMetadata,
};
use crate::{crs, wkt};

use super::{default_fields, ATTR_SECTION, COORD_SECTION};

/// Reads a GuoTu TXT file, sniffing UTF-8 or GB18030.
///
/// `fields` replaces the standard thirteen plot fields; raw attribute
/// values are bound to them positionally.
pub fn parse_file(path: &Path, fields: Option<Vec<Field>>) -> Result<Layer, GuotuError> {
    let (content, detected) = encoding::read_to_string(path)?;
    tracing::debug!(
        path = %path.display(),
        encoding = detected.name(),
        "Reading GuoTu TXT file"
    );
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed.txt");
    parse_str(&content, name, fields)
}

/// Parses GuoTu TXT content; `name` becomes the layer name and alias
pub fn parse_str(
    content: &str,
    name: &str,
    fields: Option<Vec<Field>>,
) -> Result<Layer, GuotuError> {
    let mut lines: Vec<&str> = Vec::new();
    for raw in content.lines() {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('\u{feff}').unwrap_or(trimmed).trim();
        if !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }

    if !lines.iter().any(|l| *l == ATTR_SECTION) {
        return Err(GuotuError::format_error(format!(
            "missing required section {ATTR_SECTION}"
        )));
    }
    if !lines.iter().any(|l| *l == COORD_SECTION) {
        return Err(GuotuError::format_error(format!(
            "missing required section {COORD_SECTION}"
        )));
    }

    // group into sections, preserving encounter order
    let mut sections: Vec<(&str, Vec<&str>)> = Vec::new();
    for line in lines {
        if line.starts_with('[') && line.ends_with(']') {
            sections.push((line, Vec::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(line);
        } else {
            return Err(GuotuError::format_error(format!(
                "content before the first [section] header: {line}"
            )));
        }
    }

    let mut metadata = LayerMetadata::default();
    let mut coord_lines: Vec<&str> = Vec::new();
    for (header, body) in sections {
        if header == ATTR_SECTION {
            parse_metadata_block(&body, &mut metadata)?;
        } else if header == COORD_SECTION {
            coord_lines.extend(body);
        } else {
            let mut info = ExtendedInfo {
                name: header.trim_start_matches('[').trim_end_matches(']').to_string(),
                properties: Vec::new(),
            };
            for line in body {
                let (key, value) = split_key_value(line)?;
                info.properties.push((key, value.unwrap_or_default()));
            }
            metadata.extended.push(info);
        }
    }

    let zone: i32 = metadata
        .zone_number
        .as_deref()
        .and_then(|z| z.trim().parse().ok())
        .ok_or_else(|| {
            GuotuError::format_error(format!("missing or invalid 带号 in {ATTR_SECTION}"))
        })?;
    let wkid = crs::projected_id_of(zone);
    let tolerance = crs::tolerance_of(wkid)?;
    let decimals = wkt::decimals_for_tolerance(tolerance);

    let fields = fields.unwrap_or_else(default_fields);

    // a trailing `@` opens a feature; following lines are its coordinates
    let mut features: Vec<Feature> = Vec::new();
    let mut current: Option<(Vec<String>, Vec<Coordinate>)> = None;
    for line in coord_lines {
        if line.ends_with('@') {
            if let Some(pending) = current.take() {
                features.push(build_feature(pending, &fields, decimals));
            }
            let tokens: Vec<&str> = line.split(',').collect();
            let raw: Vec<String> = tokens[..tokens.len() - 1]
                .iter()
                .map(|t| t.to_string())
                .collect();
            current = Some((raw, Vec::new()));
        } else if let Some((_, coords)) = current.as_mut() {
            coords.push(parse_coordinate_row(line)?);
        } else {
            return Err(GuotuError::format_error(format!(
                "coordinate row before any feature attribute line: {line}"
            )));
        }
    }
    if let Some(pending) = current.take() {
        features.push(build_feature(pending, &fields, decimals));
    }

    tracing::debug!(features = features.len(), zone, wkid, "Parsed GuoTu TXT layer");

    let mut layer = Layer {
        name: Some(name.to_string()),
        alias: Some(name.to_string()),
        wkid: Some(wkid),
        geometry_kind: Some(GeometryKind::MultiPolygon),
        tolerance: Some(tolerance),
        fields,
        features,
        metadata: Some(metadata),
    };
    layer.validate()?;
    Ok(layer)
}

fn parse_metadata_block(body: &[&str], metadata: &mut LayerMetadata) -> Result<(), GuotuError> {
    for line in body {
        let (key, value) = split_key_value(line)?;
        match key.as_str() {
            "格式版本号" => metadata.format_version = value,
            "数据产生单位" => metadata.producer = value,
            "数据产生日期" => metadata.produced_date = value,
            "坐标系" => metadata.crs_name = value,
            "几度分带" => metadata.zone_width = value,
            "投影类型" => metadata.projection_name = value,
            "计量单位" => metadata.unit = value,
            "带号" => metadata.zone_number = value,
            "精度" => metadata.precision = value,
            "转换参数" => metadata.transform_params = value,
            other => {
                return Err(GuotuError::format_error(format!(
                    "unrecognized attribute key '{other}' in {ATTR_SECTION}"
                )))
            }
        }
    }
    Ok(())
}

/// Splits `key=value`; a bare key or an empty value yields `None`
fn split_key_value(line: &str) -> Result<(String, Option<String>), GuotuError> {
    let mut parts: Vec<&str> = line.split('=').collect();
    while parts.len() > 1 && parts.last().is_some_and(|p| p.trim().is_empty()) {
        parts.pop();
    }
    match parts.len() {
        1 => Ok((parts[0].trim().to_string(), None)),
        2 => Ok((parts[0].trim().to_string(), Some(parts[1].trim().to_string()))),
        _ => Err(GuotuError::format_error(format!(
            "malformed key=value line: {line}"
        ))),
    }
}

fn parse_coordinate_row(line: &str) -> Result<Coordinate, GuotuError> {
    let mut commas = memchr::memchr_iter(b',', line.as_bytes());
    let (Some(a), Some(b), Some(c), None) = (commas.next(), commas.next(), commas.next(), commas.next())
    else {
        return Err(GuotuError::format_error(format!(
            "malformed coordinate row (expected pointNumber,ringNumber,Y,X): {line}"
        )));
    };
    let ring_number: i32 = line[a + 1..b].trim().parse().map_err(|_| {
        GuotuError::format_error(format!("invalid ring number in coordinate row: {line}"))
    })?;
    let y = parse_f64(&line[b + 1..c]).ok_or_else(|| {
        GuotuError::format_error(format!("invalid Y value in coordinate row: {line}"))
    })?;
    let x = parse_f64(&line[c + 1..]).ok_or_else(|| {
        GuotuError::format_error(format!("invalid X value in coordinate row: {line}"))
    })?;
    Ok(Coordinate {
        x,
        y,
        z: None,
        point_number: line[..a].trim().to_string(),
        ring_number,
    })
}

#[inline]
fn parse_f64(value: &str) -> Option<f64> {
    fast_float::parse(value.trim()).ok()
}

/// Assembles one feature: ring grouping, closure, positional attributes.
///
/// Rings are grouped by their number in first-seen order; the first group
/// is the shell and every later group a hole. An unclosed ring gets its
/// first point appended. The polygon is used as reconstructed, without any
/// repair pass.
fn build_feature(
    (raw_values, coordinates): (Vec<String>, Vec<Coordinate>),
    fields: &[Field],
    decimals: u8,
) -> Feature {
    let mut rings: Vec<(i32, Vec<geo::Coord>)> = Vec::new();
    for coord in &coordinates {
        let point = geo::Coord {
            x: coord.x,
            y: coord.y,
        };
        match rings.iter_mut().find(|(n, _)| *n == coord.ring_number) {
            Some((_, points)) => points.push(point),
            None => rings.push((coord.ring_number, vec![point])),
        }
    }

    let mut closed: Vec<geo::LineString> = Vec::with_capacity(rings.len());
    for (_, mut points) in rings {
        if let (Some(first), Some(last)) = (points.first().copied(), points.last()) {
            if first.x != last.x || first.y != last.y {
                points.push(first);
            }
        }
        closed.push(geo::LineString::new(points));
    }

    let mut ring_iter = closed.into_iter();
    let shell = ring_iter.next().unwrap_or_else(|| geo::LineString::new(Vec::new()));
    let holes: Vec<geo::LineString> = ring_iter.collect();
    let polygon = geo::Geometry::Polygon(geo::Polygon::new(shell, holes));
    let normalized = wkt::round_geometry(&polygon, decimals);

    let mut feature = Feature::generated();
    feature.geometry = Some(wkt::to_wkt(&normalized));
    for i in 0..raw_values.len().min(fields.len()) {
        feature.values.push(FieldValue::new(
            fields[i].clone(),
            Some(AttrValue::Text(raw_values[i].clone())),
        ));
    }
    feature.coordinates = coordinates;
    feature.raw_values = raw_values;
    feature
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = "\
[属性描述]
格式版本号=2.0
数据产生单位=测试中心
数据产生日期=2024-01-15
坐标系=2000国家大地坐标系
几度分带=3
投影类型=高斯克吕格
计量单位=米
带号=38
精度=0.01
转换参数=0,0,0,0,0,0,0
[地块坐标]
5,1,110101JC001,示范地块,面,I49G001001,耕地,0101,1,旱地,3,2,无,@
1,1,3380000.00,38500000.00
2,1,3380100.00,38500000.00
3,1,3380100.00,38500100.00
4,1,3380000.00,38500100.00
";

    #[test]
    fn test_parse_sample() {
        let layer = parse_str(SAMPLE, "sample.txt", None).unwrap();
        assert_eq!(layer.name.as_deref(), Some("sample.txt"));
        assert_eq!(layer.alias.as_deref(), Some("sample.txt"));
        assert_eq!(layer.wkid, Some(4526));
        assert_eq!(layer.tolerance, Some(1e-4));
        assert_eq!(layer.geometry_kind, Some(GeometryKind::MultiPolygon));
        assert_eq!(layer.fields.len(), 13);
        assert_eq!(layer.features.len(), 1);

        let metadata = layer.metadata.as_ref().unwrap();
        assert_eq!(metadata.producer.as_deref(), Some("测试中心"));
        assert_eq!(metadata.zone_number.as_deref(), Some("38"));
        assert_eq!(metadata.transform_params.as_deref(), Some("0,0,0,0,0,0,0"));

        let feature = &layer.features[0];
        assert_eq!(feature.raw_values.len(), 13);
        assert_eq!(feature.coordinates.len(), 4);
        assert_eq!(feature.attribute("dkbh").unwrap().as_text().as_deref(), Some("110101JC001"));
        assert_eq!(feature.attribute("JZDS").unwrap().as_text().as_deref(), Some("5"));
    }

    #[test]
    fn test_unclosed_ring_gains_closing_point() {
        let layer = parse_str(SAMPLE, "sample.txt", None).unwrap();
        let wkt_text = layer.features[0].geometry.as_deref().unwrap();
        let geom = wkt::parse_wkt(wkt_text).unwrap();
        match geom {
            geo::Geometry::Polygon(polygon) => {
                // four source points plus the automatic closing point
                assert_eq!(polygon.exterior().0.len(), 5);
                assert_eq!(polygon.exterior().0[0], polygon.exterior().0[4]);
                assert!(polygon.interiors().is_empty());
            }
            other => panic!("polygon expected, got {other:?}"),
        }
    }

    #[test]
    fn test_ring_two_becomes_hole() {
        let content = format!(
            "{}2,2,3380020,38500020\n1,2,3380020,38500040\n3,2,3380040,38500030\n",
            SAMPLE
        );
        let layer = parse_str(&content, "holes.txt", None).unwrap();
        let geom = wkt::parse_wkt(layer.features[0].geometry.as_deref().unwrap()).unwrap();
        match geom {
            geo::Geometry::Polygon(polygon) => {
                assert_eq!(polygon.interiors().len(), 1);
                assert_eq!(polygon.interiors()[0].0.len(), 4);
            }
            other => panic!("polygon expected, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_sections_are_named() {
        let err = parse_str("[地块坐标]\n", "x.txt", None).unwrap_err();
        assert!(err.to_string().contains("[属性描述]"), "err={err}");

        let err = parse_str("[属性描述]\n带号=38\n", "x.txt", None).unwrap_err();
        assert!(err.to_string().contains("[地块坐标]"), "err={err}");
    }

    #[test]
    fn test_unrecognized_metadata_key_is_named() {
        let content = "[属性描述]\n带号=38\n测试键=1\n[地块坐标]\n";
        let err = parse_str(content, "x.txt", None).unwrap_err();
        assert!(matches!(err, GuotuError::Format(_)));
        assert!(err.to_string().contains("测试键"), "err={err}");
    }

    #[test]
    fn test_malformed_coordinate_row_is_named() {
        let content = "[属性描述]\n带号=38\n[地块坐标]\n1,@\n1,1,3380000\n";
        let err = parse_str(content, "x.txt", None).unwrap_err();
        assert!(err.to_string().contains("1,1,3380000"), "err={err}");

        let content = "[属性描述]\n带号=38\n[地块坐标]\n1,@\n1,1,abc,38500000\n";
        let err = parse_str(content, "x.txt", None).unwrap_err();
        assert!(err.to_string().contains("invalid Y"), "err={err}");
    }

    #[test]
    fn test_missing_zone_number_is_rejected() {
        let content = "[属性描述]\n精度=0.01\n[地块坐标]\n";
        let err = parse_str(content, "x.txt", None).unwrap_err();
        assert!(err.to_string().contains("带号"), "err={err}");
    }

    #[test]
    fn test_out_of_range_zone_is_rejected() {
        let content = "[属性描述]\n带号=99\n[地块坐标]\n";
        let err = parse_str(content, "x.txt", None).unwrap_err();
        assert!(matches!(err, GuotuError::CrsUnsupported(_)));
    }

    #[test]
    fn test_extended_sections_survive() {
        let content = "[项目信息]\n项目名称=测试项目\n批次=2024-01\n[属性描述]\n带号=38\n[地块坐标]\n";
        let layer = parse_str(content, "x.txt", None).unwrap();
        let extended = &layer.metadata.as_ref().unwrap().extended;
        assert_eq!(extended.len(), 1);
        assert_eq!(extended[0].name, "项目信息");
        assert_eq!(
            extended[0].properties,
            vec![
                ("项目名称".to_string(), "测试项目".to_string()),
                ("批次".to_string(), "2024-01".to_string()),
            ]
        );
    }

    #[test]
    fn test_positional_binding_stops_at_shorter_list() {
        let fields = vec![
            Field::string("A", "a"),
            Field::string("B", "b"),
        ];
        let content = "[属性描述]\n带号=38\n[地块坐标]\nv1,v2,v3,@\n1,1,3380000,38500000\n";
        let layer = parse_str(content, "x.txt", Some(fields)).unwrap();
        let feature = &layer.features[0];
        assert_eq!(feature.raw_values, vec!["v1", "v2", "v3"]);
        assert_eq!(feature.values.len(), 2);
        assert_eq!(feature.values[0].as_text().as_deref(), Some("v1"));
        assert_eq!(feature.values[1].as_text().as_deref(), Some("v2"));
    }

    #[test]
    fn test_content_before_first_section_is_rejected() {
        let content = "stray line\n[属性描述]\n带号=38\n[地块坐标]\n";
        let err = parse_str(content, "x.txt", None).unwrap_err();
        assert!(err.to_string().contains("stray line"), "err={err}");
    }

    #[test]
    fn test_bom_and_blank_lines_are_ignored() {
        let content = format!("\u{feff}\n\n{}", SAMPLE);
        let layer = parse_str(&content, "sample.txt", None).unwrap();
        assert_eq!(layer.features.len(), 1);
    }

    #[test]
    fn test_generated_ids_are_dashless() {
        let layer = parse_str(SAMPLE, "sample.txt", None).unwrap();
        let id = &layer.features[0].id;
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
