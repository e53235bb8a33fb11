//! Well-known-text helpers shared by every backend.
//!
//! Geometries travel through the layer model as WKT strings, so parsing and
//! serialisation live here, together with coordinate rounding.

use std::str::FromStr;

use wkt::ToWkt;

use crate::error::GuotuError;
use crate::types::GeometryKind;

/// Parses WKT strictly
pub fn parse_wkt(text: &str) -> Result<geo::Geometry, GuotuError> {
    let parsed = wkt::Wkt::<f64>::from_str(text.trim())
        .map_err(|e| GuotuError::format_error(format!("invalid WKT: {e}")))?;
    geo::Geometry::try_from(parsed)
        .map_err(|e| GuotuError::format_error(format!("invalid WKT: {e}")))
}

/// Parses WKT, tolerating case and whitespace sloppiness.
///
/// The strict parser runs first. On failure the text is normalised
/// (keywords uppercased, whitespace collapsed) and parsed once more; if
/// that also fails, the strict error is reported.
pub fn parse_wkt_lenient(text: &str) -> Result<geo::Geometry, GuotuError> {
    match parse_wkt(text) {
        Ok(geom) => Ok(geom),
        Err(strict_err) => match parse_wkt(&normalize_wkt(text)) {
            Ok(geom) => Ok(geom),
            Err(_) => Err(strict_err),
        },
    }
}

/// Rewrites sloppy WKT into canonical token spacing
fn normalize_wkt(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        match ch {
            '(' | ')' | ',' => {
                out.push(ch);
                pending_space = false;
            }
            _ => {
                if pending_space && !matches!(out.chars().last(), Some('(') | Some(',') | None) {
                    out.push(' ');
                }
                pending_space = false;
                out.push(ch.to_ascii_uppercase());
            }
        }
    }
    out
}

/// Serialises a geometry to WKT
pub fn to_wkt(geom: &geo::Geometry) -> String {
    geom.wkt_string()
}

/// Number of decimals implied by a coordinate tolerance (1e-4 gives 4)
pub fn decimals_for_tolerance(tolerance: f64) -> u8 {
    if tolerance <= 0.0 {
        return 9;
    }
    (-tolerance.log10()).round().clamp(0.0, 12.0) as u8
}

/// Rounds every coordinate of a geometry to the given number of decimals
pub fn round_geometry(geom: &geo::Geometry, decimals: u8) -> geo::Geometry {
    use geo::{
        Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint,
        MultiPolygon, Point, Polygon,
    };

    let factor = 10_f64.powi(decimals as i32);

    let round_coord = |c: &Coord| -> Coord {
        Coord {
            x: (c.x * factor).round() / factor,
            y: (c.y * factor).round() / factor,
        }
    };

    let round_line =
        |ls: &LineString| -> LineString { LineString::new(ls.0.iter().map(round_coord).collect()) };

    let round_polygon = |poly: &Polygon| -> Polygon {
        let exterior = round_line(poly.exterior());
        let interiors: Vec<LineString> = poly.interiors().iter().map(round_line).collect();
        Polygon::new(exterior, interiors)
    };

    match geom {
        Geometry::Point(p) => Geometry::Point(Point::from(round_coord(&p.0))),
        Geometry::LineString(ls) => Geometry::LineString(round_line(ls)),
        Geometry::Polygon(poly) => Geometry::Polygon(round_polygon(poly)),
        Geometry::MultiPoint(mp) => {
            let points: Vec<Point> = mp.0.iter().map(|p| Point::from(round_coord(&p.0))).collect();
            Geometry::MultiPoint(MultiPoint::new(points))
        }
        Geometry::MultiLineString(mls) => {
            let lines: Vec<LineString> = mls.0.iter().map(round_line).collect();
            Geometry::MultiLineString(MultiLineString::new(lines))
        }
        Geometry::MultiPolygon(mpoly) => {
            let polys: Vec<Polygon> = mpoly.0.iter().map(round_polygon).collect();
            Geometry::MultiPolygon(MultiPolygon::new(polys))
        }
        Geometry::GeometryCollection(gc) => {
            let members = gc.0.iter().map(|g| round_geometry(g, decimals)).collect();
            Geometry::GeometryCollection(GeometryCollection(members))
        }
        other => other.clone(),
    }
}

/// Layer geometry kind of a concrete geometry
pub fn kind_of(geom: &geo::Geometry) -> GeometryKind {
    match geom {
        geo::Geometry::Point(_) => GeometryKind::Point,
        geo::Geometry::MultiPoint(_) => GeometryKind::MultiPoint,
        geo::Geometry::Line(_) | geo::Geometry::LineString(_) => GeometryKind::LineString,
        geo::Geometry::MultiLineString(_) => GeometryKind::MultiLineString,
        geo::Geometry::Rect(_) | geo::Geometry::Triangle(_) | geo::Geometry::Polygon(_) => {
            GeometryKind::Polygon
        }
        geo::Geometry::MultiPolygon(_) => GeometryKind::MultiPolygon,
        geo::Geometry::GeometryCollection(_) => GeometryKind::GeometryCollection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strict() {
        let geom = parse_wkt("POINT(1 2)").unwrap();
        assert_eq!(kind_of(&geom), GeometryKind::Point);
        assert!(parse_wkt("POINT(1").is_err());
        assert!(parse_wkt("").is_err());
    }

    #[test]
    fn test_parse_lenient_normalizes() {
        let geom = parse_wkt_lenient("  polygon ( ( 0 0 , 0 1 , 1 1 , 0 0 ) ) ").unwrap();
        assert_eq!(kind_of(&geom), GeometryKind::Polygon);
    }

    #[test]
    fn test_lenient_failure_reports_strict_error() {
        let err = parse_wkt_lenient("POLYGONE((0 0,1 1))").unwrap_err();
        assert!(matches!(err, GuotuError::Format(_)));
        assert!(err.to_string().contains("invalid WKT"));
    }

    #[test]
    fn test_unclosed_ring_is_closed_on_parse() {
        let geom = parse_wkt_lenient("polygon((0 0, 4 0, 4 4))").unwrap();
        match geom {
            geo::Geometry::Polygon(p) => {
                assert_eq!(p.exterior().0.first(), p.exterior().0.last());
                assert_eq!(p.exterior().0.len(), 4);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_normalize_wkt_spacing() {
        assert_eq!(
            normalize_wkt("point ( 1.5   2.5 )"),
            "POINT(1.5 2.5)"
        );
        assert_eq!(
            normalize_wkt("MultiPolygon ((( 0 0, 1 0 , 1 1, 0 0 )))"),
            "MULTIPOLYGON(((0 0,1 0,1 1,0 0)))"
        );
    }

    #[test]
    fn test_decimals_for_tolerance() {
        assert_eq!(decimals_for_tolerance(1e-4), 4);
        assert_eq!(decimals_for_tolerance(1e-9), 9);
    }

    #[test]
    fn test_round_geometry() {
        let geom = parse_wkt("POINT(1.23456789 9.87654321)").unwrap();
        let rounded = round_geometry(&geom, 4);
        assert_eq!(to_wkt(&rounded), "POINT(1.2346 9.8765)");
    }

    #[test]
    fn test_wkt_round_trip() {
        let text = "MULTIPOLYGON(((0 0,4 0,4 4,0 0),(1 1,2 1,1 2,1 1)))";
        let geom = parse_wkt(text).unwrap();
        assert_eq!(kind_of(&geom), GeometryKind::MultiPolygon);
        let back = parse_wkt(&to_wkt(&geom)).unwrap();
        assert_eq!(geom, back);
    }
}
