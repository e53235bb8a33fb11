//! CGCS2000 reference system registry and reprojection.
//!
//! The recognized set is the national family EPSG:4490..=4554: the
//! geographic system plus the four Gauss-Krüger groups (6-degree zones,
//! 6-degree central meridians, 3-degree zones, 3-degree central meridians).
//! Systems are derived from the identifier on demand and cached
//! process-wide; the cache only ever grows.
//!
//! Projected identifiers follow the domain convention `4488 + zone` for
//! 3-degree zones, so zone 38 (central meridian 114°E) is EPSG:4526.

mod gauss;

pub use gauss::Cgcs2000;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use geo::Centroid;
use regex::Regex;

use crate::error::GuotuError;
use crate::types::Layer;

/// Identifier range of the recognized family
pub const RECOGNIZED_IDS: std::ops::RangeInclusive<u32> = 4490..=4554;

/// Longitudes below this are degrees; anything larger is a false easting
const MAX_LONGITUDE: f64 = 180.0;

/// Point in geographic coordinates (radians)
#[derive(Debug, Clone, Copy)]
pub struct Geographic {
    /// Longitude in radians
    pub lon: f64,
    /// Latitude in radians
    pub lat: f64,
}

impl Geographic {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Converts to degrees
    pub fn to_degrees(self) -> (f64, f64) {
        (self.lon.to_degrees(), self.lat.to_degrees())
    }

    /// Creates from degrees
    pub fn from_degrees(lon_deg: f64, lat_deg: f64) -> Self {
        Self {
            lon: lon_deg.to_radians(),
            lat: lat_deg.to_radians(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsKind {
    Geographic,
    Projected,
}

/// Transverse Mercator parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TmProjection {
    pub central_meridian: f64,
    pub false_easting: f64,
    pub false_northing: f64,
    pub scale_factor: f64,
    pub latitude_of_origin: f64,
}

impl TmProjection {
    fn gauss_kruger(central_meridian: f64, false_easting: f64) -> Self {
        Self {
            central_meridian,
            false_easting,
            false_northing: 0.0,
            scale_factor: 1.0,
            latitude_of_origin: 0.0,
        }
    }
}

/// A recognized reference system
#[derive(Debug, Clone, PartialEq)]
pub struct Crs {
    pub wkid: u32,
    pub name: String,
    pub kind: CrsKind,
    pub projection: Option<TmProjection>,
}

/// Reference system parameters parsed from WKT, before standardization
#[derive(Debug, Clone, PartialEq)]
pub struct CrsSpec {
    pub name: Option<String>,
    pub semi_major: f64,
    pub inverse_flattening: f64,
    pub projection: Option<TmProjection>,
}

impl From<&Crs> for CrsSpec {
    fn from(crs: &Crs) -> Self {
        CrsSpec {
            name: Some(crs.name.clone()),
            semi_major: Cgcs2000::A,
            inverse_flattening: Cgcs2000::INV_F,
            projection: crs.projection,
        }
    }
}

/// Builds the system for a recognized identifier
fn crs_for_id(wkid: u32) -> Result<Crs, GuotuError> {
    let crs = match wkid {
        4490 => Crs {
            wkid,
            name: "GCS_China_Geodetic_Coordinate_System_2000".to_string(),
            kind: CrsKind::Geographic,
            projection: None,
        },
        // 6-degree zones 13..=23, false easting carries the zone number
        4491..=4501 => {
            let zone = wkid - 4491 + 13;
            let cm = 6.0 * zone as f64 - 3.0;
            Crs {
                wkid,
                name: format!("CGCS2000_GK_Zone_{zone}"),
                kind: CrsKind::Projected,
                projection: Some(TmProjection::gauss_kruger(
                    cm,
                    zone as f64 * 1_000_000.0 + 500_000.0,
                )),
            }
        }
        // 6-degree central meridians 75°E..135°E
        4502..=4512 => {
            let cm = 75 + 6 * (wkid - 4502);
            Crs {
                wkid,
                name: format!("CGCS2000_GK_CM_{cm}E"),
                kind: CrsKind::Projected,
                projection: Some(TmProjection::gauss_kruger(cm as f64, 500_000.0)),
            }
        }
        // 3-degree zones 25..=45, false easting carries the zone number
        4513..=4533 => {
            let zone = wkid - 4513 + 25;
            let cm = 3.0 * zone as f64;
            Crs {
                wkid,
                name: format!("CGCS2000_3_Degree_GK_Zone_{zone}"),
                kind: CrsKind::Projected,
                projection: Some(TmProjection::gauss_kruger(
                    cm,
                    zone as f64 * 1_000_000.0 + 500_000.0,
                )),
            }
        }
        // 3-degree central meridians 75°E..135°E
        4534..=4554 => {
            let cm = 75 + 3 * (wkid - 4534);
            Crs {
                wkid,
                name: format!("CGCS2000_3_Degree_GK_CM_{cm}E"),
                kind: CrsKind::Projected,
                projection: Some(TmProjection::gauss_kruger(cm as f64, 500_000.0)),
            }
        }
        other => {
            return Err(GuotuError::crs_unsupported(format!(
                "id {other} is outside the recognized CGCS2000 range 4490..=4554"
            )))
        }
    };
    Ok(crs)
}

fn registry() -> &'static RwLock<HashMap<u32, Arc<Crs>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<u32, Arc<Crs>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolves a recognized identifier, registering it on first use
pub fn lookup(wkid: u32) -> Result<Arc<Crs>, GuotuError> {
    {
        let cache = registry().read().unwrap_or_else(|e| e.into_inner());
        if let Some(crs) = cache.get(&wkid) {
            return Ok(Arc::clone(crs));
        }
    }
    let crs = Arc::new(crs_for_id(wkid)?);
    let mut cache = registry().write().unwrap_or_else(|e| e.into_inner());
    Ok(Arc::clone(cache.entry(wkid).or_insert(crs)))
}

const SEMI_MAJOR_EPSILON: f64 = 1e-3;
const FLATTENING_EPSILON: f64 = 1e-9;
const METER_EPSILON: f64 = 1e-3;
const PARAM_EPSILON: f64 = 1e-9;

fn matches_spec(crs: &Crs, spec: &CrsSpec) -> bool {
    if (spec.semi_major - Cgcs2000::A).abs() > SEMI_MAJOR_EPSILON
        || (spec.inverse_flattening - Cgcs2000::INV_F).abs() > FLATTENING_EPSILON
    {
        return false;
    }
    match (&crs.projection, &spec.projection) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            (a.central_meridian - b.central_meridian).abs() < PARAM_EPSILON
                && (a.false_easting - b.false_easting).abs() < METER_EPSILON
                && (a.false_northing - b.false_northing).abs() < METER_EPSILON
                && (a.scale_factor - b.scale_factor).abs() < PARAM_EPSILON
                && (a.latitude_of_origin - b.latitude_of_origin).abs() < PARAM_EPSILON
        }
        _ => false,
    }
}

/// Maps arbitrary reference system parameters onto the recognized set.
///
/// Matching is by value, not by name: recognized identifiers are scanned in
/// ascending order and the first system with equivalent parameters wins.
/// Fails with a CRS-unsupported error when nothing matches (WGS84 differs
/// from CGCS2000 in its inverse flattening and is rejected here).
pub fn standardize(spec: &CrsSpec) -> Result<(u32, Arc<Crs>), GuotuError> {
    for wkid in RECOGNIZED_IDS {
        let candidate = crs_for_id(wkid)?;
        if matches_spec(&candidate, spec) {
            return Ok((wkid, lookup(wkid)?));
        }
    }
    let label = spec.name.as_deref().unwrap_or("unnamed system");
    Err(GuotuError::crs_unsupported(format!(
        "no recognized CGCS2000 system matches '{label}'"
    )))
}

/// Parses WKT and maps it onto the recognized set
pub fn standardize_wkt(wkt: &str) -> Result<(u32, Arc<Crs>), GuotuError> {
    let spec = spec_from_wkt(wkt)?;
    standardize(&spec)
}

struct WktPatterns {
    name: Regex,
    spheroid: Regex,
    projection: Regex,
    parameter: Regex,
}

fn wkt_patterns() -> &'static WktPatterns {
    static PATTERNS: OnceLock<WktPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| WktPatterns {
        name: Regex::new(r#"(?i)^\s*(?:PROJCS|PROJCRS|GEOGCS|GEOGCRS)\s*\[\s*"([^"]*)""#)
            .expect("static pattern"),
        spheroid: Regex::new(
            r#"(?i)(?:SPHEROID|ELLIPSOID)\s*\[\s*"[^"]*"\s*,\s*([0-9eE+.\-]+)\s*,\s*([0-9eE+.\-]+)"#,
        )
        .expect("static pattern"),
        projection: Regex::new(r#"(?i)PROJECTION\s*\[\s*"([^"]+)""#).expect("static pattern"),
        parameter: Regex::new(r#"(?i)PARAMETER\s*\[\s*"([^"]+)"\s*,\s*([0-9eE+.\-]+)"#)
            .expect("static pattern"),
    })
}

/// Extracts reference system parameters from ESRI or OGC WKT.
///
/// Only the parameters that decide equivalence are read; authority blocks,
/// units and axis order are ignored.
pub fn spec_from_wkt(wkt: &str) -> Result<CrsSpec, GuotuError> {
    let patterns = wkt_patterns();
    let text = wkt.trim();
    if text.is_empty() {
        return Err(GuotuError::format_error("reference system WKT is empty"));
    }

    let spheroid = patterns.spheroid.captures(text).ok_or_else(|| {
        GuotuError::format_error("reference system WKT has no SPHEROID entry")
    })?;
    let semi_major: f64 = spheroid[1]
        .parse()
        .map_err(|_| GuotuError::format_error("invalid semi-major axis in WKT"))?;
    let inverse_flattening: f64 = spheroid[2]
        .parse()
        .map_err(|_| GuotuError::format_error("invalid inverse flattening in WKT"))?;

    let name = patterns
        .name
        .captures(text)
        .map(|c| c[1].to_string())
        .filter(|n| !n.is_empty());

    let projection = match patterns.projection.captures(text) {
        None => None,
        Some(caps) => {
            let method = caps[1].replace([' ', '_'], "").to_ascii_lowercase();
            if method != "gausskruger" && method != "transversemercator" {
                return Err(GuotuError::crs_unsupported(format!(
                    "projection method '{}' is not transverse Mercator",
                    &caps[1]
                )));
            }

            let mut central_meridian = None;
            let mut false_easting = 0.0;
            let mut false_northing = 0.0;
            let mut scale_factor = 1.0;
            let mut latitude_of_origin = 0.0;
            for param in patterns.parameter.captures_iter(text) {
                let value: f64 = match param[2].parse() {
                    Ok(v) => v,
                    Err(_) => {
                        return Err(GuotuError::format_error(format!(
                            "invalid value for WKT parameter '{}'",
                            &param[1]
                        )))
                    }
                };
                match param[1].to_ascii_lowercase().as_str() {
                    "central_meridian" | "longitude_of_center" => central_meridian = Some(value),
                    "false_easting" => false_easting = value,
                    "false_northing" => false_northing = value,
                    "scale_factor" => scale_factor = value,
                    "latitude_of_origin" | "latitude_of_center" => latitude_of_origin = value,
                    _ => {}
                }
            }

            let central_meridian = central_meridian.ok_or_else(|| {
                GuotuError::format_error("projected WKT is missing Central_Meridian")
            })?;
            Some(TmProjection {
                central_meridian,
                false_easting,
                false_northing,
                scale_factor,
                latitude_of_origin,
            })
        }
    };

    Ok(CrsSpec {
        name,
        semi_major,
        inverse_flattening,
        projection,
    })
}

const GEOGCS_WKT: &str = concat!(
    "GEOGCS[\"GCS_China_Geodetic_Coordinate_System_2000\",",
    "DATUM[\"D_China_2000\",SPHEROID[\"CGCS2000\",6378137.0,298.257222101]],",
    "PRIMEM[\"Greenwich\",0.0],UNIT[\"Degree\",0.0174532925199433]]"
);

/// Renders a recognized system as ESRI WKT (the `.prj` dialect)
pub fn to_esri_wkt(crs: &Crs) -> String {
    match &crs.projection {
        None => GEOGCS_WKT.to_string(),
        Some(p) => format!(
            "PROJCS[\"{}\",{},PROJECTION[\"Gauss_Kruger\"],\
             PARAMETER[\"False_Easting\",{:.1}],PARAMETER[\"False_Northing\",{:.1}],\
             PARAMETER[\"Central_Meridian\",{:.1}],PARAMETER[\"Scale_Factor\",{:.1}],\
             PARAMETER[\"Latitude_Of_Origin\",{:.1}],UNIT[\"Meter\",1.0]]",
            crs.name,
            GEOGCS_WKT,
            p.false_easting,
            p.false_northing,
            p.central_meridian,
            p.scale_factor,
            p.latitude_of_origin,
        ),
    }
}

/// Coordinate tolerance of a system: 1e-4 m projected, 1e-9 deg geographic
pub fn tolerance(crs: &Crs) -> f64 {
    match crs.kind {
        CrsKind::Projected => 1e-4,
        CrsKind::Geographic => 1e-9,
    }
}

/// Coordinate tolerance of a recognized identifier
pub fn tolerance_of(wkid: u32) -> Result<f64, GuotuError> {
    let crs = lookup(wkid)?;
    Ok(tolerance(&crs))
}

/// Zone number implied by a single ordinate.
///
/// Values under 180 are longitudes and map through the 3-degree zone
/// formula; larger values are eastings whose leading digits carry the zone.
/// An easting without a zone prefix yields 0, which no recognized
/// identifier resolves from.
pub fn zone_of_ordinate(x: f64) -> i32 {
    if x < MAX_LONGITUDE {
        ((x + 1.5) / 3.0) as i32
    } else if x / 10_000_000.0 > 3.0 {
        (x / 1_000_000.0) as i32
    } else {
        0
    }
}

/// Zone number at the centroid of a geometry
pub fn zone_of(geom: &geo::Geometry) -> Result<i32, GuotuError> {
    let centroid = geom
        .centroid()
        .ok_or_else(|| GuotuError::format_error("cannot derive a zone from an empty geometry"))?;
    Ok(zone_of_ordinate(centroid.x()))
}

/// Canonical projected identifier of a 3-degree zone
pub fn projected_id_of(zone: i32) -> u32 {
    (4488 + zone).max(0) as u32
}

/// Zone number of a projected identifier
pub fn zone_of_id(wkid: u32) -> i32 {
    wkid as i32 - 4488
}

/// Identifier implied by a geometry's coordinates: 4490 for degrees,
/// otherwise the projected identifier of its zone
pub fn wkid_of(geom: &geo::Geometry) -> Result<u32, GuotuError> {
    let centroid = geom
        .centroid()
        .ok_or_else(|| GuotuError::format_error("cannot derive a zone from an empty geometry"))?;
    if centroid.x() < MAX_LONGITUDE {
        Ok(4490)
    } else {
        Ok(projected_id_of(zone_of_ordinate(centroid.x())))
    }
}

fn transform_point(x: f64, y: f64, source: &Crs, target: &Crs) -> (f64, f64) {
    let geo = match &source.projection {
        Some(p) => gauss::gauss_to_geographic(
            x,
            y - p.false_northing,
            p.central_meridian,
            p.false_easting,
        ),
        None => Geographic::from_degrees(x, y),
    };
    match &target.projection {
        Some(p) => {
            let (px, py) = gauss::geographic_to_gauss(geo, p.central_meridian, p.false_easting);
            (px, py + p.false_northing)
        }
        None => geo.to_degrees(),
    }
}

/// Reprojects a geometry between recognized identifiers.
///
/// A no-op when the identifiers match. Coordinates are not rounded here;
/// callers normalize precision per the target tolerance where the format
/// requires it.
pub fn reproject(
    geom: &geo::Geometry,
    source_wkid: u32,
    target_wkid: u32,
) -> Result<geo::Geometry, GuotuError> {
    if source_wkid == target_wkid {
        return Ok(geom.clone());
    }
    let source = lookup(source_wkid)?;
    let target = lookup(target_wkid)?;
    Ok(transform_geometry(geom, &source, &target))
}

fn transform_line(ls: &geo::LineString, source: &Crs, target: &Crs) -> geo::LineString {
    geo::LineString::new(
        ls.coords()
            .map(|c| {
                let (x, y) = transform_point(c.x, c.y, source, target);
                geo::Coord { x, y }
            })
            .collect(),
    )
}

fn transform_polygon(poly: &geo::Polygon, source: &Crs, target: &Crs) -> geo::Polygon {
    let exterior = transform_line(poly.exterior(), source, target);
    let interiors: Vec<geo::LineString> = poly
        .interiors()
        .iter()
        .map(|ring| transform_line(ring, source, target))
        .collect();
    geo::Polygon::new(exterior, interiors)
}

fn transform_geometry(geom: &geo::Geometry, source: &Crs, target: &Crs) -> geo::Geometry {
    use geo::Geometry;

    match geom {
        Geometry::Point(p) => {
            let (x, y) = transform_point(p.x(), p.y(), source, target);
            Geometry::Point(geo::Point::new(x, y))
        }
        Geometry::LineString(ls) => Geometry::LineString(transform_line(ls, source, target)),
        Geometry::Polygon(poly) => Geometry::Polygon(transform_polygon(poly, source, target)),
        Geometry::MultiPoint(mp) => Geometry::MultiPoint(geo::MultiPoint::new(
            mp.iter()
                .map(|p| {
                    let (x, y) = transform_point(p.x(), p.y(), source, target);
                    geo::Point::new(x, y)
                })
                .collect(),
        )),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(geo::MultiLineString::new(
            mls.iter().map(|ls| transform_line(ls, source, target)).collect(),
        )),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(geo::MultiPolygon::new(
            mp.iter()
                .map(|poly| transform_polygon(poly, source, target))
                .collect(),
        )),
        Geometry::GeometryCollection(gc) => {
            Geometry::GeometryCollection(geo::GeometryCollection(
                gc.iter().map(|g| transform_geometry(g, source, target)).collect(),
            ))
        }
        Geometry::Line(line) => {
            let (sx, sy) = transform_point(line.start.x, line.start.y, source, target);
            let (ex, ey) = transform_point(line.end.x, line.end.y, source, target);
            Geometry::Line(geo::Line::new(
                geo::Coord { x: sx, y: sy },
                geo::Coord { x: ex, y: ey },
            ))
        }
        Geometry::Rect(rect) => transform_geometry(&Geometry::Polygon(rect.to_polygon()), source, target),
        Geometry::Triangle(tri) => {
            transform_geometry(&Geometry::Polygon(tri.to_polygon()), source, target)
        }
    }
}

/// Reprojects a whole layer, returning a new validated layer with the
/// target identifier and its tolerance
pub fn reproject_layer(layer: &Layer, target_wkid: u32) -> Result<Layer, GuotuError> {
    let mut clone = layer.clone();
    clone.validate()?;
    let source_wkid = clone
        .wkid
        .ok_or_else(|| GuotuError::layer_validation("CRS identifier is missing"))?;
    if source_wkid == target_wkid {
        return Ok(clone);
    }

    let source = lookup(source_wkid)?;
    let target = lookup(target_wkid)?;
    for feature in &mut clone.features {
        if let Some(text) = &feature.geometry {
            let geom = crate::wkt::parse_wkt_lenient(text)?;
            let transformed = transform_geometry(&geom, &source, &target);
            feature.geometry = Some(crate::wkt::to_wkt(&transformed));
        }
    }
    clone.wkid = Some(target_wkid);
    clone.tolerance = Some(tolerance(&target));
    Ok(clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_covers_all_four_families() {
        let geo = lookup(4490).unwrap();
        assert_eq!(geo.kind, CrsKind::Geographic);

        // 6-degree zone 13: CM 75°E, zone-prefixed false easting
        let z13 = lookup(4491).unwrap();
        let p = z13.projection.unwrap();
        assert_eq!(p.central_meridian, 75.0);
        assert_eq!(p.false_easting, 13_500_000.0);

        // 6-degree CM 135°E
        let cm135 = lookup(4512).unwrap();
        assert_eq!(cm135.projection.unwrap().central_meridian, 135.0);
        assert_eq!(cm135.projection.unwrap().false_easting, 500_000.0);

        // 3-degree zone 38: CM 114°E
        let z38 = lookup(4526).unwrap();
        assert_eq!(z38.name, "CGCS2000_3_Degree_GK_Zone_38");
        let p = z38.projection.unwrap();
        assert_eq!(p.central_meridian, 114.0);
        assert_eq!(p.false_easting, 38_500_000.0);

        // 3-degree CM 114°E, plain false easting
        let cm114 = lookup(4547).unwrap();
        assert_eq!(cm114.projection.unwrap().central_meridian, 114.0);
        assert_eq!(cm114.projection.unwrap().false_easting, 500_000.0);
    }

    #[test]
    fn test_lookup_rejects_out_of_range_ids() {
        assert!(matches!(lookup(4489), Err(GuotuError::CrsUnsupported(_))));
        assert!(matches!(lookup(4555), Err(GuotuError::CrsUnsupported(_))));
        assert!(matches!(lookup(4326), Err(GuotuError::CrsUnsupported(_))));
    }

    #[test]
    fn test_tolerances() {
        assert_eq!(tolerance_of(4490).unwrap(), 1e-9);
        assert_eq!(tolerance_of(4526).unwrap(), 1e-4);
    }

    #[test]
    fn test_zone_derivation() {
        assert_eq!(zone_of_ordinate(114.0), 38);
        assert_eq!(zone_of_ordinate(75.0), 25);
        assert_eq!(zone_of_ordinate(135.0), 45);
        // easting with zone prefix
        assert_eq!(zone_of_ordinate(38_514_000.0), 38);
        // easting without a zone prefix cannot be placed
        assert_eq!(zone_of_ordinate(500_000.0), 0);

        let point = geo::Geometry::Point(geo::Point::new(114.0, 30.5));
        assert_eq!(zone_of(&point).unwrap(), 38);
        assert_eq!(projected_id_of(38), 4526);
        assert_eq!(zone_of_id(4526), 38);
        assert_eq!(wkid_of(&point).unwrap(), 4490);

        // stable under reprojection into the implied zone
        let projected = reproject(&point, 4490, 4526).unwrap();
        assert_eq!(zone_of(&projected).unwrap(), 38);
        assert_eq!(wkid_of(&projected).unwrap(), 4526);
    }

    #[test]
    fn test_standardize_is_idempotent() {
        let z38 = lookup(4526).unwrap();
        let (id, crs) = standardize(&CrsSpec::from(z38.as_ref())).unwrap();
        assert_eq!(id, 4526);
        let (id2, _) = standardize(&CrsSpec::from(crs.as_ref())).unwrap();
        assert_eq!(id2, id);
    }

    #[test]
    fn test_standardize_prefers_smallest_id_on_parameter_ties() {
        // 4502 and 4534 share CM 75°E with plain false easting
        let cm75 = lookup(4534).unwrap();
        let (id, _) = standardize(&CrsSpec::from(cm75.as_ref())).unwrap();
        assert_eq!(id, 4502);

        // CM 78°E only exists in the 3-degree family
        let cm78 = lookup(4535).unwrap();
        let (id, _) = standardize(&CrsSpec::from(cm78.as_ref())).unwrap();
        assert_eq!(id, 4535);
    }

    #[test]
    fn test_standardize_rejects_wgs84() {
        let wgs84 = CrsSpec {
            name: Some("GCS_WGS_1984".to_string()),
            semi_major: 6378137.0,
            inverse_flattening: 298.257223563,
            projection: None,
        };
        assert!(matches!(
            standardize(&wgs84),
            Err(GuotuError::CrsUnsupported(_))
        ));
    }

    #[test]
    fn test_wkt_round_trip_through_standardize() {
        // ids whose parameters are unique within the family; CM-only systems
        // shared between the 6-degree and 3-degree groups resolve to the
        // smaller id and are covered by the tie test
        for wkid in [4490, 4491, 4502, 4513, 4526, 4535] {
            let crs = lookup(wkid).unwrap();
            let wkt = to_esri_wkt(&crs);
            let (id, _) = standardize_wkt(&wkt).unwrap();
            assert_eq!(id, wkid, "wkt={wkt}");
        }
    }

    #[test]
    fn test_spec_from_wkt_errors() {
        assert!(matches!(
            spec_from_wkt(""),
            Err(GuotuError::Format(_))
        ));
        assert!(matches!(
            spec_from_wkt("PROJCS[\"x\"]"),
            Err(GuotuError::Format(_))
        ));
        let lambert = concat!(
            "PROJCS[\"lcc\",GEOGCS[\"g\",DATUM[\"d\",SPHEROID[\"s\",6378137.0,298.257222101]]],",
            "PROJECTION[\"Lambert_Conformal_Conic\"],PARAMETER[\"Central_Meridian\",3.0]]"
        );
        assert!(matches!(
            spec_from_wkt(lambert),
            Err(GuotuError::CrsUnsupported(_))
        ));
    }

    #[test]
    fn test_spec_from_wkt_reads_ogc_parameter_names() {
        let ogc = concat!(
            "PROJCS[\"CGCS2000 / 3-degree Gauss-Kruger zone 38\",",
            "GEOGCS[\"China Geodetic Coordinate System 2000\",",
            "DATUM[\"China_2000\",SPHEROID[\"CGCS2000\",6378137,298.257222101]]],",
            "PROJECTION[\"Transverse_Mercator\"],",
            "PARAMETER[\"latitude_of_origin\",0],PARAMETER[\"central_meridian\",114],",
            "PARAMETER[\"scale_factor\",1],PARAMETER[\"false_easting\",38500000],",
            "PARAMETER[\"false_northing\",0],UNIT[\"metre\",1]]"
        );
        let (id, _) = standardize_wkt(ogc).unwrap();
        assert_eq!(id, 4526);
    }

    #[test]
    fn test_reproject_same_id_is_identity() {
        let geom = crate::wkt::parse_wkt("POLYGON((114 30,114.1 30,114.1 30.1,114 30))").unwrap();
        let out = reproject(&geom, 4526, 4526).unwrap();
        assert_eq!(geom, out);
    }

    #[test]
    fn test_reproject_round_trip() {
        let geom = geo::Geometry::Point(geo::Point::new(114.35, 30.5));
        let projected = reproject(&geom, 4490, 4526).unwrap();
        if let geo::Geometry::Point(p) = &projected {
            assert!(p.x() > 38_500_000.0, "x={}", p.x());
            assert!(p.y() > 3_300_000.0, "y={}", p.y());
        } else {
            panic!("point expected");
        }
        let back = reproject(&projected, 4526, 4490).unwrap();
        if let geo::Geometry::Point(p) = back {
            assert!((p.x() - 114.35).abs() < 1e-7);
            assert!((p.y() - 30.5).abs() < 1e-7);
        } else {
            panic!("point expected");
        }
    }

    #[test]
    fn test_reproject_layer_updates_wkid_and_tolerance() {
        use crate::types::{Feature, GeometryKind, Layer};

        let mut feature = Feature::with_id("1");
        feature.geometry = Some("POINT(114.35 30.5)".to_string());
        let layer = Layer {
            name: Some("dk".to_string()),
            wkid: Some(4490),
            geometry_kind: Some(GeometryKind::Point),
            features: vec![feature],
            ..Default::default()
        };

        let out = reproject_layer(&layer, 4526).unwrap();
        assert_eq!(out.wkid, Some(4526));
        assert_eq!(out.tolerance, Some(1e-4));
        let wkt = out.features[0].geometry.as_deref().unwrap();
        assert!(wkt.starts_with("POINT(385"), "wkt={wkt}");
    }
}
