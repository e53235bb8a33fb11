//! ESRI Shapefile reader and writer.
//!
//! A dataset is the full sidecar set: reading requires `.shp`, `.shx`,
//! `.dbf` and `.prj` (lowercase or uppercase extensions). Geometry goes
//! through the `shapefile` crate. The DBF attribute table is parsed
//! directly from its fixed-layout descriptor block so that field order is
//! preserved and Chinese code pages are decoded the same way the TXT
//! reader decodes them. The writer emits UTF-8 attribute text and says so
//! in a `.cpg` sidecar, and writes the CRS to a `.prj` sidecar.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use shapefile::dbase::{FieldName, FieldValue as DbfValue, Record, TableWriterBuilder};
use shapefile::{PolygonRing, Shape};

use crate::crs;
use crate::encoding;
use crate::error::GuotuError;
use crate::types::{AttrValue, Feature, Field, FieldKind, FieldValue, GeometryKind, Layer};
use crate::wkt;

/// Maximum DBF field name length in bytes
const DBF_NAME_BYTES: usize = 10;
/// Maximum DBF character field length
const DBF_TEXT_BYTES: u8 = 254;

#[derive(Debug)]
struct Sidecars {
    shp: PathBuf,
    dbf: PathBuf,
    prj: PathBuf,
    cpg: Option<PathBuf>,
}

impl Sidecars {
    /// Derives the sidecar paths and checks that `.shp`, `.shx`, `.dbf`
    /// and `.prj` all exist, probing lowercase then uppercase extensions.
    fn locate(path: &Path) -> Result<Self, GuotuError> {
        let mut missing = Vec::new();
        let mut take = |ext: &'static str| {
            find_sidecar(path, ext).unwrap_or_else(|| {
                missing.push(format!(".{ext}"));
                path.with_extension(ext)
            })
        };
        let shp = take("shp");
        let _shx = take("shx");
        let dbf = take("dbf");
        let prj = take("prj");
        if !missing.is_empty() {
            return Err(GuotuError::data_source(format!(
                "incomplete shapefile {}: missing {}",
                path.display(),
                missing.join(", ")
            )));
        }
        Ok(Self {
            shp,
            dbf,
            prj,
            cpg: find_sidecar(path, "cpg"),
        })
    }

    /// Attribute table encoding: `.cpg` sidecar first, then the DBF
    /// language driver byte, then UTF-8. A `.cpg` naming an encoding the
    /// layer model cannot decode is an error rather than a silent guess.
    fn table_encoding(&self) -> Result<&'static Encoding, GuotuError> {
        if let Some(cpg) = &self.cpg {
            let label = std::fs::read_to_string(cpg)?;
            return encoding::encoding_from_cpg(&label).ok_or_else(|| {
                GuotuError::format_error(format!(
                    "unrecognized encoding '{}' in {}",
                    label.trim(),
                    cpg.display()
                ))
            });
        }
        Ok(encoding::dbf_language_driver(&self.dbf).unwrap_or(encoding_rs::UTF_8))
    }
}

/// Looks for `base.ext` next to the `.shp`, trying the lowercase extension
/// and then its uppercase form.
fn find_sidecar(path: &Path, ext: &str) -> Option<PathBuf> {
    let lower = path.with_extension(ext);
    if lower.is_file() {
        return Some(lower);
    }
    let upper = path.with_extension(ext.to_ascii_uppercase());
    if upper.is_file() {
        return Some(upper);
    }
    None
}

struct DbfColumn {
    field: Field,
    kind_char: u8,
    offset: usize,
    length: usize,
    decimals: u8,
}

struct DbfTable {
    columns: Vec<DbfColumn>,
    rows: Vec<Vec<Option<AttrValue>>>,
}

impl DbfTable {
    /// Parses a DBF table: 32-byte file header, 32-byte field descriptors
    /// up to the 0x0D terminator, then fixed-width records.
    fn parse(data: &[u8], enc: &'static Encoding) -> Result<Self, GuotuError> {
        if data.len() < 32 {
            return Err(GuotuError::format_error("DBF header truncated"));
        }
        let record_count = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let header_size = u16::from_le_bytes([data[8], data[9]]) as usize;
        let record_size = u16::from_le_bytes([data[10], data[11]]) as usize;

        let mut columns = Vec::new();
        // byte 0 of each record is the deletion flag
        let mut offset = 1usize;
        let mut pos = 32usize;
        while pos < data.len() && data[pos] != 0x0D {
            let descriptor = data.get(pos..pos + 32).ok_or_else(|| {
                GuotuError::format_error("DBF field descriptor truncated")
            })?;
            let name_bytes = &descriptor[..11];
            let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(11);
            let (name, _) = enc.decode_without_bom_handling(&name_bytes[..name_end]);
            let kind_char = descriptor[11];
            let length = descriptor[16] as usize;
            let decimals = descriptor[17];

            let kind = match kind_char {
                b'N' if decimals == 0 => FieldKind::Long,
                b'N' | b'F' | b'O' => FieldKind::Double,
                b'I' => FieldKind::Integer,
                b'D' => FieldKind::Date,
                _ => FieldKind::String,
            };
            let mut field = Field::new(name.trim(), kind);
            if kind == FieldKind::String {
                field.length = Some(length as u32);
            }
            columns.push(DbfColumn {
                field,
                kind_char,
                offset,
                length,
                decimals,
            });
            offset += length;
            pos += 32;
        }

        let mut rows = Vec::with_capacity(record_count);
        for index in 0..record_count {
            let base = header_size + index * record_size;
            let record = data.get(base..base + record_size).ok_or_else(|| {
                GuotuError::format_error(format!("DBF record {index} truncated"))
            })?;
            let row = columns
                .iter()
                .map(|col| decode_dbf_value(col, &record[col.offset..col.offset + col.length], enc))
                .collect();
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }
}

fn decode_dbf_value(col: &DbfColumn, raw: &[u8], enc: &'static Encoding) -> Option<AttrValue> {
    match col.kind_char {
        b'N' | b'F' => {
            let text = std::str::from_utf8(raw).ok()?.trim();
            if text.is_empty() || text.starts_with('*') {
                return None;
            }
            if col.kind_char == b'N' && col.decimals == 0 {
                if let Ok(v) = text.parse::<i64>() {
                    return Some(AttrValue::Int(v));
                }
            }
            text.parse::<f64>().ok().map(AttrValue::Double)
        }
        b'I' => {
            let bytes: [u8; 4] = raw.get(..4)?.try_into().ok()?;
            Some(AttrValue::Int(i32::from_le_bytes(bytes) as i64))
        }
        b'D' => {
            let text = std::str::from_utf8(raw).ok()?.trim();
            if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
                Some(AttrValue::Text(format!(
                    "{}-{}-{}",
                    &text[..4],
                    &text[4..6],
                    &text[6..]
                )))
            } else if text.is_empty() {
                None
            } else {
                Some(AttrValue::Text(text.to_string()))
            }
        }
        b'L' => match raw.first()? {
            b'Y' | b'y' | b'T' | b't' => Some(AttrValue::Bool(true)),
            b'N' | b'n' | b'F' | b'f' => Some(AttrValue::Bool(false)),
            _ => None,
        },
        b'M' => None,
        _ => {
            let trimmed_end = raw.iter().rposition(|&b| b != b' ' && b != 0)?;
            let (text, _) = enc.decode_without_bom_handling(&raw[..=trimmed_end]);
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(AttrValue::Text(text.to_string()))
            }
        }
    }
}

/// Reads a shapefile into a layer.
///
/// The `.prj` sidecar is required and must standardize to a recognized
/// CRS identifier; coordinates are rounded to that CRS's precision.
pub fn read_layer(path: &Path) -> Result<Layer, GuotuError> {
    let sidecars = Sidecars::locate(path)?;
    let enc = sidecars.table_encoding()?;
    tracing::debug!(path = %path.display(), encoding = enc.name(), "Reading shapefile");

    let dbf_data = std::fs::read(&sidecars.dbf)?;
    let table = DbfTable::parse(&dbf_data, enc)?;

    let reader = shapefile::ShapeReader::from_path(&sidecars.shp)
        .map_err(|e| GuotuError::data_source(format!("cannot open {}: {e}", sidecars.shp.display())))?;
    let shapes = reader
        .read()
        .map_err(|e| GuotuError::data_source(format!("cannot read {}: {e}", sidecars.shp.display())))?;

    let prj_text = std::fs::read_to_string(&sidecars.prj)?;
    let (wkid, crs) = crs::standardize_wkt(&prj_text)?;
    let (wkid, tolerance) = (Some(wkid), Some(crs::tolerance(&crs)));
    let decimals = tolerance.map(wkt::decimals_for_tolerance);

    if shapes.len() != table.rows.len() {
        tracing::warn!(
            shapes = shapes.len(),
            records = table.rows.len(),
            "Shape and record counts differ, extra entries are dropped"
        );
    }

    let mut geometry_kind = None;
    let mut features = Vec::with_capacity(shapes.len());
    for (index, (shape, row)) in shapes.into_iter().zip(table.rows).enumerate() {
        let mut feature = Feature::with_id(index.to_string());
        if let Some(geom) = shape_to_geometry(shape)? {
            let geom = match decimals {
                Some(d) => wkt::round_geometry(&geom, d),
                None => geom,
            };
            if geometry_kind.is_none() {
                geometry_kind = Some(wkt::kind_of(&geom));
            }
            feature.geometry = Some(wkt::to_wkt(&geom));
        }
        feature.values = table
            .columns
            .iter()
            .zip(row)
            .map(|(col, value)| FieldValue::new(col.field.clone(), value))
            .collect();
        features.push(feature);
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    tracing::debug!(layer = %name, features = features.len(), "Shapefile read");
    Ok(Layer {
        name: Some(name.clone()),
        alias: Some(name),
        wkid,
        geometry_kind,
        tolerance,
        fields: table.columns.into_iter().map(|c| c.field).collect(),
        features,
        metadata: None,
    })
}

fn shape_to_geometry(shape: Shape) -> Result<Option<geo::Geometry>, GuotuError> {
    let geom = match shape {
        Shape::NullShape => return Ok(None),
        Shape::Point(p) => geo::Geometry::Point(geo::Point::new(p.x, p.y)),
        Shape::PointM(p) => geo::Geometry::Point(geo::Point::new(p.x, p.y)),
        Shape::PointZ(p) => geo::Geometry::Point(geo::Point::new(p.x, p.y)),
        Shape::Multipoint(mp) => multipoint_from(mp.points().iter().map(|p| (p.x, p.y)).collect()),
        Shape::MultipointM(mp) => multipoint_from(mp.points().iter().map(|p| (p.x, p.y)).collect()),
        Shape::MultipointZ(mp) => multipoint_from(mp.points().iter().map(|p| (p.x, p.y)).collect()),
        Shape::Polyline(pl) => multiline_from(part_coords(pl.parts())),
        Shape::PolylineM(pl) => multiline_from(part_coords(pl.parts())),
        Shape::PolylineZ(pl) => multiline_from(part_coords(pl.parts())),
        Shape::Polygon(pg) => polygons_from(ring_coords(pg.rings())),
        Shape::PolygonM(pg) => polygons_from(ring_coords(pg.rings())),
        Shape::PolygonZ(pg) => polygons_from(ring_coords(pg.rings())),
        Shape::Multipatch(_) => {
            return Err(GuotuError::format_error(
                "multipatch shapes are not supported",
            ))
        }
    };
    Ok(Some(geom))
}

fn part_coords<P: HasXy>(parts: &[Vec<P>]) -> Vec<Vec<(f64, f64)>> {
    parts
        .iter()
        .map(|part| part.iter().map(|p| p.xy()).collect())
        .collect()
}

fn ring_coords<P: HasXy>(rings: &[PolygonRing<P>]) -> Vec<(bool, Vec<(f64, f64)>)> {
    rings
        .iter()
        .map(|ring| match ring {
            PolygonRing::Outer(pts) => (true, pts.iter().map(|p| p.xy()).collect()),
            PolygonRing::Inner(pts) => (false, pts.iter().map(|p| p.xy()).collect()),
        })
        .collect()
}

/// Plane position of a shapefile point, for any of the point variants
trait HasXy {
    fn xy(&self) -> (f64, f64);
}

impl HasXy for shapefile::Point {
    fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl HasXy for shapefile::PointM {
    fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl HasXy for shapefile::PointZ {
    fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

fn multipoint_from(points: Vec<(f64, f64)>) -> geo::Geometry {
    geo::Geometry::MultiPoint(geo::MultiPoint::new(
        points
            .into_iter()
            .map(|(x, y)| geo::Point::new(x, y))
            .collect(),
    ))
}

fn multiline_from(parts: Vec<Vec<(f64, f64)>>) -> geo::Geometry {
    geo::Geometry::MultiLineString(geo::MultiLineString::new(
        parts.into_iter().map(geo::LineString::from).collect(),
    ))
}

/// Assembles polygons from rings in file order: an outer ring opens a new
/// polygon, inner rings attach to the one most recently opened. An inner
/// ring before any outer ring opens a polygon of its own.
fn polygons_from(rings: Vec<(bool, Vec<(f64, f64)>)>) -> geo::Geometry {
    let mut polygons: Vec<geo::Polygon> = Vec::new();
    let mut current: Option<(geo::LineString, Vec<geo::LineString>)> = None;
    for (is_outer, points) in rings {
        let ring = geo::LineString::from(points);
        if is_outer || current.is_none() {
            if let Some((shell, holes)) = current.take() {
                polygons.push(geo::Polygon::new(shell, holes));
            }
            current = Some((ring, Vec::new()));
        } else if let Some((_, holes)) = current.as_mut() {
            holes.push(ring);
        }
    }
    if let Some((shell, holes)) = current.take() {
        polygons.push(geo::Polygon::new(shell, holes));
    }
    geo::Geometry::MultiPolygon(geo::MultiPolygon::new(polygons))
}

/// DBF field names for the layer fields: at most ten bytes, unique
/// case-insensitively. Colliding names are shortened and suffixed `_1`,
/// `_2` and so on.
pub fn dbf_field_names(fields: &[Field]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(fields.len());
    for field in fields {
        let mut name = truncate_bytes(&field.name, DBF_NAME_BYTES);
        let mut counter = 1u32;
        while !taken.insert(name.to_ascii_uppercase()) {
            let suffix = format!("_{counter}");
            let stem = truncate_bytes(&field.name, DBF_NAME_BYTES - suffix.len());
            name = format!("{stem}{suffix}");
            counter += 1;
        }
        names.push(name);
    }
    names
}

fn truncate_bytes(name: &str, max_bytes: usize) -> String {
    let mut out = String::new();
    for ch in name.chars() {
        if out.len() + ch.len_utf8() > max_bytes {
            break;
        }
        out.push(ch);
    }
    out
}

/// Writes a layer as a shapefile with `.prj` and `.cpg` sidecars.
///
/// The layer must carry a CRS identifier and a geometry kind; every
/// feature must have a geometry compatible with the layer kind.
pub fn write_layer(layer: &Layer, path: &Path) -> Result<(), GuotuError> {
    let wkid = layer
        .wkid
        .ok_or_else(|| GuotuError::layer_validation("CRS identifier is missing"))?;
    let kind = layer
        .geometry_kind
        .ok_or_else(|| GuotuError::layer_validation("geometry kind is missing"))?;
    let crs = crs::lookup(wkid)?;

    let names = dbf_field_names(&layer.fields);
    let mut builder = TableWriterBuilder::new();
    for (field, dbf_name) in layer.fields.iter().zip(&names) {
        let field_name = FieldName::try_from(dbf_name.as_str())
            .map_err(|_| GuotuError::format_error(format!("invalid DBF field name '{dbf_name}'")))?;
        if field.kind == FieldKind::Binary {
            tracing::warn!(field = %field.name, "Binary field written as text, DBF has no blob type");
        }
        builder = match field.kind {
            FieldKind::Integer | FieldKind::Long => builder.add_numeric_field(field_name, 18, 0),
            FieldKind::Double => builder.add_numeric_field(field_name, 24, 15),
            _ => {
                let length = field
                    .length
                    .map(|l| l.min(DBF_TEXT_BYTES as u32) as u8)
                    .unwrap_or(DBF_TEXT_BYTES);
                builder.add_character_field(field_name, length)
            }
        };
    }

    let shp_path = path.with_extension("shp");
    let mut writer = shapefile::Writer::from_path(&shp_path, builder)
        .map_err(|e| GuotuError::data_source(format!("cannot create {}: {e}", shp_path.display())))?;

    for feature in &layer.features {
        let text = feature.geometry.as_deref().ok_or_else(|| {
            GuotuError::format_error(format!("feature {} has no geometry", feature.id))
        })?;
        let geom = wkt::parse_wkt_lenient(text)?;

        let mut record = Record::default();
        for (field, dbf_name) in layer.fields.iter().zip(&names) {
            let value = feature.attribute(&field.name);
            record.insert(dbf_name.clone(), dbf_value(field.kind, value));
        }

        let written = match kind {
            GeometryKind::Point => writer.write_shape_and_record(&to_shp_point(&geom)?, &record),
            GeometryKind::MultiPoint => {
                writer.write_shape_and_record(&to_shp_multipoint(&geom)?, &record)
            }
            GeometryKind::LineString | GeometryKind::MultiLineString => {
                writer.write_shape_and_record(&to_shp_polyline(&geom)?, &record)
            }
            GeometryKind::Polygon | GeometryKind::MultiPolygon => {
                writer.write_shape_and_record(&to_shp_polygon(&geom)?, &record)
            }
            other => {
                return Err(GuotuError::format_error(format!(
                    "unsupported geometry type for shapefile: {}",
                    other.name()
                )))
            }
        };
        written.map_err(|e| {
            GuotuError::data_source(format!("write failed for feature {}: {e}", feature.id))
        })?;
    }
    drop(writer);

    std::fs::write(path.with_extension("prj"), crs::to_esri_wkt(&crs))?;
    std::fs::write(path.with_extension("cpg"), "UTF-8")?;
    tracing::info!(
        path = %shp_path.display(),
        features = layer.features.len(),
        "Shapefile written"
    );
    Ok(())
}

fn dbf_value(kind: FieldKind, value: Option<&FieldValue>) -> DbfValue {
    match kind {
        FieldKind::Integer | FieldKind::Long | FieldKind::Double => {
            DbfValue::Numeric(value.and_then(FieldValue::as_f64))
        }
        _ => DbfValue::Character(value.and_then(FieldValue::as_text)),
    }
}

fn to_shp_point(geom: &geo::Geometry) -> Result<shapefile::Point, GuotuError> {
    match geom {
        geo::Geometry::Point(p) => Ok(shapefile::Point::new(p.x(), p.y())),
        other => Err(type_mismatch("Point", other)),
    }
}

fn to_shp_multipoint(geom: &geo::Geometry) -> Result<shapefile::Multipoint, GuotuError> {
    let points = match geom {
        geo::Geometry::Point(p) => vec![shapefile::Point::new(p.x(), p.y())],
        geo::Geometry::MultiPoint(mp) => mp
            .iter()
            .map(|p| shapefile::Point::new(p.x(), p.y()))
            .collect(),
        other => return Err(type_mismatch("MultiPoint", other)),
    };
    Ok(shapefile::Multipoint::new(points))
}

fn to_shp_polyline(geom: &geo::Geometry) -> Result<shapefile::Polyline, GuotuError> {
    let parts: Vec<Vec<shapefile::Point>> = match geom {
        geo::Geometry::LineString(ls) => vec![line_points(ls)],
        geo::Geometry::MultiLineString(mls) => mls.iter().map(line_points).collect(),
        other => return Err(type_mismatch("LineString", other)),
    };
    Ok(shapefile::Polyline::with_parts(parts))
}

fn to_shp_polygon(geom: &geo::Geometry) -> Result<shapefile::Polygon, GuotuError> {
    let mut rings: Vec<PolygonRing<shapefile::Point>> = Vec::new();
    let mut push_polygon = |poly: &geo::Polygon| {
        rings.push(PolygonRing::Outer(line_points(poly.exterior())));
        for hole in poly.interiors() {
            rings.push(PolygonRing::Inner(line_points(hole)));
        }
    };
    match geom {
        geo::Geometry::Polygon(p) => push_polygon(p),
        geo::Geometry::MultiPolygon(mp) => mp.iter().for_each(push_polygon),
        other => return Err(type_mismatch("Polygon", other)),
    }
    Ok(shapefile::Polygon::with_rings(rings))
}

fn line_points(ls: &geo::LineString) -> Vec<shapefile::Point> {
    ls.coords()
        .map(|c| shapefile::Point::new(c.x, c.y))
        .collect()
}

fn type_mismatch(expected: &str, got: &geo::Geometry) -> GuotuError {
    GuotuError::format_error(format!(
        "expected a {expected} geometry, got {}",
        wkt::kind_of(got).name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_base(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("guotu_shp_{}_{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("layer")
    }

    /// Builds a minimal DBF table: fields are (name, type char, length,
    /// decimals), record cells are raw byte strings padded to length.
    fn build_dbf(fields: &[(&str, u8, u8, u8)], records: &[Vec<Vec<u8>>]) -> Vec<u8> {
        let header_size = 32 + fields.len() * 32 + 1;
        let record_size = 1 + fields.iter().map(|f| f.2 as usize).sum::<usize>();
        let mut data = vec![0u8; 32];
        data[0] = 0x03;
        data[4..8].copy_from_slice(&(records.len() as u32).to_le_bytes());
        data[8..10].copy_from_slice(&(header_size as u16).to_le_bytes());
        data[10..12].copy_from_slice(&(record_size as u16).to_le_bytes());
        for (name, kind, length, decimals) in fields {
            let mut descriptor = [0u8; 32];
            descriptor[..name.len().min(10)].copy_from_slice(&name.as_bytes()[..name.len().min(10)]);
            descriptor[11] = *kind;
            descriptor[16] = *length;
            descriptor[17] = *decimals;
            data.extend_from_slice(&descriptor);
        }
        data.push(0x0D);
        for record in records {
            data.push(b' ');
            for (cell, (_, _, length, _)) in record.iter().zip(fields) {
                let mut padded = cell.clone();
                padded.resize(*length as usize, b' ');
                data.extend_from_slice(&padded);
            }
        }
        data
    }

    #[test]
    fn test_dbf_parse_types_and_gbk_text() {
        // DKMC holds "地块" in GBK
        let data = build_dbf(
            &[
                ("DKBH", b'C', 10, 0),
                ("DKMC", b'C', 10, 0),
                ("JZDS", b'N', 8, 0),
                ("DKMJ", b'N', 12, 4),
            ],
            &[vec![
                b"JC001".to_vec(),
                vec![0xB5, 0xD8, 0xBF, 0xE9],
                b"       5".to_vec(),
                b"      1.2500".to_vec(),
            ]],
        );
        let table = DbfTable::parse(&data, encoding_rs::GB18030).unwrap();
        assert_eq!(table.columns.len(), 4);
        assert_eq!(table.columns[0].field.name, "DKBH");
        assert_eq!(table.columns[2].field.kind, FieldKind::Long);
        assert_eq!(table.columns[3].field.kind, FieldKind::Double);
        let row = &table.rows[0];
        assert_eq!(row[0], Some(AttrValue::Text("JC001".into())));
        assert_eq!(row[1], Some(AttrValue::Text("地块".into())));
        assert_eq!(row[2], Some(AttrValue::Int(5)));
        assert_eq!(row[3], Some(AttrValue::Double(1.25)));
    }

    #[test]
    fn test_dbf_parse_date_and_empty() {
        let data = build_dbf(
            &[("RQ", b'D', 8, 0), ("BZ", b'C', 6, 0)],
            &[vec![b"20240115".to_vec(), b"".to_vec()]],
        );
        let table = DbfTable::parse(&data, encoding_rs::GB18030).unwrap();
        assert_eq!(table.rows[0][0], Some(AttrValue::Text("2024-01-15".into())));
        assert_eq!(table.rows[0][1], None);
    }

    #[test]
    fn test_field_name_truncation_and_suffix() {
        let fields = vec![
            Field::string("DKBH", ""),
            Field::string("VeryLongFieldName", ""),
            Field::string("VeryLongFieldNameToo", ""),
            Field::string("地块编号与超长名称", ""),
        ];
        let names = dbf_field_names(&fields);
        assert_eq!(names[0], "DKBH");
        assert_eq!(names[1], "VeryLongFi");
        assert_eq!(names[2], "VeryLong_1");
        // truncated on a character boundary, at most ten bytes
        assert_eq!(names[3], "地块编");
        assert!(names.iter().all(|n| n.len() <= DBF_NAME_BYTES));
    }

    #[test]
    fn test_ring_assembly_groups_holes_with_outer() {
        let outer1 = vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)];
        let hole = vec![(2.0, 2.0), (4.0, 2.0), (4.0, 4.0), (2.0, 4.0), (2.0, 2.0)];
        let outer2 = vec![(20.0, 0.0), (30.0, 0.0), (30.0, 10.0), (20.0, 10.0), (20.0, 0.0)];
        let geom = polygons_from(vec![(true, outer1), (false, hole), (true, outer2)]);
        match geom {
            geo::Geometry::MultiPolygon(mp) => {
                assert_eq!(mp.0.len(), 2);
                assert_eq!(mp.0[0].interiors().len(), 1);
                assert_eq!(mp.0[1].interiors().len(), 0);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_missing_sidecars_are_named() {
        let base = temp_base("missing");
        std::fs::write(base.with_extension("shp"), b"").unwrap();
        let err = Sidecars::locate(&base.with_extension("shp")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(".shx"), "message={message}");
        assert!(message.contains(".dbf"), "message={message}");
        assert!(message.contains(".prj"), "message={message}");
        assert!(!message.contains(".shp,"), "message={message}");
    }

    #[test]
    fn test_sidecar_case_and_encoding_fallback() {
        let base = temp_base("upper");
        std::fs::write(base.with_extension("shp"), b"").unwrap();
        std::fs::write(base.with_extension("SHX"), b"").unwrap();
        std::fs::write(base.with_extension("DBF"), b"").unwrap();
        std::fs::write(base.with_extension("prj"), b"").unwrap();
        let sidecars = Sidecars::locate(&base.with_extension("shp")).unwrap();
        assert!(sidecars.dbf.to_string_lossy().ends_with("DBF"));
        // no .cpg, no DBF language driver byte
        assert_eq!(sidecars.table_encoding().unwrap(), encoding_rs::UTF_8);

        std::fs::write(base.with_extension("cpg"), "UTF-7").unwrap();
        let sidecars = Sidecars::locate(&base.with_extension("shp")).unwrap();
        let err = sidecars.table_encoding().unwrap_err();
        assert!(err.to_string().contains("UTF-7"), "err={err}");
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let base = temp_base("roundtrip");
        let layer = Layer {
            name: Some("layer".into()),
            alias: None,
            wkid: Some(4526),
            geometry_kind: Some(GeometryKind::MultiPolygon),
            tolerance: Some(1e-4),
            fields: vec![
                Field::string("DKBH", "地块编号"),
                Field::new("DKMJ", FieldKind::Double),
            ],
            features: vec![{
                let mut f = Feature::with_id("0");
                f.geometry = Some(
                    "MULTIPOLYGON(((38500000 3380000,38500100 3380000,38500100 3380100,\
                     38500000 3380100,38500000 3380000)))"
                        .to_string(),
                );
                f.values = vec![
                    FieldValue::new(
                        Field::string("DKBH", ""),
                        Some(AttrValue::Text("110101JC001".into())),
                    ),
                    FieldValue::new(
                        Field::new("DKMJ", FieldKind::Double),
                        Some(AttrValue::Double(10000.0)),
                    ),
                ];
                f
            }],
            metadata: None,
        };

        write_layer(&layer, &base).unwrap();
        let read = read_layer(&base.with_extension("shp")).unwrap();

        assert_eq!(read.wkid, Some(4526));
        assert_eq!(read.geometry_kind, Some(GeometryKind::MultiPolygon));
        assert_eq!(read.fields[0].name, "DKBH");
        let feature = &read.features[0];
        assert_eq!(
            feature.attribute("dkbh").unwrap().as_text().as_deref(),
            Some("110101JC001")
        );
        assert_eq!(feature.attribute("DKMJ").unwrap().as_f64(), Some(10000.0));
        let geometry = feature.geometry.as_deref().unwrap();
        assert!(geometry.starts_with("MULTIPOLYGON"), "geometry={geometry}");
        assert!(geometry.contains("38500000"), "geometry={geometry}");
    }

    #[test]
    fn test_write_rejects_wrong_geometry_type() {
        let base = temp_base("mismatch");
        let mut layer = Layer {
            name: Some("layer".into()),
            wkid: Some(4490),
            geometry_kind: Some(GeometryKind::Point),
            tolerance: Some(1e-9),
            fields: vec![],
            features: vec![{
                let mut f = Feature::with_id("0");
                f.geometry = Some("LINESTRING(0 0,1 1)".into());
                f
            }],
            ..Default::default()
        };
        layer.validate().unwrap();
        let err = write_layer(&layer, &base).unwrap_err();
        assert!(err.to_string().contains("expected a Point"), "err={err}");
    }
}
