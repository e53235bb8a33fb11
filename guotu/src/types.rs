//! Layer model: layers, features, fields, field values, coordinates, metadata

use serde::{Deserialize, Serialize};

use crate::error::GuotuError;

/// Geometry kind of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    LinearRing,
    GeometryCollection,
    Unknown,
}

/// Geometry kind to WKB type code, and back.
///
/// `LinearRing` uses the non-standard driver code 101.
const GEOMETRY_WKB_CODES: &[(GeometryKind, u32)] = &[
    (GeometryKind::Point, 1),
    (GeometryKind::LineString, 2),
    (GeometryKind::Polygon, 3),
    (GeometryKind::MultiPoint, 4),
    (GeometryKind::MultiLineString, 5),
    (GeometryKind::MultiPolygon, 6),
    (GeometryKind::GeometryCollection, 7),
    (GeometryKind::LinearRing, 101),
];

const GEOMETRY_NAMES: &[(GeometryKind, &str)] = &[
    (GeometryKind::Point, "Point"),
    (GeometryKind::MultiPoint, "MultiPoint"),
    (GeometryKind::LineString, "LineString"),
    (GeometryKind::MultiLineString, "MultiLineString"),
    (GeometryKind::Polygon, "Polygon"),
    (GeometryKind::MultiPolygon, "MultiPolygon"),
    (GeometryKind::LinearRing, "LinearRing"),
    (GeometryKind::GeometryCollection, "GeometryCollection"),
];

impl GeometryKind {
    /// WKB type code used by external drivers
    pub fn wkb_code(self) -> Option<u32> {
        GEOMETRY_WKB_CODES
            .iter()
            .find(|(k, _)| *k == self)
            .map(|(_, c)| *c)
    }

    /// Resolves a WKB type code (2D part only)
    pub fn from_wkb_code(code: u32) -> GeometryKind {
        GEOMETRY_WKB_CODES
            .iter()
            .find(|(_, c)| *c == code % 1000)
            .map(|(k, _)| *k)
            .unwrap_or(GeometryKind::Unknown)
    }

    /// Canonical name ("MultiPolygon", ...)
    pub fn name(self) -> &'static str {
        GEOMETRY_NAMES
            .iter()
            .find(|(k, _)| *k == self)
            .map(|(_, n)| *n)
            .unwrap_or("Unknown")
    }

    /// Resolves a name, case-insensitively
    pub fn from_name(name: &str) -> GeometryKind {
        GEOMETRY_NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(k, _)| *k)
            .unwrap_or(GeometryKind::Unknown)
    }

    /// True for Polygon and MultiPolygon
    pub fn is_polygonal(self) -> bool {
        matches!(self, GeometryKind::Polygon | GeometryKind::MultiPolygon)
    }
}

/// Data type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Integer,
    Long,
    Double,
    String,
    Binary,
    Date,
    Time,
    DateTime,
}

/// Canonical external type code per field kind (OGR numbering).
const FIELD_KIND_CODES: &[(FieldKind, i32)] = &[
    (FieldKind::Integer, 0),
    (FieldKind::Double, 2),
    (FieldKind::String, 4),
    (FieldKind::Binary, 8),
    (FieldKind::Date, 9),
    (FieldKind::Time, 10),
    (FieldKind::DateTime, 11),
    (FieldKind::Long, 12),
];

impl FieldKind {
    /// External (driver) type code
    pub fn code(self) -> i32 {
        FIELD_KIND_CODES
            .iter()
            .find(|(k, _)| *k == self)
            .map(|(_, c)| *c)
            .expect("every field kind has a code")
    }

    /// Resolves an external type code.
    ///
    /// The list variants and wide-string variants of the external numbering
    /// (1, 3, 5, 6, 7, 13) all collapse to `String`; unknown codes do too.
    pub fn from_code(code: i32) -> FieldKind {
        match code {
            0 => FieldKind::Integer,
            2 => FieldKind::Double,
            8 => FieldKind::Binary,
            9 => FieldKind::Date,
            10 => FieldKind::Time,
            11 => FieldKind::DateTime,
            12 => FieldKind::Long,
            _ => FieldKind::String,
        }
    }
}

/// Definition of an attribute field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    /// Field name, unique within a layer (compared case-insensitively)
    pub name: String,

    /// Display alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Data type tag
    pub kind: FieldKind,

    /// Maximum length, used when creating a target schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,

    /// Whether NULL values are allowed in the target schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,

    /// Default value in the target schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl Field {
    /// Creates a string field with alias
    pub fn string(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
            description: None,
            kind: FieldKind::String,
            length: None,
            nullable: None,
            default_value: None,
        }
    }

    /// Creates a field of the given kind without alias
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            alias: None,
            description: None,
            kind,
            length: None,
            nullable: None,
            default_value: None,
        }
    }
}

/// Raw attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Double(f64),
    Text(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

/// A field definition paired with a raw value.
///
/// The typed accessors coerce on a best-effort basis and return `None`
/// when the value cannot be represented, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    pub field: Field,
    pub value: Option<AttrValue>,
}

impl FieldValue {
    pub fn new(field: Field, value: Option<AttrValue>) -> Self {
        Self { field, value }
    }

    /// Value rendered as text
    pub fn as_text(&self) -> Option<String> {
        match &self.value {
            None => None,
            Some(AttrValue::Text(s)) => Some(s.clone()),
            Some(AttrValue::Int(i)) => Some(i.to_string()),
            Some(AttrValue::Double(d)) => Some(d.to_string()),
            Some(AttrValue::Bool(b)) => Some(b.to_string()),
            Some(AttrValue::Bytes(_)) => None,
        }
    }

    /// Value as a 64-bit integer; text is parsed, doubles are rejected
    pub fn as_i64(&self) -> Option<i64> {
        match &self.value {
            Some(AttrValue::Int(i)) => Some(*i),
            Some(AttrValue::Text(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Value as a 32-bit integer
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    /// Value as a double; integers widen, text is parsed
    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            Some(AttrValue::Double(d)) => Some(*d),
            Some(AttrValue::Int(i)) => Some(*i as f64),
            Some(AttrValue::Text(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A raw coordinate record from the GuoTu TXT format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,

    /// Point sequence number, kept as written in the source
    pub point_number: String,

    /// Ring number: 1 is the exterior shell, larger numbers are holes
    pub ring_number: i32,
}

/// A single feature of a layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Format-native identity when available, else a generated token.
    ///
    /// Not stable across backends; never treat it as a primary key.
    pub id: String,

    /// Geometry as well-known text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,

    /// Attribute values, in field order
    pub values: Vec<FieldValue>,

    /// Raw coordinate records (GuoTu TXT source only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coordinates: Vec<Coordinate>,

    /// Raw attribute strings before typing (GuoTu TXT source only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_values: Vec<String>,
}

impl Feature {
    /// Creates an empty feature with a freshly generated id
    pub fn generated() -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            geometry: None,
            values: Vec::new(),
            coordinates: Vec::new(),
            raw_values: Vec::new(),
        }
    }

    /// Creates an empty feature with a format-native id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            geometry: None,
            values: Vec::new(),
            coordinates: Vec::new(),
            raw_values: Vec::new(),
        }
    }

    /// Looks up an attribute by field name, case-insensitively
    pub fn attribute(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|v| v.field.name.eq_ignore_ascii_case(name))
    }
}

/// A free-form `[Section]` block preserved for round-trip fidelity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedInfo {
    pub name: String,

    /// Key/value pairs in encounter order
    pub properties: Vec<(String, String)>,
}

/// The ten named attributes of the GuoTu TXT `[属性描述]` block.
///
/// All values are optional strings; the writer substitutes fixed defaults
/// for absent ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    /// 格式版本号
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,
    /// 数据产生单位
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    /// 数据产生日期
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_date: Option<String>,
    /// 坐标系
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs_name: Option<String>,
    /// 几度分带
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_width: Option<String>,
    /// 投影类型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_name: Option<String>,
    /// 计量单位
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// 带号
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_number: Option<String>,
    /// 精度
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
    /// 转换参数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_params: Option<String>,

    /// Other `[Section]` blocks, in encounter order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extended: Vec<ExtendedInfo>,
}

/// The canonical in-memory representation of a feature layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Canonical CRS identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wkid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_kind: Option<GeometryKind>,

    /// Coordinate tolerance derived from the CRS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,

    pub fields: Vec<Field>,

    pub features: Vec<Feature>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<LayerMetadata>,
}

impl Layer {
    /// Checks the model invariants and fills the tolerance from the CRS
    /// identifier when absent.
    ///
    /// After a successful call, `geometry_kind`, `name`, `wkid` and
    /// `tolerance` are all present.
    pub fn validate(&mut self) -> Result<(), GuotuError> {
        if self.geometry_kind.is_none() {
            return Err(GuotuError::layer_validation("geometry kind is missing"));
        }
        if self.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            return Err(GuotuError::layer_validation("layer name is missing"));
        }
        let wkid = self
            .wkid
            .ok_or_else(|| GuotuError::layer_validation("CRS identifier is missing"))?;
        if self.tolerance.is_none() {
            self.tolerance = Some(crate::crs::tolerance_of(wkid)?);
        }
        Ok(())
    }

    /// Looks up a field definition by name, case-insensitively
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_kind_tables() {
        assert_eq!(GeometryKind::MultiPolygon.wkb_code(), Some(6));
        assert_eq!(GeometryKind::LinearRing.wkb_code(), Some(101));
        assert_eq!(GeometryKind::from_wkb_code(3), GeometryKind::Polygon);
        assert_eq!(GeometryKind::from_wkb_code(999), GeometryKind::Unknown);
        assert_eq!(
            GeometryKind::from_name("multipolygon"),
            GeometryKind::MultiPolygon
        );
        assert!(GeometryKind::Polygon.is_polygonal());
        assert!(!GeometryKind::LineString.is_polygonal());
    }

    #[test]
    fn test_field_kind_codes() {
        assert_eq!(FieldKind::Integer.code(), 0);
        assert_eq!(FieldKind::Long.code(), 12);
        assert_eq!(FieldKind::from_code(2), FieldKind::Double);
        // list and wide-string codes collapse to String
        for code in [1, 3, 5, 6, 7, 13, 99] {
            assert_eq!(FieldKind::from_code(code), FieldKind::String);
        }
    }

    #[test]
    fn test_field_value_coercions() {
        let f = Field::new("n", FieldKind::String);
        let v = FieldValue::new(f.clone(), Some(AttrValue::Text("42".into())));
        assert_eq!(v.as_i64(), Some(42));
        assert_eq!(v.as_f64(), Some(42.0));

        let v = FieldValue::new(f.clone(), Some(AttrValue::Text("4.5".into())));
        assert_eq!(v.as_i64(), None);
        assert_eq!(v.as_f64(), Some(4.5));

        let v = FieldValue::new(f.clone(), Some(AttrValue::Double(3.0)));
        assert_eq!(v.as_i64(), None);
        assert_eq!(v.as_text(), Some("3".to_string()));

        let v = FieldValue::new(f, None);
        assert_eq!(v.as_text(), None);
        assert_eq!(v.as_i32(), None);
    }

    #[test]
    fn test_attribute_lookup_is_case_insensitive() {
        let mut feature = Feature::generated();
        feature.values.push(FieldValue::new(
            Field::string("DKBH", "地块编号"),
            Some(AttrValue::Text("110101".into())),
        ));
        assert!(feature.attribute("dkbh").is_some());
        assert!(feature.attribute("DKBH").is_some());
        assert!(feature.attribute("dkmc").is_none());
    }

    #[test]
    fn test_validate_requires_core_fields() {
        let mut layer = Layer {
            name: Some("dk".into()),
            geometry_kind: Some(GeometryKind::MultiPolygon),
            wkid: Some(4526),
            ..Default::default()
        };
        layer.validate().unwrap();
        // projected tolerance auto-filled
        assert_eq!(layer.tolerance, Some(1e-4));

        let mut no_kind = Layer {
            name: Some("dk".into()),
            wkid: Some(4526),
            ..Default::default()
        };
        assert!(matches!(
            no_kind.validate(),
            Err(GuotuError::LayerValidation(_))
        ));

        let mut no_name = Layer {
            name: Some("  ".into()),
            geometry_kind: Some(GeometryKind::MultiPolygon),
            wkid: Some(4526),
            ..Default::default()
        };
        assert!(no_name.validate().is_err());

        let mut no_wkid = Layer {
            name: Some("dk".into()),
            geometry_kind: Some(GeometryKind::MultiPolygon),
            ..Default::default()
        };
        assert!(no_wkid.validate().is_err());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Feature::generated();
        let b = Feature::generated();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_layer_round_trips_through_json() {
        let mut layer = Layer {
            name: Some("dk".into()),
            alias: Some("地块".into()),
            wkid: Some(4526),
            geometry_kind: Some(GeometryKind::MultiPolygon),
            fields: vec![Field::string("DKBH", "地块编号")],
            ..Default::default()
        };
        let mut feature = Feature::with_id("1");
        feature.geometry = Some("POLYGON((0 0,0 1,1 1,0 0))".into());
        feature.values.push(FieldValue::new(
            layer.fields[0].clone(),
            Some(AttrValue::Text("110101".into())),
        ));
        layer.features.push(feature);

        let json = serde_json::to_string(&layer).unwrap();
        let back: Layer = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name.as_deref(), Some("dk"));
        assert_eq!(back.features.len(), 1);
        assert_eq!(back.features[0].values[0].as_text().as_deref(), Some("110101"));
    }
}
