//! # guotu
//!
//! 国土空间数据转换: one layer model over Shapefile, GeoJSON, FileGDB,
//! PostGIS and GuoTu TXT, with CGCS2000 Gauss-Krüger reprojection.
//!
//! ## Features
//!
//! - Reads and writes 国土TXT plot coordinate files (地块坐标)
//! - Shapefile with GBK/GB18030 attribute tables, GeoJSON, PostGIS COPY
//! - Optional GDAL backend (`native-gdal`) adds FileGDB and SQL filters
//! - CGCS2000 family only (EPSG 4490 and its Gauss-Krüger zones)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use guotu::{read_layer, write_layer, EngineRegistry, Format, ReadRequest, WriteRequest};
//!
//! let registry = EngineRegistry::probe();
//! let layer = read_layer(&registry, &ReadRequest::new(Format::Txt, "plots.txt")).await?;
//!
//! let mut request = WriteRequest::new(Format::Shp, "plots.shp");
//! request.target_wkid = Some(4526);
//! let written = write_layer(&registry, &layer, &request).await?;
//! println!("{written} features");
//! ```

pub mod backend;
pub mod crs;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod txt;
pub mod types;
pub mod wkt;

pub use engine::{BackendKind, BackendStatus, EnginePreference, EngineRegistry, Format};
pub use error::GuotuError;
pub use pipeline::{read_layer, write_layer, ReadRequest, WriteRequest};
pub use types::{
    AttrValue, Coordinate, Feature, Field, FieldKind, FieldValue, GeometryKind, Layer,
    LayerMetadata,
};
