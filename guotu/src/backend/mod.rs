//! Format backends.
//!
//! `shp`, `geojson` and `postgis` make up the library backend; `native`
//! wraps the external driver layer, with a real implementation behind
//! the `native-gdal` feature and an always-unavailable stub without it.

pub mod geojson;
pub mod native;
pub mod postgis;
pub mod shp;
