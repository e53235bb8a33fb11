//! Backend capability registry and engine dispatch.
//!
//! Two backends exist: the library backend, built from pure-Rust readers
//! and writers and always available, and the native backend, which wraps
//! the external driver layer and is only available when that layer
//! initialized successfully. Availability is probed once; a failed probe
//! marks the native backend unavailable for the process lifetime.
//!
//! Selection is a pure function of the registry value, so tests can build
//! registries by hand instead of mutating process globals.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::backend;
use crate::error::GuotuError;

/// Supported data formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Format {
    Wkt,
    GeoJson,
    EsriJson,
    Shp,
    Txt,
    FileGdb,
    PostGis,
    ArcSde,
}

/// Format, display label, native driver name
const FORMAT_TABLE: &[(Format, &str, Option<&str>)] = &[
    (Format::Wkt, "WKT", None),
    (Format::GeoJson, "GEOJSON", Some("GeoJSON")),
    (Format::EsriJson, "ESRIJSON", Some("ESRIJSON")),
    (Format::Shp, "SHP文件", Some("ESRI Shapefile")),
    (Format::Txt, "国土TXT", None),
    (Format::FileGdb, "FILEGDB", Some("OpenFileGDB")),
    (Format::PostGis, "POSTGIS", Some("PostgreSQL")),
    (Format::ArcSde, "ARCSDE", None),
];

impl Format {
    /// Display label, as shown in messages and listings
    pub fn label(self) -> &'static str {
        FORMAT_TABLE
            .iter()
            .find(|(f, _, _)| *f == self)
            .map(|(_, label, _)| *label)
            .unwrap_or("UNKNOWN")
    }

    /// Driver name used when dispatching to the native backend
    pub fn native_driver(self) -> Option<&'static str> {
        FORMAT_TABLE
            .iter()
            .find(|(f, _, _)| *f == self)
            .and_then(|(_, _, driver)| *driver)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Format {
    type Err = GuotuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WKT" => Ok(Format::Wkt),
            "GEOJSON" => Ok(Format::GeoJson),
            "ESRIJSON" => Ok(Format::EsriJson),
            "SHP" | "SHP文件" | "SHAPEFILE" => Ok(Format::Shp),
            "TXT" | "国土TXT" => Ok(Format::Txt),
            "FILEGDB" | "GDB" => Ok(Format::FileGdb),
            "POSTGIS" => Ok(Format::PostGis),
            "ARCSDE" => Ok(Format::ArcSde),
            other => Err(GuotuError::format_error(format!(
                "unknown format '{other}'"
            ))),
        }
    }
}

/// The two backend variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendKind {
    Library,
    Native,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Library => f.write_str("library"),
            BackendKind::Native => f.write_str("native"),
        }
    }
}

/// Caller's backend preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnginePreference {
    #[default]
    Auto,
    Library,
    Native,
}

impl FromStr for EnginePreference {
    type Err = GuotuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(EnginePreference::Auto),
            "library" => Ok(EnginePreference::Library),
            "native" => Ok(EnginePreference::Native),
            other => Err(GuotuError::engine_not_supported(format!(
                "unknown engine preference '{other}' (expected auto, library or native)"
            ))),
        }
    }
}

const LIBRARY_FORMATS: &[Format] = &[Format::Shp, Format::GeoJson, Format::PostGis, Format::Txt];
const NATIVE_FORMATS: &[Format] = &[Format::Shp, Format::GeoJson, Format::FileGdb, Format::PostGis];

/// Published capabilities and availability of one backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub available: bool,
    /// Driver version on success, failure reason otherwise
    pub detail: Option<String>,
    pub read: &'static [Format],
    pub write: &'static [Format],
}

impl BackendStatus {
    pub fn supports(&self, format: Format) -> bool {
        self.read.contains(&format) || self.write.contains(&format)
    }
}

/// Snapshot of both backends, taken once and passed around by value
#[derive(Debug, Clone, Serialize)]
pub struct EngineRegistry {
    pub library: BackendStatus,
    pub native: BackendStatus,
}

impl EngineRegistry {
    /// Probes the native driver layer and fixes the result.
    ///
    /// A failed probe is final: the native backend stays unavailable for
    /// this registry value, there is no retry.
    pub fn probe() -> Self {
        match backend::native::probe() {
            Ok(version) => {
                tracing::info!(version = %version, "Native driver layer available");
                Self::with_native(true, Some(version))
            }
            Err(reason) => {
                tracing::debug!(reason = %reason, "Native driver layer unavailable");
                Self::with_native(false, Some(reason))
            }
        }
    }

    /// Registry with the native backend marked unavailable
    pub fn without_native(reason: impl Into<String>) -> Self {
        Self::with_native(false, Some(reason.into()))
    }

    fn with_native(available: bool, detail: Option<String>) -> Self {
        EngineRegistry {
            library: BackendStatus {
                kind: BackendKind::Library,
                available: true,
                detail: None,
                read: LIBRARY_FORMATS,
                write: LIBRARY_FORMATS,
            },
            native: BackendStatus {
                kind: BackendKind::Native,
                available,
                detail,
                read: NATIVE_FORMATS,
                write: NATIVE_FORMATS,
            },
        }
    }

    /// Resolves a backend for the preference and format.
    ///
    /// An explicit choice fails when that backend is unavailable or does
    /// not support the format. AUTO prefers an available native backend
    /// and falls back to the library backend; the file-geodatabase format
    /// is native-only and never falls back.
    pub fn select(
        &self,
        preference: EnginePreference,
        format: Format,
    ) -> Result<BackendKind, GuotuError> {
        match preference {
            EnginePreference::Library => {
                if !self.library.supports(format) {
                    return Err(GuotuError::engine_not_supported(format!(
                        "library backend does not support format {format}"
                    )));
                }
                Ok(BackendKind::Library)
            }
            EnginePreference::Native => {
                if !self.native.available {
                    let reason = self.native.detail.as_deref().unwrap_or("not probed");
                    return Err(GuotuError::engine_not_supported(format!(
                        "native backend is not available: {reason}"
                    )));
                }
                if !self.native.supports(format) {
                    return Err(GuotuError::engine_not_supported(format!(
                        "native backend does not support format {format}"
                    )));
                }
                Ok(BackendKind::Native)
            }
            EnginePreference::Auto => {
                if self.native.available && self.native.supports(format) {
                    return Ok(BackendKind::Native);
                }
                if self.library.supports(format) {
                    return Ok(BackendKind::Library);
                }
                Err(GuotuError::engine_not_supported(format!(
                    "no backend supports format {format}"
                )))
            }
        }
    }
}
