//! Native driver backend over GDAL/OGR.
//!
//! Compiled only with the `native-gdal` feature; the fallback half keeps
//! the same signatures and reports the backend as unavailable. This is
//! the only route to FileGDB datasets.

#[cfg(not(feature = "native-gdal"))]
mod imp {
    use crate::error::GuotuError;
    use crate::types::Layer;

    const UNAVAILABLE: &str = "native backend not compiled (enable feature native-gdal)";

    pub fn probe() -> Result<String, String> {
        Err(UNAVAILABLE.to_string())
    }

    pub fn read_layer(
        _source: &str,
        _layer_name: Option<&str>,
        _where_clause: Option<&str>,
        _bbox: Option<[f64; 4]>,
    ) -> Result<Layer, GuotuError> {
        Err(GuotuError::engine_not_supported(UNAVAILABLE))
    }

    pub fn write_layer(
        _layer: &Layer,
        _target: &str,
        _driver_name: &str,
        _layer_name: Option<&str>,
        _feature_dataset: Option<&str>,
    ) -> Result<(), GuotuError> {
        Err(GuotuError::engine_not_supported(UNAVAILABLE))
    }
}

#[cfg(feature = "native-gdal")]
mod imp {
    use gdal::spatial_ref::SpatialRef;
    use gdal::vector::{FieldValue as GdalValue, Geometry, LayerAccess, LayerOptions};
    use gdal::{Dataset, DriverManager};

    use crate::crs;
    use crate::error::GuotuError;
    use crate::types::{AttrValue, Feature, Field, FieldKind, FieldValue, Layer};
    use crate::wkt;

    fn gdal_err(e: gdal::errors::GdalError) -> GuotuError {
        GuotuError::data_source(e.to_string())
    }

    /// Registers the drivers and reports the library release
    pub fn probe() -> Result<String, String> {
        DriverManager::register_all();
        Ok(gdal::version::version_info("RELEASE_NAME"))
    }

    pub fn read_layer(
        source: &str,
        layer_name: Option<&str>,
        where_clause: Option<&str>,
        bbox: Option<[f64; 4]>,
    ) -> Result<Layer, GuotuError> {
        let dataset = Dataset::open(source).map_err(gdal_err)?;
        let mut layer = match layer_name {
            Some(name) => dataset.layer_by_name(name).map_err(gdal_err)?,
            None => dataset.layer(0).map_err(gdal_err)?,
        };
        if let Some(clause) = where_clause {
            layer.set_attribute_filter(clause).map_err(gdal_err)?;
        }
        if let Some([min_x, min_y, max_x, max_y]) = bbox {
            layer.set_spatial_filter_rect(min_x, min_y, max_x, max_y);
        }

        let (wkid, tolerance) = match layer.spatial_ref() {
            Some(srs) => {
                let resolved = match srs.auth_code() {
                    Ok(code) if code > 0 => crs::lookup(code as u32)?,
                    _ => {
                        let text = srs.to_wkt().map_err(gdal_err)?;
                        crs::standardize_wkt(&text)?.1
                    }
                };
                (Some(resolved.wkid), Some(crs::tolerance(&resolved)))
            }
            None => (None, None),
        };
        let decimals = tolerance.map(wkt::decimals_for_tolerance);

        let fields: Vec<Field> = layer
            .defn()
            .fields()
            .map(|f| Field::new(f.name(), FieldKind::from_code(f.field_type() as i32)))
            .collect();

        let mut geometry_kind = None;
        let mut features = Vec::new();
        for source_feature in layer.features() {
            let mut feature = match source_feature.fid() {
                Some(fid) => Feature::with_id(fid.to_string()),
                None => Feature::generated(),
            };
            if let Some(geometry) = source_feature.geometry() {
                let text = geometry.wkt().map_err(gdal_err)?;
                let geom = wkt::parse_wkt_lenient(&text)?;
                let geom = match decimals {
                    Some(d) => wkt::round_geometry(&geom, d),
                    None => geom,
                };
                if geometry_kind.is_none() {
                    geometry_kind = Some(wkt::kind_of(&geom));
                }
                feature.geometry = Some(wkt::to_wkt(&geom));
            }
            feature.values = fields
                .iter()
                .map(|field| {
                    let value = source_feature
                        .field(&field.name)
                        .ok()
                        .flatten()
                        .and_then(attr_from_gdal);
                    FieldValue::new(field.clone(), value)
                })
                .collect();
            features.push(feature);
        }

        let name = layer.name();
        tracing::debug!(source, layer = %name, features = features.len(), "Native read");
        Ok(Layer {
            name: Some(name.clone()),
            alias: Some(name),
            wkid,
            geometry_kind,
            tolerance,
            fields,
            features,
            metadata: None,
        })
    }

    fn attr_from_gdal(value: GdalValue) -> Option<AttrValue> {
        match value {
            GdalValue::IntegerValue(v) => Some(AttrValue::Int(v as i64)),
            GdalValue::Integer64Value(v) => Some(AttrValue::Int(v)),
            GdalValue::RealValue(v) => Some(AttrValue::Double(v)),
            GdalValue::StringValue(v) => Some(AttrValue::Text(v)),
            _ => None,
        }
    }

    pub fn write_layer(
        layer: &Layer,
        target: &str,
        driver_name: &str,
        layer_name: Option<&str>,
        feature_dataset: Option<&str>,
    ) -> Result<(), GuotuError> {
        let wkid = layer
            .wkid
            .ok_or_else(|| GuotuError::layer_validation("CRS identifier is missing"))?;
        let kind = layer
            .geometry_kind
            .ok_or_else(|| GuotuError::layer_validation("geometry kind is missing"))?;
        let type_code = kind.wkb_code().ok_or_else(|| {
            GuotuError::format_error(format!(
                "geometry type {} cannot be written natively",
                kind.name()
            ))
        })?;

        let driver = DriverManager::get_driver_by_name(driver_name).map_err(gdal_err)?;
        let mut dataset = driver.create_vector_only(target).map_err(gdal_err)?;
        let srs = SpatialRef::from_epsg(wkid).map_err(gdal_err)?;

        let creation_options: Vec<String> = feature_dataset
            .map(|fd| vec![format!("FEATURE_DATASET={fd}")])
            .unwrap_or_default();
        let option_refs: Vec<&str> = creation_options.iter().map(|s| s.as_str()).collect();

        let name = layer_name.or(layer.name.as_deref()).unwrap_or("layer");
        let mut out = dataset
            .create_layer(LayerOptions {
                name,
                srs: Some(&srs),
                ty: type_code,
                options: if option_refs.is_empty() {
                    None
                } else {
                    Some(&option_refs)
                },
            })
            .map_err(gdal_err)?;

        let field_defs: Vec<(&str, u32)> = layer
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.kind.code() as u32))
            .collect();
        out.create_defn_fields(&field_defs).map_err(gdal_err)?;

        for feature in &layer.features {
            let text = feature.geometry.as_deref().ok_or_else(|| {
                GuotuError::format_error(format!("feature {} has no geometry", feature.id))
            })?;
            let geom = Geometry::from_wkt(text).map_err(gdal_err)?;

            let mut names = Vec::new();
            let mut values = Vec::new();
            for value in &feature.values {
                if let Some(gdal_value) = attr_to_gdal(value) {
                    names.push(value.field.name.as_str());
                    values.push(gdal_value);
                }
            }
            out.create_feature_fields(geom, &names, &values)
                .map_err(gdal_err)?;
        }

        tracing::info!(target, driver = driver_name, features = layer.features.len(), "Native write");
        Ok(())
    }

    fn attr_to_gdal(value: &FieldValue) -> Option<GdalValue> {
        match value.value.as_ref()? {
            AttrValue::Int(v) => Some(GdalValue::Integer64Value(*v)),
            AttrValue::Double(v) => Some(GdalValue::RealValue(*v)),
            AttrValue::Text(v) => Some(GdalValue::StringValue(v.clone())),
            AttrValue::Bool(v) => Some(GdalValue::StringValue(v.to_string())),
            AttrValue::Bytes(_) => None,
        }
    }
}

pub use imp::{probe, read_layer, write_layer};
