//! End-to-end round trips over generated GuoTu TXT fixtures

use std::path::PathBuf;

use guotu::{
    read_layer, write_layer, EngineRegistry, Format, GeometryKind, Layer, ReadRequest,
    WriteRequest,
};

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("guotu_it_{}_{tag}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Zone-38 plot file with `plots` square plots of one hectare each
fn plot_content(plots: usize) -> String {
    let mut lines: Vec<String> = vec![
        "[属性描述]".into(),
        "格式版本号=2.0".into(),
        "数据产生单位=测试中心".into(),
        "数据产生日期=2024-06-01".into(),
        "坐标系=2000国家大地坐标系".into(),
        "几度分带=3".into(),
        "投影类型=高斯克吕格".into(),
        "计量单位=米".into(),
        "带号=38".into(),
        "精度=0.01".into(),
        "转换参数=0,0,0,0,0,0,0".into(),
        "[地块坐标]".into(),
    ];
    for i in 0..plots {
        let e = 38_500_000.0 + (i as f64) * 200.0;
        let n = 3_380_000.0;
        lines.push(format!("4,1,DK{i:04},地块{i},面,,耕地,0101,1,旱地,,,无,@"));
        lines.push(format!("1,1,{n},{e}"));
        lines.push(format!("2,1,{n},{}", e + 100.0));
        lines.push(format!("3,1,{},{}", n + 100.0, e + 100.0));
        lines.push(format!("4,1,{},{e}", n + 100.0));
    }
    lines.join("\n") + "\n"
}

#[test]
fn test_parse_write_parse_round_trip() {
    let dir = temp_dir("roundtrip");
    let path = dir.join("plots.txt");
    std::fs::write(&path, plot_content(3)).unwrap();

    let first = guotu::txt::parse_file(&path, None).unwrap();
    assert_eq!(first.wkid, Some(4526));
    assert_eq!(first.geometry_kind, Some(GeometryKind::MultiPolygon));
    assert_eq!(first.fields.len(), 13);
    assert_eq!(first.features.len(), 3);
    assert_eq!(
        first.features[1].attribute("DKBH").unwrap().as_text().as_deref(),
        Some("DK0001")
    );
    assert_eq!(
        first.features[1].attribute("DKMC").unwrap().as_text().as_deref(),
        Some("地块1")
    );

    let rewritten = guotu::txt::write_string(&first, &Default::default()).unwrap();
    let second = guotu::txt::parse_str(&rewritten, "plots.txt", None).unwrap();
    assert_eq!(second.features.len(), 3);
    assert_eq!(second.wkid, first.wkid);
    for (a, b) in first.features.iter().zip(&second.features) {
        let ga = guotu::wkt::parse_wkt(a.geometry.as_deref().unwrap()).unwrap();
        let gb = guotu::wkt::parse_wkt(b.geometry.as_deref().unwrap()).unwrap();
        assert_eq!(ga, gb);
        assert_eq!(
            a.attribute("DKBH").unwrap().as_text(),
            b.attribute("DKBH").unwrap().as_text()
        );
    }
    // the writer fills the point count and hectare area
    assert_eq!(
        second.features[0].attribute("JZDS").unwrap().as_text().as_deref(),
        Some("5")
    );
    assert_eq!(
        second.features[0].attribute("DKMJ").unwrap().as_text().as_deref(),
        Some("1")
    );
}

#[test]
fn test_parse_generated_batch_in_parallel() {
    use rayon::prelude::*;

    let dir = temp_dir("batch");
    let mut expected = 0usize;
    for i in 0..8 {
        let plots = i + 1;
        expected += plots;
        std::fs::write(dir.join(format!("batch_{i}.txt")), plot_content(plots)).unwrap();
    }

    let pattern = format!("{}/batch_*.txt", dir.display());
    let paths: Vec<PathBuf> = glob::glob(&pattern)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .collect();
    assert_eq!(paths.len(), 8);

    let total: usize = paths
        .par_iter()
        .map(|path| {
            let layer = guotu::txt::parse_file(path, None).unwrap();
            assert_eq!(layer.wkid, Some(4526));
            layer.features.len()
        })
        .sum();

    println!("parsed {} files, {} features", paths.len(), total);
    assert_eq!(total, expected);
}

#[tokio::test]
async fn test_pipeline_txt_to_geojson_and_back() {
    let dir = temp_dir("pipeline");
    let txt_path = dir.join("plots.txt");
    std::fs::write(&txt_path, plot_content(2)).unwrap();

    let registry = EngineRegistry::probe();
    let layer = read_layer(
        &registry,
        &ReadRequest::new(Format::Txt, txt_path.to_string_lossy()),
    )
    .await
    .unwrap();
    assert_eq!(layer.features.len(), 2);

    // projected -> geographic on the way out
    let geojson_path = dir.join("plots.geojson");
    let mut request = WriteRequest::new(Format::GeoJson, geojson_path.to_string_lossy());
    request.target_wkid = Some(4490);
    let written = write_layer(&registry, &layer, &request).await.unwrap();
    assert_eq!(written, 2);

    let back = read_layer(
        &registry,
        &ReadRequest::new(Format::GeoJson, geojson_path.to_string_lossy()),
    )
    .await
    .unwrap();
    assert_eq!(back.wkid, Some(4490));
    assert_eq!(back.features.len(), 2);
    assert_eq!(
        back.features[0].attribute("DKBH").unwrap().as_text().as_deref(),
        Some("DK0000")
    );

    // easting 38 500 000 sits on the zone 38 central meridian
    let geom = guotu::wkt::parse_wkt(back.features[0].geometry.as_deref().unwrap()).unwrap();
    match geom {
        geo::Geometry::Polygon(polygon) => {
            let x = polygon.exterior().0[0].x;
            assert!((113.0..115.0).contains(&x), "lon={x}");
        }
        other => panic!("polygon expected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pipeline_shapefile_strips_reserved_fields() {
    use guotu::{AttrValue, Feature, Field, FieldKind, FieldValue};

    let dir = temp_dir("shp");
    let mut feature = Feature::with_id("0");
    feature.geometry = Some("POINT(38500000 3380000)".into());
    feature.values = vec![
        FieldValue::new(
            Field::string("DKBH", ""),
            Some(AttrValue::Text("DK0001".into())),
        ),
        FieldValue::new(Field::new("OBJECTID", FieldKind::Long), Some(AttrValue::Int(7))),
    ];
    let layer = Layer {
        name: Some("plots".into()),
        wkid: Some(4526),
        geometry_kind: Some(GeometryKind::Point),
        fields: vec![
            Field::string("DKBH", ""),
            Field::new("OBJECTID", FieldKind::Long),
        ],
        features: vec![feature],
        ..Default::default()
    };

    let registry = EngineRegistry::probe();
    let target = dir.join("plots.shp");
    let request = WriteRequest::new(Format::Shp, target.to_string_lossy());
    let written = write_layer(&registry, &layer, &request).await.unwrap();
    assert_eq!(written, 1);

    let back = read_layer(
        &registry,
        &ReadRequest::new(Format::Shp, target.to_string_lossy()),
    )
    .await
    .unwrap();
    assert_eq!(back.wkid, Some(4526));
    assert_eq!(back.fields.len(), 1, "source-managed column must not survive");
    assert_eq!(back.fields[0].name, "DKBH");
    assert_eq!(
        back.features[0].attribute("DKBH").unwrap().as_text().as_deref(),
        Some("DK0001")
    );
}
