//! End-to-end pipeline tests on a synthetic Sentinel-2 scene near Madrid.
//!
//! The scene is written as one GeoTIFF per band in WGS84, acquired through
//! the directory supplier, normalized to UTM 30N and run through indices,
//! regression and carbon conversion.

use forestcarb_algorithms::acquisition::{
    AcquisitionRequest, BBox, GeoTiffDirectorySupplier, ImagerySupplier,
};
use forestcarb_algorithms::carbon::{carbon_layers, convert, total_stock, CARBON_BAND, CO2_BAND};
use forestcarb_algorithms::imagery::{feature_samples, vegetation_indices, BandMapping, NDVI};
use forestcarb_algorithms::regression::{predict_raster, BiomassEstimator, ForestParams};
use forestcarb_algorithms::reproject::normalize;
use forestcarb_algorithms::validation::validate;
use forestcarb_core::io::{read_geotiff, write_band, write_geotiff};
use forestcarb_core::{
    Error, FeatureSample, GeoTransform, MultiBandRaster, Raster, Resolution, Stage, CRS,
};
use std::path::Path;

const SIZE: usize = 40;

/// Write B8/B4/B2 bands with a west-to-east vegetation gradient
fn write_scene(dir: &Path) {
    let bands = [("B8", 0.25, 0.01), ("B4", 0.12, -0.002), ("B2", 0.06, -0.0008)];
    for (name, base, step) in bands {
        let mut r = Raster::new(SIZE, SIZE);
        r.set_transform(GeoTransform::new(-3.71, 40.42, 0.0002, -0.0002));
        r.set_crs(Some(CRS::wgs84()));
        for row in 0..SIZE {
            for col in 0..SIZE {
                let v = base + step * col as f64 + 0.0005 * (row % 5) as f64;
                r.set(row, col, v).unwrap();
            }
        }
        write_band(&r, name, dir.join(format!("{}.tif", name))).unwrap();
    }
}

fn acquire(dir: &Path) -> MultiBandRaster {
    let mut supplier = GeoTiffDirectorySupplier::new(dir).with_acquisition_date("2024-06-15");
    supplier.open().unwrap();
    let mapping = BandMapping::sentinel2();
    let request = AcquisitionRequest::new(
        BBox::new(-3.72, 40.40, -3.70, 40.43),
        "2024-06-01/2024-06-30",
        mapping.names().iter().map(|s| s.to_string()).collect(),
    );
    let raster = supplier.fetch(&request).unwrap();
    supplier.close().unwrap();
    raster
}

fn utm30() -> CRS {
    CRS::utm(30, true)
}

fn same_values(a: &MultiBandRaster, b: &MultiBandRaster) -> bool {
    a.data()
        .iter()
        .zip(b.data().iter())
        .all(|(x, y)| (x.is_nan() && y.is_nan()) || (x - y).abs() < 1e-9)
}

#[test]
fn normalize_is_idempotent_on_acquired_scene() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path());
    let scene = acquire(dir.path());
    assert_eq!(scene.shape(), (SIZE, SIZE));

    let res = Resolution::square(20.0);
    let once = normalize(&scene, &utm30(), res).unwrap();
    let twice = normalize(&once, &utm30(), res).unwrap();

    assert_eq!(once.band_names(), scene.band_names());
    assert_eq!(once.shape(), twice.shape());
    assert!(once.transform().approx_eq(twice.transform()));
    assert!(same_values(&once, &twice));
}

#[test]
fn full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path());
    let scene = acquire(dir.path());

    // Normalize
    let normalized = normalize(&scene, &utm30(), Resolution::square(20.0)).unwrap();
    assert_eq!(normalized.crs(), Some(&utm30()));
    assert_eq!(normalized.band_count(), 3);

    // Indices plus a structural layer on the same grid
    let indices = vegetation_indices(&normalized, &BandMapping::sentinel2()).unwrap();
    let ndvi = indices.band_raster(NDVI).unwrap();
    let height = ndvi.with_same_meta(ndvi.data().mapv(|v| 4.0 + 40.0 * v)).unwrap();
    let stack = indices
        .stack(&MultiBandRaster::from_bands(vec![("Canopy_Height".into(), height)]).unwrap())
        .unwrap();

    // Training plots sampled from the stack
    let samples = feature_samples(&stack).unwrap();
    let labelled: Vec<(FeatureSample, f64)> = samples
        .iter()
        .filter(|s| s.is_complete())
        .step_by(3)
        .map(|s| {
            let h = s.get("Canopy_Height").flatten().unwrap();
            let n = s.get(NDVI).flatten().unwrap();
            (s.clone(), 8.0 * h + 60.0 * n)
        })
        .collect();
    assert!(labelled.len() > 100, "only {} training plots", labelled.len());
    let (features, targets): (Vec<_>, Vec<_>) = labelled.into_iter().unzip();

    let estimator = BiomassEstimator::new(ForestParams {
        n_trees: 30,
        ..Default::default()
    });
    let model = estimator.train(&features, &targets).unwrap();

    // Raster prediction agrees with per-sample prediction
    let biomass = predict_raster(&model, &stack).unwrap();
    let per_sample = model.predict(&samples).unwrap();
    let cols = stack.cols();
    for (i, p) in per_sample.iter().enumerate() {
        let v = biomass.get(i / cols, i % cols).unwrap();
        match p {
            Some(p) => assert_eq!(v, *p),
            None => assert!(v.is_nan()),
        }
    }

    // Training fit
    let fitted: Vec<f64> = model
        .predict(&features)
        .unwrap()
        .into_iter()
        .map(|p| p.unwrap())
        .collect();
    let report = validate(&fitted, &targets).unwrap();
    assert!(report.r2.unwrap() > 0.9, "{}", report);

    // Carbon
    let layers = carbon_layers(&biomass).unwrap();
    let b = biomass.get(10, 10).unwrap();
    assert_eq!(layers.band(CARBON_BAND).unwrap()[(10, 10)], convert(b).carbon);
    assert_eq!(layers.band(CO2_BAND).unwrap()[(10, 10)], convert(b).co2);

    let stock = total_stock(&biomass).unwrap();
    assert!(stock.pixels > 0);
    assert!((stock.area_ha - stock.pixels as f64 * 0.04).abs() < 1e-9);
    assert!((stock.co2 - stock.carbon * 44.0 / 12.0).abs() < 1e-6);

    // Persisted layers round-trip
    let path = dir.path().join("carbon.tif");
    write_geotiff(&layers, &path).unwrap();
    let back = read_geotiff(&path).unwrap();
    assert_eq!(back.band_names(), layers.band_names());
    assert_eq!(back.crs().and_then(|c| c.epsg()), Some(32630));
    assert!(back.transform().approx_eq(layers.transform()));
    assert!(same_values(&back, &layers));
}

#[test]
fn training_is_deterministic() {
    let features: Vec<FeatureSample> = (0..80)
        .map(|i| {
            FeatureSample::new()
                .with("NDVI", 0.3 + (i % 13) as f64 * 0.03)
                .with("EVI", 0.2 + (i % 7) as f64 * 0.04)
                .with("Canopy_Height", 5.0 + (i % 19) as f64)
        })
        .collect();
    let targets: Vec<f64> = (0..80).map(|i| 10.0 * (i % 19) as f64 + (i % 13) as f64).collect();
    let held_out = vec![
        FeatureSample::new()
            .with("NDVI", 0.61)
            .with("EVI", 0.33)
            .with("Canopy_Height", 12.5),
        FeatureSample::new()
            .with("NDVI", 0.42)
            .with("EVI", 0.41)
            .with("Canopy_Height", 21.0),
    ];

    let a = BiomassEstimator::default().train(&features, &targets).unwrap();
    let b = BiomassEstimator::default().train(&features, &targets).unwrap();
    let pa = a.predict(&held_out).unwrap();
    let pb = b.predict(&held_out).unwrap();
    assert_eq!(pa, pb);
    assert_eq!(a.n_trees(), 100);
}

#[test]
fn schema_violations_fail_with_stage() {
    let features = vec![
        FeatureSample::new().with("NDVI", 0.5).with("Canopy_Height", 20.0),
        FeatureSample::new().with("NDVI", 0.6),
    ];
    let err = BiomassEstimator::default()
        .train(&features, &[200.0, 210.0])
        .unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));
    assert_eq!(err.stage(), Some(Stage::Training));
    assert!(err.to_string().contains("training"), "{}", err);

    let err = validate(&[1.0, 2.0, 3.0], &[1.0, 2.0]).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Validation));
}
