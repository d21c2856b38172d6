//! forestcarb CLI - forest biomass and carbon estimation

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use forestcarb_algorithms::acquisition::{
    AcquisitionRequest, BBox, GeoTiffDirectorySupplier, ImagerySupplier, PlotTable,
};
use forestcarb_algorithms::carbon::{carbon_layers, total_stock};
use forestcarb_algorithms::imagery::{vegetation_indices, BandMapping};
use forestcarb_algorithms::regression::{predict_raster, BiomassEstimator, BiomassModel, ForestParams, MaxFeatures};
use forestcarb_algorithms::reproject::{normalize_with, NormalizeParams, ResampleMethod};
use forestcarb_algorithms::validation::validate_predictions;
use forestcarb_algorithms::workflow::{run_plot_workflow, WorkflowParams};
use forestcarb_core::io::{read_band, read_geotiff, write_band, write_geotiff};
use forestcarb_core::{MultiBandRaster, Raster, Resolution, CRS};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "forestcarb")]
#[command(author, version, about = "Forest biomass and carbon estimation", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Read imagery bands from a directory of GeoTIFFs (<dir>/<band>.tif)
    Acquire {
        /// Directory holding one GeoTIFF per band
        dir: PathBuf,
        /// Output multi-band file
        output: PathBuf,
        /// WGS84 bounding box: min_lon,min_lat,max_lon,max_lat
        #[arg(long)]
        bbox: String,
        /// Date range start/end, e.g. 2024-06-01/2024-06-30
        #[arg(long, default_value = "../..")]
        datetime: String,
        /// Band preset: default (NIR, Red, Blue) or sentinel2 (B8, B4, B2)
        #[arg(short, long, default_value = "default")]
        bands: String,
        /// Acquisition date of the imagery, checked against --datetime
        #[arg(long)]
        acquired: Option<String>,
    },
    /// Reproject and resample all bands onto a uniform grid
    Normalize {
        /// Input raster file
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Target CRS, e.g. EPSG:32630
        #[arg(short, long)]
        crs: String,
        /// Target pixel size in CRS units
        #[arg(short, long)]
        res: f64,
        /// Vertical pixel size, if different from --res
        #[arg(long)]
        res_y: Option<f64>,
        /// Resampling method: bilinear, nearest
        #[arg(short, long, default_value = "bilinear")]
        method: String,
    },
    /// Compute NDVI and EVI bands
    Indices {
        /// Input raster file with NIR, Red and Blue bands
        input: PathBuf,
        /// Output file (bands NDVI, EVI)
        output: PathBuf,
        /// Band preset: default (NIR, Red, Blue) or sentinel2 (B8, B4, B2)
        #[arg(short, long, default_value = "default")]
        bands: String,
    },
    /// Train a biomass model on field plots
    Train {
        /// Plot CSV
        plots: PathBuf,
        /// Output model (JSON)
        model: PathBuf,
        /// Measured biomass column
        #[arg(short, long, default_value = "biomass")]
        target: String,
        /// Replace band columns with NDVI/EVI using this preset
        #[arg(long)]
        derive_indices: Option<String>,
        /// Number of trees
        #[arg(long, default_value = "100")]
        trees: usize,
        /// Maximum tree depth (unlimited if omitted)
        #[arg(long)]
        max_depth: Option<usize>,
        /// Features per split: all, sqrt, third or a count
        #[arg(long, default_value = "all")]
        max_features: String,
        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Predict a biomass density map from a feature raster
    Predict {
        /// Model file (JSON)
        model: PathBuf,
        /// Raster whose band names match the model features
        input: PathBuf,
        /// Output biomass raster
        output: PathBuf,
    },
    /// Convert a biomass density map to carbon and CO2
    Carbon {
        /// Biomass raster (t/ha)
        input: PathBuf,
        /// Output file (bands Carbon, CO2)
        output: PathBuf,
    },
    /// Validate a model against measured plots
    Validate {
        /// Model file (JSON)
        model: PathBuf,
        /// Plot CSV
        plots: PathBuf,
        /// Measured biomass column
        #[arg(short, long, default_value = "biomass")]
        target: String,
        /// Replace band columns with NDVI/EVI using this preset
        #[arg(long)]
        derive_indices: Option<String>,
    },
    /// Split plots, train, validate on the hold-out set and summarise carbon
    Estimate {
        /// Plot CSV
        plots: PathBuf,
        /// Measured biomass column
        #[arg(short, long, default_value = "biomass")]
        target: String,
        /// Workflow parameters (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Replace band columns with NDVI/EVI using this preset
        #[arg(long)]
        derive_indices: Option<String>,
        /// Save the trained model here
        #[arg(long)]
        model_out: Option<PathBuf>,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_raster(path: &Path) -> Result<MultiBandRaster> {
    let pb = spinner("Reading raster...");
    let raster = read_geotiff(path).with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    info!(
        "Input: {} x {}, bands [{}]",
        raster.cols(),
        raster.rows(),
        raster.band_names().join(", ")
    );
    Ok(raster)
}

fn write_result(raster: &MultiBandRaster, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path).context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn write_single(raster: &Raster, name: &str, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...");
    write_band(raster, name, path).context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn parse_bands(preset: &str) -> Result<BandMapping> {
    match preset.to_lowercase().as_str() {
        "default" | "nir-red-blue" => Ok(BandMapping::default()),
        "sentinel2" | "s2" => Ok(BandMapping::sentinel2()),
        _ => bail!("Unknown band preset: {}. Use default or sentinel2.", preset),
    }
}

fn parse_method(s: &str) -> Result<ResampleMethod> {
    match s.to_lowercase().as_str() {
        "bilinear" | "linear" => Ok(ResampleMethod::Bilinear),
        "nearest" | "nn" => Ok(ResampleMethod::Nearest),
        _ => bail!("Unknown resampling method: {}. Use bilinear or nearest.", s),
    }
}

fn parse_max_features(s: &str) -> Result<MaxFeatures> {
    match s.to_lowercase().as_str() {
        "all" => Ok(MaxFeatures::All),
        "sqrt" => Ok(MaxFeatures::Sqrt),
        "third" => Ok(MaxFeatures::Third),
        n => n
            .parse()
            .map(MaxFeatures::Count)
            .with_context(|| format!("Invalid max features: {}", s)),
    }
}

fn read_plots(path: &Path, target: &str, derive_indices: Option<&str>) -> Result<PlotTable> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let table = PlotTable::from_csv(BufReader::new(file), target).context("Failed to read plots")?;
    match derive_indices {
        Some(preset) => Ok(table.with_vegetation_indices(&parse_bands(preset)?)?),
        None => Ok(table),
    }
}

fn save_model(model: &BiomassModel, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), model).context("Failed to write model")?;
    Ok(())
}

fn load_model(path: &Path) -> Result<BiomassModel> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let model: BiomassModel =
        serde_json::from_reader(BufReader::new(file)).context("Failed to parse model")?;
    info!("Model: {} trees, features [{}]", model.n_trees(), model.schema());
    Ok(model)
}

fn print_importances(model: &BiomassModel) {
    println!("Feature importances:");
    for (name, importance) in model.feature_importances() {
        println!("  {:<20} {:.4}", name, importance);
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let raster = read_raster(&input)?;
            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let (res_x, res_y) = raster.transform().resolution();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, rows * cols);
            println!("Pixel size: {} x {}", res_x, res_y);
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            match raster.crs() {
                Some(crs) => println!("CRS: {}", crs),
                None => println!("CRS: none"),
            }
            for name in raster.band_names() {
                let Some(band) = raster.band_raster(name) else {
                    continue;
                };
                let stats = band.statistics();
                println!("\nBand {}:", name);
                if let (Some(min), Some(max), Some(mean)) = (stats.min, stats.max, stats.mean) {
                    println!("  Min: {:.4}  Max: {:.4}  Mean: {:.4}", min, max, mean);
                }
                println!(
                    "  Valid cells: {} ({:.1}%)",
                    stats.valid_count,
                    100.0 * stats.valid_count as f64 / (rows * cols).max(1) as f64
                );
            }
        }

        // ── Acquisition ──────────────────────────────────────────────
        Commands::Acquire {
            dir,
            output,
            bbox,
            datetime,
            bands,
            acquired,
        } => {
            let bbox = BBox::parse(&bbox)
                .with_context(|| format!("Invalid bbox: {}. Use min_lon,min_lat,max_lon,max_lat", bbox))?;
            let mapping = parse_bands(&bands)?;
            let request = AcquisitionRequest::new(
                bbox,
                datetime,
                mapping.names().iter().map(|s| s.to_string()).collect(),
            );

            let mut supplier = GeoTiffDirectorySupplier::new(&dir);
            if let Some(date) = acquired {
                supplier = supplier.with_acquisition_date(date);
            }
            let start = Instant::now();
            supplier.open()?;
            let fetched = supplier.fetch(&request);
            supplier.close()?;
            let raster = fetched.context("Acquisition failed")?;
            let elapsed = start.elapsed();

            write_result(&raster, &output)?;
            done("Imagery", &output, elapsed);
        }

        // ── Normalization ────────────────────────────────────────────
        Commands::Normalize {
            input,
            output,
            crs,
            res,
            res_y,
            method,
        } => {
            let target = CRS::parse(&crs).with_context(|| format!("Invalid CRS: {}", crs))?;
            let params = NormalizeParams {
                method: parse_method(&method)?,
                ..Default::default()
            };
            let raster = read_raster(&input)?;
            let start = Instant::now();
            let result = normalize_with(&raster, &target, Resolution::new(res, res_y.unwrap_or(res)), &params)
                .context("Normalization failed")?;
            let elapsed = start.elapsed();
            info!("Output: {} x {} on {}", result.cols(), result.rows(), target);
            write_result(&result, &output)?;
            done("Normalized raster", &output, elapsed);
        }

        // ── Indices ──────────────────────────────────────────────────
        Commands::Indices {
            input,
            output,
            bands,
        } => {
            let mapping = parse_bands(&bands)?;
            let raster = read_raster(&input)?;
            let start = Instant::now();
            let result = vegetation_indices(&raster, &mapping).context("Index calculation failed")?;
            let elapsed = start.elapsed();
            write_result(&result, &output)?;
            done("NDVI/EVI", &output, elapsed);
        }

        // ── Training ─────────────────────────────────────────────────
        Commands::Train {
            plots,
            model,
            target,
            derive_indices,
            trees,
            max_depth,
            max_features,
            seed,
        } => {
            let table = read_plots(&plots, &target, derive_indices.as_deref())?;
            let (features, targets) = table.labelled();
            info!("Plots: {} labelled of {}", features.len(), table.len());

            let params = ForestParams {
                n_trees: trees,
                max_depth,
                max_features: parse_max_features(&max_features)?,
                seed,
                ..Default::default()
            };
            let pb = spinner("Training forest...");
            let start = Instant::now();
            let fitted = BiomassEstimator::new(params).train(&features, &targets);
            pb.finish_and_clear();
            let fitted = fitted.context("Training failed")?;
            let elapsed = start.elapsed();

            print_importances(&fitted);
            save_model(&fitted, &model)?;
            done("Model", &model, elapsed);
        }

        // ── Prediction ───────────────────────────────────────────────
        Commands::Predict {
            model,
            input,
            output,
        } => {
            let model = load_model(&model)?;
            let raster = read_raster(&input)?;
            let start = Instant::now();
            let biomass = predict_raster(&model, &raster).context("Prediction failed")?;
            let elapsed = start.elapsed();
            write_single(&biomass, "Biomass", &output)?;
            done("Biomass", &output, elapsed);
        }

        // ── Carbon ───────────────────────────────────────────────────
        Commands::Carbon { input, output } => {
            let biomass = read_band(&input).with_context(|| format!("Failed to read {}", input.display()))?;
            let start = Instant::now();
            let layers = carbon_layers(&biomass).context("Carbon conversion failed")?;
            let elapsed = start.elapsed();

            match total_stock(&biomass) {
                Ok(stock) => {
                    println!("Area: {:.2} ha ({} pixels)", stock.area_ha, stock.pixels);
                    println!("Biomass: {:.2} t", stock.biomass);
                    println!("Carbon: {:.2} t", stock.carbon);
                    println!("CO2: {:.2} t", stock.co2);
                }
                Err(e) => warn!("Skipping area totals: {}", e),
            }
            write_result(&layers, &output)?;
            done("Carbon/CO2", &output, elapsed);
        }

        // ── Validation ───────────────────────────────────────────────
        Commands::Validate {
            model,
            plots,
            target,
            derive_indices,
        } => {
            let model = load_model(&model)?;
            let table = read_plots(&plots, &target, derive_indices.as_deref())?;
            let (features, targets) = table.labelled();
            let predictions = model.predict(&features).context("Prediction failed")?;
            let report = validate_predictions(&predictions, &targets).context("Validation failed")?;

            println!("Plots: {}", report.n);
            println!("RMSE: {:.4}", report.rmse);
            println!("MAE: {:.4}", report.mae);
            match report.r2 {
                Some(r2) => println!("R2: {:.4}", r2),
                None => println!("R2: undefined (no variance in measurements)"),
            }
        }

        // ── Plot workflow ────────────────────────────────────────────
        Commands::Estimate {
            plots,
            target,
            config,
            derive_indices,
            model_out,
        } => {
            let params: WorkflowParams = match &config {
                Some(path) => {
                    let file = File::open(path)
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    serde_json::from_reader(BufReader::new(file)).context("Failed to parse config")?
                }
                None => WorkflowParams::default(),
            };
            let table = read_plots(&plots, &target, derive_indices.as_deref())?;

            let pb = spinner("Running workflow...");
            let start = Instant::now();
            let report = run_plot_workflow(&table, &params);
            pb.finish_and_clear();
            let report = report.context("Workflow failed")?;
            let elapsed = start.elapsed();

            println!("Training plots: {}", report.train_plots);
            println!("Hold-out plots: {}", report.test_plots);
            println!("Hold-out {}", report.validation);
            if let Some(carbon) = &report.carbon {
                println!(
                    "Mean biomass {:.2}, carbon {:.2}, CO2 {:.2} over {} plots",
                    carbon.mean_biomass, carbon.mean_carbon, carbon.mean_co2, carbon.count
                );
            }
            print_importances(&report.model);
            if let Some(path) = model_out {
                save_model(&report.model, &path)?;
                println!("Model saved to: {}", path.display());
            }
            println!("  Processing time: {:.2?}", elapsed);
        }
    }

    Ok(())
}
