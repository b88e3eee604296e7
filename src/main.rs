use clap::Parser;
use log::{error, info};
use rayon::current_num_threads;
use std::path::PathBuf;

mod config;
use config::{RunConfig, RunOptions};

mod error;
use error::{Error, Result};

mod extract;

mod image_input;
use image_input::{find_images, ImageSource, TiffImageSource};

mod output;
use output::{TiffOverlaySink, TsvResultSink};

mod pipeline;
use pipeline::PipelineDriver;

mod quantify;
use quantify::DEFAULT_MEAN_OBJECT_VOLUME;

mod roi;
mod schemas;

mod segmentation;
use segmentation::{CpuEngine, SegmentationParams, ThresholdMethod};

mod voxels;

#[derive(Parser, Debug)]
#[command(name = "nucleoquant")]
#[command(about = "Segment Hoechst and KI67 stacks and report per-ROI volumes and estimated counts.")]
struct Args {
    /// Directory holding the image stacks and their ROI files.
    image_dir: PathBuf,

    /// Nuclear (Hoechst) channel, by name or index.
    #[arg(long, default_value = "0")]
    nuclear_channel: String,

    /// Marker (KI67) channel, by name or index.
    #[arg(long, default_value = "1")]
    marker_channel: String,

    #[arg(long, value_enum, default_value_t = ThresholdMethod::Huang)]
    nuclear_threshold: ThresholdMethod,

    #[arg(long, value_enum, default_value_t = ThresholdMethod::Otsu)]
    marker_threshold: ThresholdMethod,

    /// Volume of a single object in µm³, used to estimate counts.
    #[arg(long, default_value_t = DEFAULT_MEAN_OBJECT_VOLUME)]
    mean_volume: f64,

    /// Override the XY pixel size (µm) read from the first image.
    #[arg(long, default_value = None)]
    xy_spacing: Option<f64>,

    /// Override the slice spacing (µm) read from the first image.
    #[arg(long, default_value = None)]
    z_spacing: Option<f64>,

    #[arg(long, default_value_t = 100.0)]
    background_radius: f64,

    #[arg(long, default_value_t = 10.0)]
    denoise_radius: f64,

    #[arg(long, default_value_t = 3.0)]
    cleanup_radius: f64,

    /// Where the results directory is created. Defaults to the image directory.
    #[arg(long, default_value = None)]
    output_dir: Option<PathBuf>,

    #[arg(short = 't', long, default_value = None)]
    nthreads: Option<usize>,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            nuclear_channel: self.nuclear_channel.clone(),
            marker_channel: self.marker_channel.clone(),
            nuclear_threshold: self.nuclear_threshold,
            marker_threshold: self.marker_threshold,
            mean_object_volume: self.mean_volume,
            xy_spacing: self.xy_spacing,
            z_spacing: self.z_spacing,
            segmentation: SegmentationParams {
                background_radius: self.background_radius,
                denoise_radius: self.denoise_radius,
                cleanup_radius: self.cleanup_radius,
            },
        }
    }
}

fn run(args: &Args) -> Result<()> {
    if let Some(nthreads) = args.nthreads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global()
            .map_err(|err| Error::Config(format!("cannot start {} threads: {}", nthreads, err)))?;
    }
    info!("Using {} threads", current_num_threads());

    let images = find_images(&args.image_dir)?;
    let source = TiffImageSource;

    // calibration and channel names come from the first image
    let first = images
        .first()
        .ok_or_else(|| Error::NoImages(args.image_dir.clone()))?;
    let metadata = source.probe(first)?;
    info!("Channels: {}", metadata.channel_names().join(", "));
    let config = RunConfig::resolve(&args.run_options(), &metadata)?;

    let started = chrono::Local::now().naive_local();
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.image_dir.clone())
        .join(config.results_dir_name(started));
    std::fs::create_dir_all(&output_dir).map_err(|err| Error::io(&output_dir, err))?;

    let mut results = TsvResultSink::create(&output_dir)?;
    let overlays = TiffOverlaySink::new(&output_dir);

    let driver = PipelineDriver::new(config, source, CpuEngine);
    driver.run(&images, &mut results, &overlays)
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    if let Err(err) = run(&args) {
        error!("{}", err);
        std::process::exit(1);
    }
}
