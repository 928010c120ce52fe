mod args;

use anyhow::{Context, Result};
use args::Args;
use rayon::iter::ParallelIterator;
use serde_derive::*;
use tracing::info;

use canopy_thermal::{
    cli::process_paths_par,
    config::PipelineConfig,
    logger,
    pipeline::{CounterSnapshot, ImageReport, StatsOptions},
    stats::Stats,
    weather::WeatherRecord,
    BatchContext,
};

fn main() -> Result<()> {
    let args = Args::from_cmd_line()?;
    logger::init(args.debug);

    let Args {
        paths,
        is_json,
        config,
        weather,
        output,
        mask_dir,
        visual_dir,
        classify,
        distance,
        ..
    } = args;

    let mut config = match config {
        Some(path) => PipelineConfig::from_json_file(&path)
            .with_context(|| format!("could not read config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if distance.is_some() {
        config.distance_override = distance;
    }
    let weather = weather
        .map(|path| {
            WeatherRecord::from_path(&path)
                .with_context(|| format!("could not read weather log {}", path.display()))
        })
        .transpose()?;

    let opts = StatsOptions {
        output_root: output,
        classify,
        mask_dir,
        visual_dir,
    };
    let exiftool = config.exiftool();
    let ctx = BatchContext::new(config, weather);
    info!(images = paths.len(), classify, "starting batch");

    let (image_stats, cumulative) = process_paths_par(paths, is_json, exiftool)
        .filter_map(|input| match input.image {
            Ok(image) => ctx.run_stats(image, &opts).ok(),
            Err(e) => {
                ctx.record_failure(&input.filename, &e);
                None
            }
        })
        .fold(
            || (vec![], Stats::default()),
            |mut acc, report: ImageReport| {
                acc.1 += &report.stats;
                acc.0.push(report);
                acc
            },
        )
        .reduce(
            || (vec![], Stats::default()),
            |mut acc1, acc2| {
                acc1.0.extend(acc2.0);
                acc1.1 += &acc2.1;
                acc1
            },
        );
    ctx.log_summary();

    #[derive(Debug, Serialize)]
    struct OutputJson {
        image_stats: Vec<ImageReport>,
        cumulative: Stats,
        counters: CounterSnapshot,
    }

    serde_json::to_writer(
        std::io::stdout().lock(),
        &OutputJson {
            image_stats,
            cumulative,
            counters: ctx.counters(),
        },
    )?;

    Ok(())
}
