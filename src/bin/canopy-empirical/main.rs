mod args;

use anyhow::{Context, Result};
use args::Args;
use rayon::iter::ParallelIterator;
use tracing::info;

use canopy_thermal::{
    cli::process_paths_par, config::PipelineConfig, logger, weather::WeatherRecord,
    BatchContext,
};

fn main() -> Result<()> {
    let args = Args::from_cmd_line()?;
    logger::init(args.debug);

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("could not read config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(sub) = args.sub {
        config.frequency_window.sub = sub;
    }
    if let Some(add) = args.add {
        config.frequency_window.add = add;
    }
    let weather = WeatherRecord::from_path(&args.weather)
        .with_context(|| format!("could not read weather log {}", args.weather.display()))?;

    let exiftool = config.exiftool();
    info!(
        images = args.paths.len(),
        sub = config.frequency_window.sub,
        add = config.frequency_window.add,
        "starting batch"
    );
    let ctx = BatchContext::new(config, Some(weather));
    let output = args.output.as_deref();

    let written = process_paths_par(args.paths, args.is_json, exiftool)
        .filter_map(|input| match input.image {
            Ok(image) => ctx.run_empirical(image, output).ok(),
            Err(e) => {
                ctx.record_failure(&input.filename, &e);
                None
            }
        })
        .count();
    info!(tables = written, "frequency tables written");
    ctx.log_summary();

    Ok(())
}
