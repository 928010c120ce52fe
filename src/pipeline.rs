//! Per-image processing with an explicit batch context.
//!
//! A [`BatchContext`] is created once per run, holds the
//! configuration, the weather log and the batch counters, and
//! is shared by reference with every image task. Each task
//! owns its grids; failures stay local to the image.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use ndarray::Array2;
use serde_derive::*;
use tracing::{debug, info, warn};

use crate::{
    calibration::{CalibrationParameterResolver, CalibrationParameters},
    config::PipelineConfig,
    error::{PipelineError, Result},
    image::{load_visual, ThermalImage},
    mask::{load_mask, write_text_mask, ClassMask, MaskAligner},
    output::{
        write_frequency_table, write_pixel_table, write_summary, FREQUENCY_FILE,
        PIXEL_TABLE_SUFFIX, SUMMARY_FILE,
    },
    stats::{histogram, ClassStatistics, FrequencyRow, FrequencyWindow, Stats},
    temperature::RadiometricConverter,
    weather::{capture_timestamp, WeatherLogMatcher, WeatherMatch, WeatherRecord},
};

/// Calibrated temperatures, in °C.
pub type TemperatureGrid = Array2<f64>;

#[derive(Debug, Default)]
pub struct BatchCounters {
    seen: AtomicUsize,
    processed: AtomicUsize,
    weather_matched: AtomicUsize,
    skipped: AtomicUsize,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub seen: usize,
    pub processed: usize,
    pub weather_matched: usize,
    pub skipped: usize,
}

impl BatchCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            seen: self.seen.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            weather_matched: self.weather_matched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Result of the weather lookup for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherLookup {
    pub timestamp: Option<String>,
    pub found: Option<WeatherMatch>,
}

pub struct CalibratedImage {
    pub source: PathBuf,
    pub params: CalibrationParameters,
    pub weather: WeatherLookup,
    pub temps: TemperatureGrid,
}

/// What `canopy-stats` does with each image.
#[derive(Debug, Clone, Default)]
pub struct StatsOptions {
    /// Write outputs under `<root>/<stem>/` instead of next to
    /// the image.
    pub output_root: Option<PathBuf>,
    pub classify: bool,
    /// Directory of masks named after the image stem.
    pub mask_dir: Option<PathBuf>,
    /// Directory of visual images named `<stem>.jpg`/`.png`.
    pub visual_dir: Option<PathBuf>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ImageReport {
    pub path: String,
    pub width: usize,
    pub height: usize,
    pub params: CalibrationParameters,
    pub weather: Option<WeatherMatch>,
    pub stats: Stats,
    pub classes: Option<ClassStatistics>,
    pub frequency_rows: Option<usize>,
}

pub struct BatchContext {
    pub config: PipelineConfig,
    pub weather: Option<WeatherRecord>,
    resolver: CalibrationParameterResolver,
    counters: BatchCounters,
}

impl BatchContext {
    pub fn new(config: PipelineConfig, weather: Option<WeatherRecord>) -> Self {
        let resolver = config.resolver();
        BatchContext {
            config,
            weather,
            resolver,
            counters: BatchCounters::default(),
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Find the weather record of an image. Images outside the
    /// dated directory layout, and images without a record,
    /// get no match.
    pub fn lookup_weather(&self, image: &Path) -> Result<WeatherLookup> {
        let record = match &self.weather {
            Some(record) => record,
            None => {
                return Ok(WeatherLookup {
                    timestamp: None,
                    found: None,
                })
            }
        };

        let timestamp = match capture_timestamp(image) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(image = %image.display(), "{}", e);
                return Ok(WeatherLookup {
                    timestamp: None,
                    found: None,
                });
            }
        };

        let found = WeatherLogMatcher::new(record, self.config.match_precedence).find(&timestamp)?;
        match &found {
            Some(m) => {
                self.counters.weather_matched.fetch_add(1, Ordering::Relaxed);
                debug!(
                    image = %image.display(),
                    row = m.row,
                    station = m.station,
                    temperature = m.temperature,
                    humidity = m.humidity,
                    "weather match"
                );
            }
            None => warn!(image = %image.display(), %timestamp, "weather data not found"),
        }
        Ok(WeatherLookup {
            timestamp: Some(timestamp),
            found,
        })
    }

    /// Resolve the calibration of an image and convert its raw
    /// frame to temperatures.
    pub fn calibrate(&self, image: ThermalImage) -> Result<CalibratedImage> {
        let weather = self.lookup_weather(&image.source)?;
        let override_with = if self.config.use_weather_log {
            weather.found.as_ref()
        } else {
            None
        };

        let params = self.resolver.resolve(&image.metadata, override_with)?;
        debug!(image = %image.source.display(), ?params, "calibration resolved");

        let converter = RadiometricConverter::new(&params);
        let temps = converter.convert(&image.raw, image.swap_byte_order)?;
        Ok(CalibratedImage {
            source: image.source,
            params,
            weather,
            temps,
        })
    }

    /// Candidate mask files of an image, in search order.
    pub fn mask_candidates(&self, image: &Path, mask_dir: Option<&Path>) -> Vec<PathBuf> {
        let folder = image.with_extension("");
        let mut candidates: Vec<PathBuf> = self
            .config
            .mask_file_names
            .iter()
            .map(|name| folder.join(name))
            .collect();
        if let (Some(dir), Some(stem)) = (mask_dir, image.file_stem().and_then(|s| s.to_str())) {
            for name in &[
                format!("{}.txt", stem),
                format!("{}.png", stem),
                format!("{}_L.png", stem),
            ] {
                candidates.push(dir.join(name));
            }
        }
        candidates
    }

    /// Align the first mask found for the image and compute its
    /// class statistics.
    pub fn classify(
        &self,
        calibrated: &CalibratedImage,
        mask_dir: Option<&Path>,
    ) -> Result<(ClassMask, ClassStatistics)> {
        let source = match self
            .mask_candidates(&calibrated.source, mask_dir)
            .into_iter()
            .find(|p| p.is_file())
        {
            Some(path) => {
                debug!(mask = %path.display(), "using mask");
                Some(load_mask(&path, self.config.mask_marker_color)?)
            }
            None => None,
        };

        let mask = MaskAligner::new(calibrated.temps.dim()).align(source.as_ref(), &calibrated.source)?;
        let stats = ClassStatistics::compute(&calibrated.temps, &mask)?;
        debug!(
            leaf = stats.leaf.count,
            noise = stats.noise.count,
            total = stats.total.count,
            "classified pixels"
        );
        Ok((mask, stats))
    }

    /// Frequency histogram around the logged ambient
    /// temperature. Needs a weather match.
    pub fn frequency(&self, calibrated: &CalibratedImage) -> Result<Vec<FrequencyRow>> {
        let ambient = calibrated.weather.found.as_ref().ok_or_else(|| {
            PipelineError::WeatherMatchMiss {
                timestamp: calibrated
                    .weather
                    .timestamp
                    .clone()
                    .unwrap_or_else(|| calibrated.source.display().to_string()),
            }
        })?;
        let margins = self.config.frequency_window;
        let window = FrequencyWindow {
            reference: ambient.temperature,
            sub: margins.sub,
            add: margins.add,
        };
        debug!(low = window.low(), high = window.high(), "frequency window");
        Ok(histogram(calibrated.temps.iter().copied(), &window))
    }

    /// Calibrate, optionally classify, and write the per-pixel
    /// and summary tables of one image.
    pub fn run_stats(&self, image: ThermalImage, opts: &StatsOptions) -> Result<ImageReport> {
        self.track(image.source.clone(), || {
            let calibrated = self.calibrate(image)?;
            let classified = if opts.classify {
                Some(self.classify(&calibrated, opts.mask_dir.as_deref())?)
            } else {
                None
            };
            let visual = match find_visual(&calibrated.source, opts.visual_dir.as_deref()) {
                Some(path) => Some(load_visual(&path, calibrated.temps.dim())?),
                None => None,
            };

            let dir = output_dir(&calibrated.source, opts.output_root.as_deref())?;
            let stem = file_stem(&calibrated.source);
            let mask = classified.as_ref().map(|(mask, _)| mask);
            write_pixel_table(
                &dir.join(format!("{}{}", stem, PIXEL_TABLE_SUFFIX)),
                &calibrated.temps,
                visual.as_ref(),
                mask,
            )?;
            if let Some((mask, stats)) = &classified {
                let (h, w) = mask.dim();
                write_text_mask(&dir.join(format!("mask_{}x{}.txt", h, w)), mask)?;
                write_summary(&dir.join(SUMMARY_FILE), &stats.summary())?;
            }

            Ok(report(&calibrated, classified.map(|(_, s)| s), None))
        })
    }

    /// Calibrate and write the frequency table of one image.
    pub fn run_empirical(&self, image: ThermalImage, output_root: Option<&Path>) -> Result<ImageReport> {
        self.track(image.source.clone(), || {
            let calibrated = self.calibrate(image)?;
            let rows = self.frequency(&calibrated)?;
            let dir = output_dir(&calibrated.source, output_root)?;
            write_frequency_table(&dir.join(FREQUENCY_FILE), &rows)?;
            Ok(report(&calibrated, None, Some(rows.len())))
        })
    }

    fn track<F>(&self, source: PathBuf, task: F) -> Result<ImageReport>
    where
        F: FnOnce() -> Result<ImageReport>,
    {
        self.counters.seen.fetch_add(1, Ordering::Relaxed);
        let result = task();
        match &result {
            Ok(_) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                if e.is_data_quality() {
                    warn!(image = %source.display(), "skipped: {}", e);
                } else {
                    warn!(image = %source.display(), "failed: {}", e);
                }
            }
        }
        result
    }

    /// Count an input that failed before it could be processed.
    pub fn record_failure(&self, source: &str, error: &dyn std::fmt::Display) {
        self.counters.seen.fetch_add(1, Ordering::Relaxed);
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(image = source, "failed: {}", error);
    }

    pub fn log_summary(&self) {
        let c = self.counters();
        info!(
            seen = c.seen,
            processed = c.processed,
            skipped = c.skipped,
            weather_matched = c.weather_matched,
            "batch finished"
        );
    }
}

fn report(
    calibrated: &CalibratedImage,
    classes: Option<ClassStatistics>,
    frequency_rows: Option<usize>,
) -> ImageReport {
    let (height, width) = calibrated.temps.dim();
    let mut stats = Stats::default();
    for &t in calibrated.temps.iter() {
        stats += t;
    }
    ImageReport {
        path: calibrated.source.display().to_string(),
        width,
        height,
        params: calibrated.params,
        weather: calibrated.weather.found,
        stats,
        classes,
        frequency_rows,
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into())
}

/// `<root>/<stem>` when a root is given, otherwise the folder
/// named after the image next to it.
fn output_dir(image: &Path, root: Option<&Path>) -> Result<PathBuf> {
    let dir = match root {
        Some(root) => root.join(file_stem(image)),
        None => image.with_extension(""),
    };
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn find_visual(image: &Path, visual_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = visual_dir?;
    let stem = file_stem(image);
    ["jpg", "png"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::EmbeddedMetadata;
    use serde_json::json;

    fn metadata() -> EmbeddedMetadata {
        match json!({
            "Emissivity": 0.98,
            "SubjectDistance": "15.24 m",
            "ReflectedApparentTemperature": "30.0 C",
            "AtmosphericTemperature": "20.0 C",
            "IRWindowTemperature": "20.0 C",
            "IRWindowTransmission": 1,
            "RelativeHumidity": "50.0 %",
            "PlanckR1": 21106.77,
            "PlanckB": 1501,
            "PlanckF": 1,
            "PlanckO": -7340,
            "PlanckR2": 0.012545258,
        }) {
            serde_json::Value::Object(map) => map.into(),
            _ => unreachable!(),
        }
    }

    fn thermal(source: PathBuf, raw: u16) -> ThermalImage {
        ThermalImage {
            source,
            metadata: metadata(),
            raw: Array2::from_elem((6, 8), raw),
            swap_byte_order: false,
        }
    }

    fn weather() -> WeatherRecord {
        let log = "h\n\
                   2019-07-15 10:15:00,-3.0,50,,,,,,\n";
        WeatherRecord::from_reader(log.as_bytes()).unwrap()
    }

    fn layout(root: &Path) -> PathBuf {
        let dir = root.join("2019-07-15").join("Camera_1");
        fs::create_dir_all(&dir).unwrap();
        dir.join("FLIR_0001_101512.jpg")
    }

    #[test]
    fn calibrates_with_embedded_metadata() -> anyhow::Result<()> {
        let ctx = BatchContext::new(PipelineConfig::default(), None);
        let calibrated = ctx.calibrate(thermal("a.jpg".into(), 14000))?;
        assert_eq!(calibrated.params, CalibrationParameters::reference());
        assert!(calibrated
            .temps
            .iter()
            .all(|t| (t - -3.7138).abs() < 0.1));
        assert_eq!(calibrated.weather.found, None);
        Ok(())
    }

    #[test]
    fn weather_match_overrides_atmosphere() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let image = layout(dir.path());
        let ctx = BatchContext::new(PipelineConfig::default(), Some(weather()));

        let calibrated = ctx.calibrate(thermal(image, 14000))?;
        assert_eq!(calibrated.params.atmospheric_temperature, -3.0);
        assert_eq!(
            calibrated.weather.timestamp.as_deref(),
            Some("2019-07-15 10:15:00")
        );
        assert_eq!(ctx.counters().weather_matched, 1);
        Ok(())
    }

    #[test]
    fn weather_miss_degrades_to_embedded() -> anyhow::Result<()> {
        let ctx = BatchContext::new(PipelineConfig::default(), Some(weather()));
        let calibrated = ctx.calibrate(thermal("elsewhere/a_b_090000.jpg".into(), 14000))?;
        assert_eq!(calibrated.params.atmospheric_temperature, 20.);
        assert!(matches!(
            ctx.frequency(&calibrated),
            Err(PipelineError::WeatherMatchMiss { .. })
        ));
        Ok(())
    }

    #[test]
    fn stats_run_writes_tables() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let image = layout(dir.path());
        let folder = image.with_extension("");
        fs::create_dir_all(&folder)?;
        let mut mask = ClassMask::zeros((12, 16));
        mask.slice_mut(ndarray::s![.., ..8]).fill(1);
        write_text_mask(&folder.join("mask.txt"), &mask)?;

        let ctx = BatchContext::new(PipelineConfig::default(), None);
        let opts = StatsOptions {
            classify: true,
            ..Default::default()
        };
        let report = ctx.run_stats(thermal(image, 14000), &opts)?;
        let classes = report.classes.expect("classes");
        assert_eq!(classes.leaf.count, 24);
        assert_eq!(classes.leaf.count + classes.noise.count, 48);

        assert!(folder.join("FLIR_0001_101512_thermal_values.csv").is_file());
        assert!(folder.join("mask_6x8.txt").is_file());
        let summary = fs::read_to_string(folder.join(SUMMARY_FILE))?;
        assert!(summary.starts_with("Temp avg,Leaf Temp avg"));
        assert_eq!(ctx.counters().processed, 1);
        Ok(())
    }

    #[test]
    fn missing_mask_skips_image_without_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("lonely.jpg");
        let ctx = BatchContext::new(PipelineConfig::default(), None);
        let opts = StatsOptions {
            classify: true,
            ..Default::default()
        };
        assert!(matches!(
            ctx.run_stats(thermal(image.clone(), 14000), &opts),
            Err(PipelineError::MaskNotFound { .. })
        ));
        assert!(!image.with_extension("").exists());
        let counters = ctx.counters();
        assert_eq!((counters.seen, counters.skipped), (1, 1));
        Ok(())
    }

    #[test]
    fn empirical_run_uses_logged_ambient() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let image = layout(dir.path());
        let out = dir.path().join("out");
        let ctx = BatchContext::new(PipelineConfig::default(), Some(weather()));

        let report = ctx.run_empirical(thermal(image, 14000), Some(&out))?;
        assert_eq!(report.frequency_rows, Some(1));
        let table = fs::read_to_string(out.join("FLIR_0001_101512").join(FREQUENCY_FILE))?;
        assert_eq!(
            table,
            "Temp_rounded(c),Observations,Frequency(%)\n-3,48,100.0\n"
        );
        Ok(())
    }
}
