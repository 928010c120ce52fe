//! Helpers to parse CLI arguments and read inputs in the
//! accompanying binaries.
//!
//! APIs here shouldn't be considered stable / used as a
//! library.

use std::{fs::File, io::BufReader, path::Path};

pub use clap::{App, Arg};
use indicatif::{ProgressBar, ProgressStyle};
pub use inflector::Inflector;
use rayon::iter::{once, Either, IntoParallelIterator, ParallelIterator};

use crate::{error::Result, exiftool::Exiftool, image::ThermalImage};

#[macro_export]
macro_rules! args_parser {
    ($name:expr) => {{
        $crate::cli::App::new($name)
            .version(clap::crate_version!())
            .author(clap::crate_authors!())
    }};
}

#[macro_export]
macro_rules! arg {
    ($name:expr) => {{
        use $crate::cli::Inflector;
        $crate::cli::Arg::with_name($name).value_name(&$name.to_screaming_snake_case())
    }};
}

#[macro_export]
macro_rules! opt {
    ($name:expr) => {{
        use $crate::cli::Inflector;
        $crate::cli::Arg::with_name($name)
            .long(&$name.to_kebab_case())
            .value_name(&$name.to_screaming_snake_case())
    }};
}

/// One input image, or the reason it could not be read.
pub struct ThermalInput {
    pub filename: String,
    pub image: Result<ThermalImage>,
}

impl ThermalInput {
    fn from_image_path(filename: String, exiftool: &Exiftool) -> Self {
        let image = exiftool.extract(Path::new(&filename));
        ThermalInput { filename, image }
    }

    /// Every record of a JSON file written by `exiftool -b -j`.
    fn from_exiftool_json(filename: String) -> Vec<Self> {
        let records = File::open(&filename)
            .map_err(Into::into)
            .and_then(|f| ThermalImage::from_exiftool_json(BufReader::new(f)));
        match records {
            Ok(records) => records
                .into_iter()
                .enumerate()
                .map(|(idx, image)| ThermalInput {
                    filename: match &image {
                        Ok(img) if !img.source.as_os_str().is_empty() => {
                            img.source.display().to_string()
                        }
                        _ => format!("{}[{}]", filename, idx),
                    },
                    image,
                })
                .collect(),
            Err(e) => vec![ThermalInput {
                filename,
                image: Err(e),
            }],
        }
    }
}

/// Read all inputs in parallel, with a progress bar on stderr.
pub fn process_paths_par(
    paths: Vec<String>,
    is_json: bool,
    exiftool: Exiftool,
) -> impl ParallelIterator<Item = ThermalInput> {
    let bar = ProgressBar::new(paths.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {wide_bar:cyan/blue} {pos:>7}/{len:7}"),
    );
    let bar_dup = bar.clone();

    paths
        .into_par_iter()
        .map(move |p| {
            if is_json {
                let vec = ThermalInput::from_exiftool_json(p);
                if vec.len() > 1 {
                    bar.inc_length(vec.len() as u64 - 1);
                }
                Either::Left(vec.into_par_iter())
            } else {
                Either::Right(once(ThermalInput::from_image_path(p, &exiftool)))
            }
        })
        .flatten()
        .inspect(move |_| bar_dup.inc(1))
}
