use anyhow::Result;
use clap::value_t_or_exit;
use std::path::PathBuf;
use canopy_thermal::{arg, args_parser, opt};

pub struct Args {
    pub paths: Vec<String>,
    pub is_json: bool,
    pub config: Option<PathBuf>,
    pub weather: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub mask_dir: Option<PathBuf>,
    pub visual_dir: Option<PathBuf>,
    pub classify: bool,
    pub distance: Option<f64>,
    pub debug: bool,
}

impl Args {
    pub fn from_cmd_line() -> Result<Args> {
        let matches = args_parser!("canopy-stats")
            .about("Calibrate thermal images and compute leaf / noise temperature stats.")
            .arg(
                opt!("json")
                    .short("j")
                    .takes_value(false)
                    .help("Paths are jsons created using exiftool (default: paths are images)"),
            )
            .arg(opt!("config").short("c").help("Pipeline configuration (json)"))
            .arg(
                opt!("weather")
                    .short("w")
                    .help("Weather log (xlsx or csv) used to calibrate matching images"),
            )
            .arg(
                opt!("output")
                    .short("o")
                    .help("Output directory (default: a folder next to each image)"),
            )
            .arg(opt!("mask dir").help("Directory of masks named after the images"))
            .arg(opt!("visual dir").help("Directory of visual images named after the images"))
            .arg(
                opt!("no classify")
                    .takes_value(false)
                    .help("Only write temperatures, skip mask classification"),
            )
            .arg(
                opt!("distance")
                    .short("d")
                    .help("Object distance to use for calculation (overrides config)"),
            )
            .arg(opt!("debug").takes_value(false).help("Log per-image details"))
            .arg(
                arg!("paths")
                    .required(true)
                    .multiple(true)
                    .help("Image / json paths"),
            )
            .get_matches();

        let paths = matches
            .values_of("paths")
            .unwrap()
            .map(|f| f.into())
            .collect();
        let path_of = |name: &str| matches.value_of(name).map(PathBuf::from);
        let distance = matches
            .is_present("distance")
            .then(|| value_t_or_exit!(matches.value_of("distance"), f64));

        Ok(Args {
            paths,
            is_json: matches.is_present("json"),
            config: path_of("config"),
            weather: path_of("weather"),
            output: path_of("output"),
            mask_dir: path_of("mask dir"),
            visual_dir: path_of("visual dir"),
            classify: !matches.is_present("no classify"),
            distance,
            debug: matches.is_present("debug"),
        })
    }
}
