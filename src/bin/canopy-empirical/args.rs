use anyhow::Result;
use clap::value_t_or_exit;
use std::path::PathBuf;
use canopy_thermal::{arg, args_parser, opt};

pub struct Args {
    pub paths: Vec<String>,
    pub is_json: bool,
    pub config: Option<PathBuf>,
    pub weather: PathBuf,
    pub output: Option<PathBuf>,
    pub sub: Option<f64>,
    pub add: Option<f64>,
    pub debug: bool,
}

impl Args {
    pub fn from_cmd_line() -> Result<Args> {
        let matches = args_parser!("canopy-empirical")
            .setting(clap::AppSettings::AllowLeadingHyphen)
            .about("Temperature frequency table around the logged ambient temperature.")
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
                    .required(true)
                    .help("Weather log (xlsx or csv) with the ambient temperatures"),
            )
            .arg(
                opt!("output")
                    .short("o")
                    .help("Output directory (default: a folder next to each image)"),
            )
            .arg(opt!("sub").help("Degrees below ambient kept in the table"))
            .arg(opt!("add").help("Degrees above ambient kept in the table"))
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
        let weather = value_t_or_exit!(matches, "weather", PathBuf);
        let sub = matches
            .is_present("sub")
            .then(|| value_t_or_exit!(matches.value_of("sub"), f64));
        let add = matches
            .is_present("add")
            .then(|| value_t_or_exit!(matches.value_of("add"), f64));

        Ok(Args {
            paths,
            is_json: matches.is_present("json"),
            config: matches.value_of("config").map(PathBuf::from),
            weather,
            output: matches.value_of("output").map(PathBuf::from),
            sub,
            add,
            debug: matches.is_present("debug"),
        })
    }
}
