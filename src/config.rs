//! Pipeline configuration.
//!
//! Every field has a default, so a JSON file only needs to
//! name what it changes:
//!
//! ```no_run
//! use canopy_thermal::config::PipelineConfig;
//! use std::path::Path;
//!
//! let config = PipelineConfig::from_json_file(Path::new("canopy.json"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{fs::File, io::BufReader, path::Path, time::Duration};

use serde_derive::*;

use crate::{
    calibration::{CalibrationParameterResolver, EngineeringDefaults},
    error::Result,
    exiftool::Exiftool,
    weather::MatchPrecedence,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub exiftool_path: String,
    pub exiftool_timeout_secs: u64,

    pub engineering_defaults: EngineeringDefaults,
    /// Object distance used instead of the embedded one.
    pub distance_override: Option<f64>,

    /// Calibrate with the weather log when it has a match.
    pub use_weather_log: bool,
    pub match_precedence: MatchPrecedence,

    /// File names searched, in order, for the mask of an image.
    pub mask_file_names: Vec<String>,
    /// Foreground colour of image masks.
    pub mask_marker_color: [u8; 3],

    pub frequency_window: WindowMargins,
}

/// Margins below and above the ambient temperature.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct WindowMargins {
    pub sub: f64,
    pub add: f64,
}

impl Default for WindowMargins {
    fn default() -> Self {
        WindowMargins { sub: 5., add: 5. }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            exiftool_path: "exiftool".into(),
            exiftool_timeout_secs: 30,
            engineering_defaults: EngineeringDefaults::default(),
            distance_override: Some(EngineeringDefaults::default().object_distance),
            use_weather_log: true,
            match_precedence: MatchPrecedence::default(),
            mask_file_names: vec!["mask.txt".into(), "mask.png".into()],
            mask_marker_color: [0, 255, 0],
            frequency_window: WindowMargins::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    pub fn resolver(&self) -> CalibrationParameterResolver {
        CalibrationParameterResolver::new(self.engineering_defaults, self.distance_override)
    }

    pub fn exiftool(&self) -> Exiftool {
        Exiftool::new(
            &self.exiftool_path,
            Duration::from_secs(self.exiftool_timeout_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() -> anyhow::Result<()> {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "exiftool_timeout_secs": 5,
                "distance_override": null,
                "match_precedence": "first-row",
                "frequency_window": { "add": 8 }
            }"#,
        )?;
        assert_eq!(config.exiftool_timeout_secs, 5);
        assert_eq!(config.distance_override, None);
        assert_eq!(config.match_precedence, MatchPrecedence::FirstRow);
        assert_eq!(config.frequency_window, WindowMargins { sub: 5., add: 8. });
        assert_eq!(config.exiftool_path, "exiftool");
        assert_eq!(config.engineering_defaults.emissivity, 0.98);
        Ok(())
    }

    #[test]
    fn loads_from_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("canopy.json");
        std::fs::write(&path, r#"{ "mask_marker_color": [255, 162, 0] }"#)?;
        let config = PipelineConfig::from_json_file(&path)?;
        assert_eq!(config.mask_marker_color, [255, 162, 0]);
        assert_eq!(config.resolver().distance_override, Some(15.24));
        Ok(())
    }
}
