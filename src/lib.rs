//! Radiometric calibration and canopy classification of
//! FLIR thermal images.
//!
//! The crate turns the raw sensor frame of a thermal capture
//! into per-pixel temperatures and summarizes them:
//!
//! 1. [Resolve](calibration::CalibrationParameterResolver)
//! the calibration parameters of an image from its embedded
//! metadata, or from a [weather log](weather) recorded next
//! to the field.
//!
//! 2. [Convert](temperature::RadiometricConverter) raw
//! sensor values to °C. This is a port of the [Thermimage R
//! library] with the atmospheric model of `raw2temp`.
//!
//! 3. [Align](mask::MaskAligner) a leaf/background mask to
//! the thermal grid and compute [per-class
//! statistics](stats::ClassStatistics), or a
//! [frequency table](stats::histogram) of temperatures
//! around the ambient temperature.
//!
//! # Usage
//!
//! ```rust
//! # fn test_compile() -> anyhow::Result<()> {
//! use canopy_thermal::{
//!     calibration::CalibrationParameters,
//!     temperature::RadiometricConverter,
//! };
//! use ndarray::Array2;
//!
//! let converter = RadiometricConverter::new(&CalibrationParameters::reference());
//! let temps = converter.convert(&Array2::from_elem((2, 2), 14000), false)?;
//! assert!((temps[(0, 0)] - -3.71).abs() < 0.1);
//! # Ok(())
//! # }
//! ```
//!
//! Batches are driven by a [`BatchContext`] which holds the
//! configuration, the weather log and the counters of a run.
//!
//! [Thermimage R library]: //github.com/gtatters/Thermimage/blob/master/R/raw2temp.R

pub mod error;
pub mod logger;

pub mod calibration;
pub mod config;
pub mod temperature;
pub mod weather;

pub mod exiftool;
pub mod image;
pub mod mask;

pub mod output;
pub mod pipeline;
pub mod stats;

pub mod cli;

pub use crate::error::{PipelineError, Result};
pub use crate::image::ThermalImage;
pub use crate::pipeline::BatchContext;
