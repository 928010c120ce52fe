//! Error types for the calibration and classification pipeline.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A calibration field was missing or held no number.
    #[error("could not parse calibration field `{field}`: {reason}")]
    ParameterParse { field: String, reason: String },

    /// Degenerate Planck inversion at a pixel.
    #[error("calibration math failed at pixel ({row}, {col}): {reason}")]
    CalibrationMath {
        row: usize,
        col: usize,
        reason: &'static str,
    },

    #[error("no classification mask found for {}", image.display())]
    MaskNotFound { image: PathBuf },

    /// The mask selects no foreground pixel.
    #[error("mask contains no leaf pixels")]
    EmptyClass,

    #[error("no weather record matches `{timestamp}`")]
    WeatherMatchMiss { timestamp: String },

    #[error("grid shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("unsupported raw thermal image: {0}")]
    UnsupportedRawFormat(String),

    #[error("capture time could not be derived from {}", path.display())]
    CaptureTime { path: PathBuf },

    #[error("metadata extraction failed: {0}")]
    ExtractionTool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Spreadsheet(#[from] calamine::XlsxError),
}

impl PipelineError {
    pub fn parse(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::ParameterParse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Data-quality problems are reported to the operator
    /// rather than treated as processing faults.
    pub fn is_data_quality(&self) -> bool {
        matches!(
            self,
            PipelineError::MaskNotFound { .. }
                | PipelineError::EmptyClass
                | PipelineError::WeatherMatchMiss { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert!(PipelineError::EmptyClass.is_data_quality());
        assert!(PipelineError::MaskNotFound {
            image: PathBuf::from("a.jpg")
        }
        .is_data_quality());
        assert!(!PipelineError::parse("PlanckR1", "missing").is_data_quality());
    }

    #[test]
    fn messages_carry_context() {
        let err = PipelineError::CalibrationMath {
            row: 3,
            col: 7,
            reason: "non-positive log argument",
        };
        assert_eq!(
            err.to_string(),
            "calibration math failed at pixel (3, 7): non-positive log argument"
        );
    }
}
