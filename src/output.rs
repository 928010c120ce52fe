//! CSV tables written per image.
//!
//! Each table is written to a `.partial` sibling first and
//! renamed into place once complete, so a failing image never
//! leaves a truncated table behind.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use csv::{Writer, WriterBuilder};
use image::RgbImage;
use ndarray::Array2;

use crate::{
    error::{PipelineError, Result},
    mask::ClassMask,
    stats::{FrequencyRow, PixelClass, Summary},
};

pub const PIXEL_TABLE_SUFFIX: &str = "_thermal_values.csv";
pub const SUMMARY_FILE: &str = "output.csv";
pub const FREQUENCY_FILE: &str = "canopy_empirical.csv";

const SUMMARY_HEADER: [&str; 8] = [
    "Temp avg",
    "Leaf Temp avg",
    "Noise Temp avg",
    "avg diff",
    "Leaf Temp peak",
    "Leaf Temp Low",
    "Noise Temp Peak",
    "Noise Temp Low",
];
const FREQUENCY_HEADER: [&str; 3] = ["Temp_rounded(c)", "Observations", "Frequency(%)"];

fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut Writer<File>) -> Result<()>,
{
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let result = (|| -> Result<()> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_path(&partial)?;
        write(&mut writer)?;
        writer.flush()?;
        Ok(())
    })();

    match result {
        Ok(()) => Ok(fs::rename(&partial, path)?),
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

/// Per-pixel table `x,y,Temp(c),R,G,B[,Class]`, with `x` the
/// row and `y` the column. Colour cells are empty without a
/// visual image.
pub fn write_pixel_table(
    path: &Path,
    temps: &Array2<f64>,
    visual: Option<&RgbImage>,
    mask: Option<&ClassMask>,
) -> Result<()> {
    let (rows, cols) = temps.dim();
    if let Some(mask) = mask {
        if mask.dim() != (rows, cols) {
            return Err(PipelineError::ShapeMismatch {
                expected: (rows, cols),
                found: mask.dim(),
            });
        }
    }
    if let Some(visual) = visual {
        let (w, h) = visual.dimensions();
        if (h as usize, w as usize) != (rows, cols) {
            return Err(PipelineError::ShapeMismatch {
                expected: (rows, cols),
                found: (h as usize, w as usize),
            });
        }
    }

    write_atomically(path, |writer| {
        let mut header = vec!["x", "y", "Temp(c)", "R", "G", "B"];
        if mask.is_some() {
            header.push("Class");
        }
        writer.write_record(&header)?;

        let mut record = Vec::with_capacity(header.len());
        for ((x, y), temp) in temps.indexed_iter() {
            record.clear();
            record.push(x.to_string());
            record.push(y.to_string());
            // always with a decimal point, `21.0` rather than `21`
            record.push(format!("{:?}", temp));
            match visual {
                Some(visual) => {
                    let px = visual.get_pixel(y as u32, x as u32);
                    record.extend(px.0.iter().map(|c| c.to_string()));
                }
                None => record.extend(vec![String::new(); 3]),
            }
            if let Some(mask) = mask {
                record.push(PixelClass::of(mask[(x, y)]).to_string());
            }
            writer.write_record(&record)?;
        }
        Ok(())
    })
}

/// One-row summary table of an image.
pub fn write_summary(path: &Path, summary: &Summary) -> Result<()> {
    write_atomically(path, |writer| {
        writer.write_record(&SUMMARY_HEADER)?;
        writer.serialize(summary)?;
        Ok(())
    })
}

/// Frequency table, rows in the order given.
pub fn write_frequency_table(path: &Path, rows: &[FrequencyRow]) -> Result<()> {
    write_atomically(path, |writer| {
        writer.write_record(&FREQUENCY_HEADER)?;
        for row in rows {
            writer.serialize(row)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ClassStatistics;

    #[test]
    fn pixel_table_with_classes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("img_thermal_values.csv");
        let temps = Array2::from_shape_vec((2, 2), vec![20.5, 21., 22.25, 23.])?;
        let mask = ClassMask::from_shape_vec((2, 2), vec![0, 1, 1, 0])?;
        let visual = RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]));

        write_pixel_table(&path, &temps, Some(&visual), Some(&mask))?;
        let text = fs::read_to_string(&path)?;
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "x,y,Temp(c),R,G,B,Class");
        assert_eq!(lines[1], "0,0,20.5,1,2,3,Noise");
        assert_eq!(lines[2], "0,1,21.0,1,2,3,Leaf");
        assert_eq!(lines[3], "1,0,22.25,1,2,3,Leaf");
        assert_eq!(lines[4], "1,1,23.0,1,2,3,Noise");
        assert_eq!(lines.len(), 5);
        assert!(!dir.path().join("img_thermal_values.csv.partial").exists());
        Ok(())
    }

    #[test]
    fn pixel_table_without_visual() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.csv");
        write_pixel_table(&path, &Array2::from_elem((1, 1), 19.), None, None)?;
        assert_eq!(fs::read_to_string(&path)?, "x,y,Temp(c),R,G,B\n0,0,19.0,,,\n");
        Ok(())
    }

    #[test]
    fn mismatched_mask_writes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.csv");
        let mask = ClassMask::zeros((2, 2));
        assert!(write_pixel_table(&path, &Array2::zeros((1, 1)), None, Some(&mask)).is_err());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn summary_table() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(SUMMARY_FILE);
        let temps = Array2::from_shape_vec((1, 2), vec![20., 24.])?;
        let summary = ClassStatistics::compute(&temps, &ClassMask::ones((1, 2)))?.summary();

        write_summary(&path, &summary)?;
        let text = fs::read_to_string(&path)?;
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], SUMMARY_HEADER.join(","));
        assert_eq!(lines[1], "22.0,22.0,,,24.0,20.0,,");
        Ok(())
    }

    #[test]
    fn frequency_table() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(FREQUENCY_FILE);
        let rows = [
            FrequencyRow {
                temperature: 22,
                observations: 3,
                frequency: 50.,
            },
            FrequencyRow {
                temperature: 20,
                observations: 2,
                frequency: 33.33,
            },
        ];
        write_frequency_table(&path, &rows)?;
        assert_eq!(
            fs::read_to_string(&path)?,
            "Temp_rounded(c),Observations,Frequency(%)\n22,3,50.0\n20,2,33.33\n"
        );

        write_frequency_table(&path, &[])?;
        assert_eq!(
            fs::read_to_string(&path)?,
            "Temp_rounded(c),Observations,Frequency(%)\n"
        );
        Ok(())
    }
}
