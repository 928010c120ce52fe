//! Classification masks and their alignment to the thermal
//! grid.
//!
//! Masks are annotated at the resolution of the visual image
//! and have to be brought down to the sensor resolution
//! before each thermal pixel can be labelled. Resampling is
//! bicubic (Keys kernel with `a = -0.75`, pixel centres at
//! half-integers, edges replicated), after which every value
//! is rounded to a whole number: zero is background, anything
//! else foreground.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use ndarray::Array2;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Per-pixel class labels, `0` for background ("Noise").
pub type ClassMask = Array2<i32>;

const CUBIC_A: f64 = -0.75;

/// Read a whitespace separated grid of numbers, one mask row
/// per line. Blank lines are ignored.
pub fn load_text_mask(path: &Path) -> Result<Array2<f64>> {
    parse_text_mask(&fs::read_to_string(path)?)
}

pub fn parse_text_mask(text: &str) -> Result<Array2<f64>> {
    let mut width = None;
    let mut height = 0;
    let mut values = vec![];
    for (line_no, line) in text.lines().enumerate() {
        let before = values.len();
        for token in line.split_whitespace() {
            let value: f64 = token.parse().map_err(|_| {
                PipelineError::parse("mask", format!("line {}: `{}`", line_no + 1, token))
            })?;
            values.push(value);
        }
        let row_len = values.len() - before;
        if row_len == 0 {
            continue;
        }
        match width {
            None => width = Some(row_len),
            Some(w) if w != row_len => {
                return Err(PipelineError::ShapeMismatch {
                    expected: (height + 1, w),
                    found: (height + 1, row_len),
                })
            }
            _ => (),
        }
        height += 1;
    }
    let width = width.ok_or_else(|| PipelineError::parse("mask", "empty mask"))?;
    Array2::from_shape_vec((height, width), values).map_err(|_| PipelineError::ShapeMismatch {
        expected: (height, width),
        found: (height, width),
    })
}

/// Read an image mask: pixels of exactly `marker` colour are
/// foreground (`1`), all others background.
pub fn load_image_mask(path: &Path, marker: [u8; 3]) -> Result<Array2<f64>> {
    let img = image::open(path)?.to_rgb8();
    let (width, height) = img.dimensions();
    let mut mask = Array2::<f64>::zeros((height as usize, width as usize));
    for (x, y, px) in img.enumerate_pixels() {
        if px.0 == marker {
            mask[(y as usize, x as usize)] = 1.;
        }
    }
    Ok(mask)
}

/// Load a mask file, choosing the reader by extension.
pub fn load_mask(path: &Path, marker: [u8; 3]) -> Result<Array2<f64>> {
    let is_text = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("txt"));
    if is_text {
        load_text_mask(path)
    } else {
        load_image_mask(path, marker)
    }
}

/// Write a class mask as an integer text grid.
pub fn write_text_mask(path: &Path, mask: &ClassMask) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for row in mask.rows() {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(writer, "{}", line.join(" "))?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskAligner {
    pub height: usize,
    pub width: usize,
}

impl MaskAligner {
    pub fn new((height, width): (usize, usize)) -> Self {
        MaskAligner { height, width }
    }

    /// Align `source` to the target grid. A missing source is
    /// reported against `image`.
    ///
    /// Resampled values are rounded to the nearest integer
    /// before classification. Bicubic ringing below 0.5 around
    /// mask edges therefore stays background, and 0.9999 becomes
    /// 1. A classifier testing the raw resampled float for
    /// non-zero would count such ringing as leaf, and an export
    /// that truncates would write 0.9999 as 0.
    pub fn align(&self, source: Option<&Array2<f64>>, image: &Path) -> Result<ClassMask> {
        let source = source.ok_or_else(|| PipelineError::MaskNotFound {
            image: image.to_path_buf(),
        })?;
        let (src_h, src_w) = source.dim();
        if src_h == 0 || src_w == 0 {
            return Err(PipelineError::ShapeMismatch {
                expected: (self.height, self.width),
                found: (src_h, src_w),
            });
        }
        debug!(
            from = ?(src_h, src_w),
            to = ?(self.height, self.width),
            "resampling mask"
        );
        let resampled = self.resample(source);
        Ok(resampled.mapv(|v| v.round() as i32))
    }

    /// Separable bicubic resampling to the target shape.
    pub fn resample(&self, source: &Array2<f64>) -> Array2<f64> {
        let (src_h, src_w) = source.dim();
        let cols = cubic_taps(src_w, self.width);
        let rows = cubic_taps(src_h, self.height);

        let mut horizontal = Array2::<f64>::zeros((src_h, self.width));
        for ((r, c), out) in horizontal.indexed_iter_mut() {
            *out = cols[c].iter().map(|&(i, w)| w * source[(r, i)]).sum();
        }

        let mut output = Array2::<f64>::zeros((self.height, self.width));
        for ((r, c), out) in output.indexed_iter_mut() {
            *out = rows[r].iter().map(|&(i, w)| w * horizontal[(i, c)]).sum();
        }
        output
    }
}

/// Source indices and weights of the four taps for each
/// destination index along one axis.
fn cubic_taps(src_len: usize, dst_len: usize) -> Vec<[(usize, f64); 4]> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len as isize - 1;
    (0..dst_len)
        .map(|d| {
            let pos = (d as f64 + 0.5) * scale - 0.5;
            let base = pos.floor();
            let weights = cubic_weights(pos - base);
            let base = base as isize;
            let mut taps = [(0, 0.); 4];
            for (k, tap) in taps.iter_mut().enumerate() {
                let idx = (base + k as isize - 1).max(0).min(last) as usize;
                *tap = (idx, weights[k]);
            }
            taps
        })
        .collect()
}

fn cubic_weights(x: f64) -> [f64; 4] {
    let a = CUBIC_A;
    let w0 = ((a * (x + 1.) - 5. * a) * (x + 1.) + 8. * a) * (x + 1.) - 4. * a;
    let w1 = ((a + 2.) * x - (a + 3.)) * x * x + 1.;
    let w2 = ((a + 2.) * (1. - x) - (a + 3.)) * (1. - x) * (1. - x) + 1.;
    [w0, w1, w2, 1. - w0 - w1 - w2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source_image() -> PathBuf {
        PathBuf::from("FLIR_0001.jpg")
    }

    #[test]
    fn zero_mask_stays_zero() -> anyhow::Result<()> {
        for &(h, w) in &[(1, 1), (7, 3), (480, 640), (45, 61)] {
            let source = Array2::zeros((h, w));
            let aligned = MaskAligner::new((60, 80)).align(Some(&source), &source_image())?;
            assert_eq!(aligned.dim(), (60, 80));
            assert!(aligned.iter().all(|&v| v == 0));
        }
        Ok(())
    }

    #[test]
    fn same_size_is_identity() -> anyhow::Result<()> {
        let source = Array2::from_shape_fn((6, 8), |(r, c)| ((r * 8 + c) % 3) as f64);
        let aligned = MaskAligner::new((6, 8)).align(Some(&source), &source_image())?;
        assert_eq!(aligned, source.mapv(|v| v as i32));
        Ok(())
    }

    #[test]
    fn downscale_keeps_halves() -> anyhow::Result<()> {
        let source = Array2::from_shape_fn((120, 160), |(_, c)| if c < 80 { 1. } else { 0. });
        let aligned = MaskAligner::new((60, 80)).align(Some(&source), &source_image())?;
        for ((_, c), &v) in aligned.indexed_iter() {
            if c < 39 {
                assert_eq!(v, 1, "column {}", c);
            } else if c > 40 {
                assert_eq!(v, 0, "column {}", c);
            }
        }
        Ok(())
    }

    #[test]
    fn edge_ringing_stays_background() -> anyhow::Result<()> {
        let source = Array2::from_shape_fn((12, 16), |(_, c)| if c < 8 { 1. } else { 0. });
        let aligner = MaskAligner::new((6, 8));

        let resampled = aligner.resample(&source);
        assert!((resampled[(2, 3)] - 1.09375).abs() < 1e-9);
        assert!((resampled[(2, 4)] + 0.09375).abs() < 1e-9);

        let aligned = aligner.align(Some(&source), &source_image())?;
        assert_eq!(aligned.row(2).to_vec(), vec![1, 1, 1, 1, 0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn missing_mask_is_reported() {
        match MaskAligner::new((60, 80)).align(None, &source_image()) {
            Err(PipelineError::MaskNotFound { image: path }) => assert_eq!(path, source_image()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn weights_sum_to_one() {
        for &x in &[0., 0.1, 0.25, 0.5, 0.9] {
            let sum: f64 = cubic_weights(x).iter().sum();
            assert!((sum - 1.).abs() < 1e-12);
        }
    }

    #[test]
    fn parses_text_grid() -> anyhow::Result<()> {
        let mask = parse_text_mask("0 0 1\n0 1 1\n\n")?;
        assert_eq!(mask.dim(), (2, 3));
        assert_eq!(mask[(1, 1)], 1.);

        assert!(matches!(
            parse_text_mask("0 1\n0 1 1\n"),
            Err(PipelineError::ShapeMismatch { .. })
        ));
        assert!(parse_text_mask("0 x\n").is_err());
        assert!(parse_text_mask("\n").is_err());
        Ok(())
    }

    #[test]
    fn text_mask_round_trip_on_disk() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mask_2x3.txt");
        let mask = ClassMask::from_shape_vec((2, 3), vec![0, 1, 0, 2, 0, 1])?;
        write_text_mask(&path, &mask)?;
        assert_eq!(fs::read_to_string(&path)?, "0 1 0\n2 0 1\n");
        assert_eq!(load_mask(&path, [0, 255, 0])?, mask.mapv(|v| v as f64));
        Ok(())
    }

    #[test]
    fn image_mask_uses_marker_colour() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mask.png");
        let mut img = image::RgbImage::new(4, 2);
        img.put_pixel(1, 0, image::Rgb([0, 255, 0]));
        img.put_pixel(3, 1, image::Rgb([0, 255, 0]));
        img.put_pixel(2, 1, image::Rgb([10, 250, 0]));
        img.save(&path)?;

        let mask = load_mask(&path, [0, 255, 0])?;
        assert_eq!(mask.dim(), (2, 4));
        assert_eq!(mask.sum(), 2.);
        assert_eq!(mask[(0, 1)], 1.);
        assert_eq!(mask[(1, 3)], 1.);
        Ok(())
    }
}
