//! Thermal images as extracted by exiftool.
//!
//! `exiftool -b -j` reports the calibration fields by name
//! and embeds the raw sensor frame as a base64 encoded PNG
//! or TIFF. FLIR PNG frames store their samples byte-swapped,
//! TIFF frames do not.

use std::{
    convert::TryFrom,
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

use image::{
    codecs::{png::PngDecoder, tiff::TiffDecoder},
    imageops::FilterType,
    ColorType, ImageDecoder, RgbImage,
};
use ndarray::Array2;
use serde_derive::*;
use serde_json::{Map, Value};

use crate::{
    calibration::EmbeddedMetadata,
    error::{PipelineError, Result},
};

/// Raw sensor counts, one per pixel.
pub type RawThermalGrid = Array2<u16>;

pub struct ThermalImage {
    pub source: PathBuf,
    pub metadata: EmbeddedMetadata,
    pub raw: RawThermalGrid,
    /// Whether `raw` holds byte-swapped samples.
    pub swap_byte_order: bool,
}

impl ThermalImage {
    pub fn dim(&self) -> (usize, usize) {
        self.raw.dim()
    }

    /// Parse the JSON array printed by `exiftool -b -j`. Each
    /// record is decoded independently.
    pub fn from_exiftool_json<R: Read>(rdr: R) -> Result<Vec<Result<Self>>> {
        Ok(serde_json::from_reader::<R, Vec<ExiftoolRecord>>(rdr)?
            .into_iter()
            .map(ThermalImage::try_from)
            .collect())
    }
}

/// One record of exiftool JSON output.
#[derive(Deserialize, Debug)]
pub struct ExiftoolRecord {
    #[serde(rename = "SourceFile", default)]
    pub source_file: Option<String>,

    #[serde(flatten)]
    pub raw: ThermalRawBytes,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TryFrom<ExiftoolRecord> for ThermalImage {
    type Error = PipelineError;

    fn try_from(record: ExiftoolRecord) -> Result<Self> {
        let raw = record.raw.thermal_image()?;
        Ok(ThermalImage {
            source: record.source_file.map(PathBuf::from).unwrap_or_default(),
            metadata: record.fields.into(),
            raw,
            swap_byte_order: record.raw.needs_byte_swap(),
        })
    }
}

#[derive(Deserialize, Debug)]
pub struct ThermalRawBytes {
    #[serde(rename = "RawThermalImageType")]
    ty: String,

    #[serde(
        rename = "RawThermalImage",
        deserialize_with = "serde_helpers::base64_bytes"
    )]
    bytes: Vec<u8>,
}

impl ThermalRawBytes {
    pub fn new(ty: impl Into<String>, bytes: Vec<u8>) -> Self {
        ThermalRawBytes {
            ty: ty.into(),
            bytes,
        }
    }

    pub fn needs_byte_swap(&self) -> bool {
        self.ty.trim().eq_ignore_ascii_case("PNG")
    }

    pub fn thermal_image(&self) -> Result<RawThermalGrid> {
        let cursor = Cursor::new(&self.bytes);
        match self.ty.trim().to_ascii_uppercase().as_str() {
            "PNG" => decode_grid(PngDecoder::new(cursor)?, SampleOrder::BigEndian),
            "TIFF" => decode_grid(TiffDecoder::new(cursor)?, SampleOrder::Native),
            other => Err(PipelineError::UnsupportedRawFormat(format!(
                "image type `{}`",
                other
            ))),
        }
    }
}

/// Byte order of 16-bit samples handed out by a decoder. The
/// PNG decoder passes the big-endian stream through, the TIFF
/// decoder converts to native order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleOrder {
    BigEndian,
    Native,
}

fn decode_grid<'a, D: ImageDecoder<'a>>(decoder: D, order: SampleOrder) -> Result<RawThermalGrid> {
    use zerocopy::AsBytes;

    let (width, height) = decoder.dimensions();
    let width = width as usize;
    let height = height as usize;

    let values: Vec<u16> = match (decoder.color_type(), order) {
        (ColorType::L8, _) => {
            let mut buf = vec![0u8; width * height];
            decoder.read_image(&mut buf)?;
            buf.into_iter().map(u16::from).collect()
        }
        (ColorType::L16, SampleOrder::BigEndian) => {
            let mut buf = vec![0u8; width * height * 2];
            decoder.read_image(&mut buf)?;
            buf.chunks_exact(2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .collect()
        }
        (ColorType::L16, SampleOrder::Native) => {
            let mut buf = vec![0u16; width * height];
            decoder.read_image(buf.as_bytes_mut())?;
            buf
        }
        (other, _) => {
            return Err(PipelineError::UnsupportedRawFormat(format!(
                "colour type {:?}",
                other
            )))
        }
    };

    Array2::from_shape_vec((height, width), values).map_err(|_| PipelineError::ShapeMismatch {
        expected: (height, width),
        found: (0, 0),
    })
}

/// Load the visual image of a capture, resized to the thermal
/// grid when its resolution differs.
pub fn load_visual(path: &Path, (height, width): (usize, usize)) -> Result<RgbImage> {
    let img = image::open(path)?.to_rgb8();
    if img.dimensions() == (width as u32, height as u32) {
        return Ok(img);
    }
    Ok(image::imageops::resize(
        &img,
        width as u32,
        height as u32,
        FilterType::Triangle,
    ))
}

mod serde_helpers {
    use lazy_static::lazy_static;
    use regex::Regex;
    use serde::*;

    pub fn base64_bytes<'de, D>(de: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^base64:").unwrap();
        }

        use serde::de::Error;
        let str_rep = <String as Deserialize>::deserialize(de)?;

        RE.find(&str_rep)
            .ok_or_else(|| Error::custom("unexpected format: must begin with `base64:`"))?;

        base64::decode(&str_rep[7..]).map_err(Error::custom)
    }
}
