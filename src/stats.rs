//! Class-conditioned temperature statistics and the
//! frequency histogram of the empirical canopy analysis.

use std::{
    collections::BTreeMap,
    fmt,
    ops::AddAssign,
};

use itertools::Itertools;
use ndarray::Array2;
use serde_derive::*;

use crate::{
    error::{PipelineError, Result},
    mask::ClassMask,
};

/// Running count, sum and extrema of a set of values.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            count: 0,
            sum: 0.,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Stats {
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl AddAssign<f64> for Stats {
    fn add_assign(&mut self, val: f64) {
        self.count += 1;
        self.sum += val;
        self.min = self.min.min(val);
        self.max = self.max.max(val);
    }
}

impl AddAssign<&Stats> for Stats {
    fn add_assign(&mut self, other: &Stats) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
    Leaf,
    Noise,
}

impl PixelClass {
    pub fn of(label: i32) -> Self {
        if label != 0 {
            PixelClass::Leaf
        } else {
            PixelClass::Noise
        }
    }
}

impl fmt::Display for PixelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PixelClass::Leaf => "Leaf",
            PixelClass::Noise => "Noise",
        })
    }
}

/// Statistics of one image, split by class. `leaf` and
/// `noise` partition `total`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct ClassStatistics {
    pub total: Stats,
    pub leaf: Stats,
    pub noise: Stats,
}

impl ClassStatistics {
    /// Compute the statistics of a temperature grid labelled
    /// by a co-registered mask. Fails with
    /// [`EmptyClass`](PipelineError::EmptyClass) when no pixel
    /// is a leaf.
    pub fn compute(temps: &Array2<f64>, mask: &ClassMask) -> Result<Self> {
        if temps.dim() != mask.dim() {
            return Err(PipelineError::ShapeMismatch {
                expected: temps.dim(),
                found: mask.dim(),
            });
        }

        let mut stats = ClassStatistics {
            total: Stats::default(),
            leaf: Stats::default(),
            noise: Stats::default(),
        };
        for (&temp, &label) in temps.iter().zip(mask.iter()) {
            stats.total += temp;
            match PixelClass::of(label) {
                PixelClass::Leaf => stats.leaf += temp,
                PixelClass::Noise => stats.noise += temp,
            }
        }

        if stats.leaf.is_empty() {
            return Err(PipelineError::EmptyClass);
        }
        Ok(stats)
    }

    /// The one-row summary of the image.
    pub fn summary(&self) -> Summary {
        let leaf_avg = self.leaf.mean().unwrap_or(f64::NAN);
        let noise_avg = self.noise.mean();
        Summary {
            temp_avg: self.total.mean().unwrap_or(f64::NAN),
            leaf_temp_avg: leaf_avg,
            noise_temp_avg: noise_avg,
            avg_diff: noise_avg.map(|n| (leaf_avg - n).abs()),
            leaf_temp_peak: self.leaf.max,
            leaf_temp_low: self.leaf.min,
            noise_temp_peak: extremum(&self.noise, self.noise.max),
            noise_temp_low: extremum(&self.noise, self.noise.min),
        }
    }
}

fn extremum(stats: &Stats, value: f64) -> Option<f64> {
    if stats.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Row of the per-image summary table. Noise values are empty
/// when the mask covers the whole image.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    #[serde(rename = "Temp avg")]
    pub temp_avg: f64,
    #[serde(rename = "Leaf Temp avg")]
    pub leaf_temp_avg: f64,
    #[serde(rename = "Noise Temp avg")]
    pub noise_temp_avg: Option<f64>,
    #[serde(rename = "avg diff")]
    pub avg_diff: Option<f64>,
    #[serde(rename = "Leaf Temp peak")]
    pub leaf_temp_peak: f64,
    #[serde(rename = "Leaf Temp Low")]
    pub leaf_temp_low: f64,
    #[serde(rename = "Noise Temp Peak")]
    pub noise_temp_peak: Option<f64>,
    #[serde(rename = "Noise Temp Low")]
    pub noise_temp_low: Option<f64>,
}

/// The temperature band `(reference - sub, reference + add)`
/// retained by the histogram.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FrequencyWindow {
    pub reference: f64,
    pub sub: f64,
    pub add: f64,
}

impl FrequencyWindow {
    pub fn low(&self) -> f64 {
        self.reference - self.sub
    }

    pub fn high(&self) -> f64 {
        self.reference + self.add
    }

    pub fn contains(&self, temp: f64) -> bool {
        temp > self.low() && temp < self.high()
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct FrequencyRow {
    #[serde(rename = "Temp_rounded(c)")]
    pub temperature: i64,
    #[serde(rename = "Observations")]
    pub observations: usize,
    #[serde(rename = "Frequency(%)")]
    pub frequency: f64,
}

/// Frequency of each rounded temperature inside `window`.
///
/// Temperatures are rounded half-to-even, filtered strictly
/// inside the window, counted, and reported as a percentage
/// of the retained values (two decimals). Rows are ordered by
/// descending count, ties by ascending temperature.
pub fn histogram<I>(temps: I, window: &FrequencyWindow) -> Vec<FrequencyRow>
where
    I: IntoIterator<Item = f64>,
{
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    let mut retained = 0usize;
    for temp in temps {
        let rounded = round_half_even(temp);
        if window.contains(rounded) {
            *counts.entry(rounded as i64).or_default() += 1;
            retained += 1;
        }
    }

    counts
        .into_iter()
        .map(|(temperature, observations)| FrequencyRow {
            temperature,
            observations,
            frequency: percentage(observations, retained),
        })
        .sorted_by(|a, b| {
            b.observations
                .cmp(&a.observations)
                .then(a.temperature.cmp(&b.temperature))
        })
        .collect()
}

fn round_half_even(x: f64) -> f64 {
    if (x - x.trunc()).abs() == 0.5 {
        2. * (x / 2.).round()
    } else {
        x.round()
    }
}

/// `part / whole` in percent, rounded half-to-even to two
/// decimals. Computed on integers so exact ties stay ties.
fn percentage(part: usize, whole: usize) -> f64 {
    use std::cmp::Ordering;

    let num = part as u128 * 10_000;
    let den = whole as u128;
    let (q, r) = (num / den, num % den);
    let hundredths = match (2 * r).cmp(&den) {
        Ordering::Less => q,
        Ordering::Greater => q + 1,
        Ordering::Equal => q + (q & 1),
    };
    hundredths as f64 / 100.
}
