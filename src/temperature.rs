//! Conversion of raw sensor counts to temperatures.
//!
//! A step by step port of the [Thermimage R library]
//! `raw2temp`, with the atmospheric transmission constants
//! fixed to the values of the reference sensor.
//!
//! [Thermimage R library]: //github.com/gtatters/Thermimage/blob/master/R/raw2temp.R

use ndarray::Array2;

use crate::{
    calibration::{CalibrationParameters, PlanckConstants},
    error::{PipelineError, Result},
};

const CELSIUS_OFFSET: f64 = 273.15;

// ATA1, ATA2, ATB1, ATB2, ATX
const ATMOSPHERIC_TRANS_ALPHA: [f64; 2] = [0.006569, 0.01262];
const ATMOSPHERIC_TRANS_BETA: [f64; 2] = [-0.002276, -0.00667];
const ATMOSPHERIC_TRANS_X: f64 = 1.9;

// h2o<-(RH/100)*exp(1.5587+0.06939*(ATemp)-0.00027816*(ATemp)^2+0.00000068455*(ATemp)^3)
const WATER_VAPOUR_SERIES: [f64; 4] = [1.5587, 0.06939, -0.00027816, 0.00000068455];

/// Swap the two bytes of a raw sample. Some FLIR PNG payloads
/// store samples in the opposite byte order.
#[inline]
pub fn swap_bytes(x: u16) -> u16 {
    (x >> 8) + ((x & 0xff) << 8)
}

impl PlanckConstants {
    // raw = PR1/(PR2*(exp(PB/(temp+273.15))-PF))-PO
    pub fn temp_to_raw(&self, temp: f64) -> f64 {
        self.r1 / (self.r2 * ((self.b / (temp + CELSIUS_OFFSET)).exp() - self.f)) - self.o
    }
}

/// Element-wise raw-to-temperature conversion for one
/// parameter set.
///
/// All terms that do not depend on the pixel are computed
/// once in [`RadiometricConverter::new`]; converting a pixel
/// is then an affine map followed by the Planck inversion.
#[derive(Debug, Clone)]
pub struct RadiometricConverter {
    planck: PlanckConstants,
    tau: f64,
    // raw_obj = coeffs[0] + coeffs[1] * raw
    coeffs: [f64; 2],
}

impl RadiometricConverter {
    pub fn new(params: &CalibrationParameters) -> Self {
        let e = params.emissivity;
        let irt = params.ir_window_transmission;
        let planck = params.planck;

        //   emiss.wind<-1-IRT
        let emiss_wind = 1. - irt;
        //   refl.wind<-0 # anti-reflective coating on window
        let refl_wind = 0.;

        let h2o = (params.relative_humidity / 100.)
            * power_series_at(&WATER_VAPOUR_SERIES, params.atmospheric_temperature).exp();

        // tau1 and tau2 are the same expression in the reference
        // code and both legs keep their own factor below.
        let tau1 = atmospheric_transmission(params.object_distance, h2o);
        let tau2 = atmospheric_transmission(params.object_distance, h2o);

        //   raw.refl1.attn<-(1-E)/E*raw.refl1
        let refl1 = planck.temp_to_raw(params.reflected_temperature);
        let refl1_attn = (1. - e) / e * refl1;

        //   raw.atm1.attn<-(1-tau1)/E/tau1*raw.atm1
        let atm1 = planck.temp_to_raw(params.atmospheric_temperature);
        let atm1_attn = (1. - tau1) / e / tau1 * atm1;

        //   raw.wind.attn<-emiss.wind/E/tau1/IRT*raw.wind
        let wind = planck.temp_to_raw(params.ir_window_temperature);
        let wind_attn = emiss_wind / e / tau1 / irt * wind;

        //   raw.refl2.attn<-refl.wind/E/tau1/IRT*raw.refl2
        let refl2 = planck.temp_to_raw(params.reflected_temperature);
        let refl2_attn = refl_wind / e / tau1 / irt * refl2;

        //   raw.atm2.attn<-(1-tau2)/E/tau1/IRT/tau2*raw.atm2
        let atm2 = planck.temp_to_raw(params.atmospheric_temperature);
        let atm2_attn = (1. - tau2) / e / tau1 / irt / tau2 * atm2;

        let coeffs = [
            -atm1_attn - atm2_attn - wind_attn - refl1_attn - refl2_attn,
            1. / e / tau1 / irt / tau2,
        ];

        RadiometricConverter {
            planck,
            tau: tau1,
            coeffs,
        }
    }

    /// Atmospheric transmission of the optical path.
    pub fn transmission(&self) -> f64 {
        self.tau
    }

    /// Object radiance (raw units) behind the atmosphere and
    /// the window.
    pub fn object_radiance(&self, raw: f64) -> f64 {
        power_series_at(&self.coeffs, raw)
    }

    /// Convert a single raw value. Errors carry the given
    /// pixel coordinates.
    pub fn convert_pixel(&self, raw: f64, (row, col): (usize, usize)) -> Result<f64> {
        let fail = |reason| PipelineError::CalibrationMath { row, col, reason };

        let raw_obj = self.object_radiance(raw);
        if !raw_obj.is_finite() {
            return Err(fail("division by zero in optical path inversion"));
        }

        let denom = self.planck.r2 * (raw_obj + self.planck.o);
        if denom == 0. {
            return Err(fail("division by zero in Planck inversion"));
        }
        let log_arg = self.planck.r1 / denom + self.planck.f;
        if !(log_arg > 0.) || !log_arg.is_finite() {
            return Err(fail("non-positive log argument"));
        }

        // T = PB/log(PR1/(PR2*(raw_obj+PO))+PF)-273.15
        let temp = self.planck.b / log_arg.ln() - CELSIUS_OFFSET;
        if !temp.is_finite() {
            return Err(fail("division by zero in Planck inversion"));
        }
        Ok(temp)
    }

    /// Convert a whole grid in row-major order. The first
    /// degenerate pixel aborts the conversion.
    pub fn convert(&self, raw: &Array2<u16>, swap_byte_order: bool) -> Result<Array2<f64>> {
        let mut temps = Array2::<f64>::zeros(raw.dim());
        for (idx, &value) in raw.indexed_iter() {
            let value = if swap_byte_order {
                swap_bytes(value)
            } else {
                value
            };
            temps[idx] = self.convert_pixel(value as f64, idx)?;
        }
        Ok(temps)
    }

    /// Inverse of [`convert_pixel`](Self::convert_pixel):
    /// the raw count that converts to `temp`.
    pub fn raw_for_temperature(&self, temp: f64) -> f64 {
        let raw_obj = self.planck.temp_to_raw(temp);
        (raw_obj - self.coeffs[0]) / self.coeffs[1]
    }
}

// tau1<-ATX*exp(-sqrt(OD/2)*(ATA1+ATB1*sqrt(h2o)))+(1-ATX)*exp(-sqrt(OD/2)*(ATA2+ATB2*sqrt(h2o)))
// The window is assumed to sit at the mid-point (OD/2)
// between the object and the sensor.
fn atmospheric_transmission(distance: f64, h2o: f64) -> f64 {
    let dist_factor = (distance / 2.).sqrt();
    let h2o_sqrt = h2o.sqrt();
    let leg = |i: usize| {
        (-dist_factor * (ATMOSPHERIC_TRANS_ALPHA[i] + ATMOSPHERIC_TRANS_BETA[i] * h2o_sqrt)).exp()
    };
    ATMOSPHERIC_TRANS_X * leg(0) + (1. - ATMOSPHERIC_TRANS_X) * leg(1)
}

#[inline]
fn power_series_at(coeffs: &[f64], x: f64) -> f64 {
    let mut pow = 1.;
    let mut sum = 0.;
    for coeff in coeffs.iter() {
        sum += pow * coeff;
        pow *= x;
    }
    sum
}
