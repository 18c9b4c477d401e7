//! Mobility (1/K0) to collision cross section conversion.

use crate::errors::{
    CcsError,
    ReaderError,
};
use crate::extraction::{
    MobilityPrecision,
    MobilityProfile,
};
use crate::reader::RawDataReader;
use serde::{
    Deserialize,
    Serialize,
};

const MASS_N2: f64 = 28.013;
const DRIFT_GAS_TEMP_C: f64 = 31.85;
const CELSIUS_TO_KELVIN: f64 = 273.15;
const MASON_SCHAMP_CONSTANT: f64 = 18509.8632163405;

/// convert 1 over reduced ion mobility (1/k0) to CCS (Å²), Mason-Schamp with N2 drift gas
///
/// Used by backends without a vendor conversion.
///
/// # Examples
///
/// ```
/// use timsko::ccs::one_over_k0_to_ccs;
///
/// let ccs = one_over_k0_to_ccs(0.5, 1000.0, 2);
/// assert!((ccs - 201.64796734428452).abs() < 1e-9);
/// ```
pub fn one_over_k0_to_ccs(one_over_k0: f64, mz: f64, charge: i32) -> f64 {
    let charge = charge.unsigned_abs() as f64;
    let reduced_mobility = 1.0 / one_over_k0;
    let reduced_mass = (mz * charge * MASS_N2) / (mz * charge + MASS_N2);
    MASON_SCHAMP_CONSTANT * charge
        / (reduced_mass * (DRIFT_GAS_TEMP_C + CELSIUS_TO_KELVIN)).sqrt()
        / reduced_mobility
}

/// Charge and reference m/z used for every mobility of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCcsSettings")]
pub struct CcsSettings {
    charge: i32,
    reference_mz: f64,
}

#[derive(Deserialize)]
struct RawCcsSettings {
    charge: i32,
    reference_mz: f64,
}

impl TryFrom<RawCcsSettings> for CcsSettings {
    type Error = CcsError;

    fn try_from(value: RawCcsSettings) -> Result<Self, Self::Error> {
        CcsSettings::try_new(value.charge, value.reference_mz)
    }
}

impl CcsSettings {
    pub fn try_new(charge: i32, reference_mz: f64) -> Result<Self, CcsError> {
        if charge == 0 {
            return Err(CcsError::ZeroCharge);
        }
        if !(reference_mz.is_finite() && reference_mz > 0.0) {
            return Err(CcsError::InvalidReferenceMz(reference_mz));
        }
        Ok(Self {
            charge,
            reference_mz,
        })
    }

    /// Both values have to come together; one without the other is an error.
    pub fn from_parts(
        charge: Option<i32>,
        reference_mz: Option<f64>,
    ) -> Result<Self, CcsError> {
        match (charge, reference_mz) {
            (Some(charge), Some(mz)) => Self::try_new(charge, mz),
            (None, _) => Err(CcsError::MissingValue("charge")),
            (_, None) => Err(CcsError::MissingValue("reference m/z")),
        }
    }

    pub fn charge(&self) -> i32 {
        self.charge
    }

    pub fn reference_mz(&self) -> f64 {
        self.reference_mz
    }

    pub fn to_ccs<R: RawDataReader>(&self, reader: &R, mobility: f64) -> Result<f64, ReaderError> {
        reader.mobility_to_ccs(mobility, self.charge, self.reference_mz)
    }

    /// Rewrites the mobility axis of one extraction into CCS units.
    ///
    /// CCS keys are kept exact; mobility rounding already happened when the
    /// profile was built. Mobilities landing on the same CCS value are summed.
    pub fn convert_profile<R: RawDataReader>(
        &self,
        reader: &R,
        profile: &MobilityProfile,
    ) -> Result<MobilityProfile, ReaderError> {
        let converted = profile
            .iter()
            .map(|(mobility, intensity)| Ok((self.to_ccs(reader, mobility)?, intensity)))
            .collect::<Result<Vec<_>, ReaderError>>()?;
        Ok(MobilityProfile::from_pairs(converted, MobilityPrecision::Exact))
    }
}
