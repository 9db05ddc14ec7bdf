use serde::de::Unexpected;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use super::error::{Error, ErrorDetail};

/// Multiplier applied to the simulated gas amount before broadcast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasAdjustment(f64);

impl GasAdjustment {
    const DEFAULT: f64 = 1.1;
    pub(crate) const MIN_BOUND: f64 = 1.0;

    pub fn new(value: f64) -> Result<Self, Error> {
        if value < Self::MIN_BOUND {
            return Err(Error::invalid_gas_adjustment(value));
        }
        Ok(Self(value))
    }

    // Unchecked constructor used for test cases only.
    pub fn unsafe_new(value: f64) -> Self {
        Self(value)
    }

    pub fn to_f64(self) -> f64 {
        self.0
    }

    /// Apply the adjustment to a simulated gas amount, saturating on overflow.
    pub fn apply(self, gas: u64) -> u64 {
        (gas as f64 * self.0).ceil() as u64
    }
}

impl Default for GasAdjustment {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl<'de> Deserialize<'de> for GasAdjustment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;

        GasAdjustment::new(value).map_err(|e| match e.detail() {
            ErrorDetail::InvalidGasAdjustment(_) => D::Error::invalid_value(
                Unexpected::Float(value),
                &format!("a floating-point value of at least {}", Self::MIN_BOUND).as_str(),
            ),
            _ => D::Error::custom(e.to_string()),
        })
    }
}

impl Serialize for GasAdjustment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl From<GasAdjustment> for f64 {
    fn from(m: GasAdjustment) -> Self {
        m.0
    }
}
