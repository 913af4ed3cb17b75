//! Closed vocabularies shared by assignment and metrics: treatments, stages and aggregation types.
use std::{fmt, num::NonZeroU8, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// A treatment identifier.
///
/// On the wire, treatments are strings: `""` for no treatment, `"C"` for control and `"T1"` to
/// `"T255"` for numbered variants. Anything else is rejected while parsing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Treatment {
    /// The visitor is not part of the experiment.
    #[default]
    None,
    /// The control group.
    Control,
    /// A numbered treatment, `T1` through `T255`.
    Variant(NonZeroU8),
}

impl Treatment {
    /// Wire representation of [`Treatment::Control`].
    pub const CONTROL: &'static str = "C";

    /// Return `true` if this is the "no treatment" outcome.
    pub fn is_none(&self) -> bool {
        matches!(self, Treatment::None)
    }

    /// Shortcut for `Treatment::Variant(n)`. Returns `None` for `n == 0`.
    pub fn variant(n: u8) -> Option<Treatment> {
        NonZeroU8::new(n).map(Treatment::Variant)
    }
}

impl fmt::Display for Treatment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Treatment::None => Ok(()),
            Treatment::Control => f.write_str(Treatment::CONTROL),
            Treatment::Variant(n) => write!(f, "T{n}"),
        }
    }
}

impl FromStr for Treatment {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => return Ok(Treatment::None),
            Treatment::CONTROL => return Ok(Treatment::Control),
            _ => {}
        }

        let invalid = || ValidationError::InvalidTreatment(s.to_owned());

        let digits = s.strip_prefix('T').ok_or_else(invalid)?;
        // `u8::from_str` accepts a leading `+` and zero padding, neither of which is part of the
        // vocabulary.
        if digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        digits
            .parse::<NonZeroU8>()
            .map(Treatment::Variant)
            .map_err(|_| invalid())
    }
}

impl TryFrom<String> for Treatment {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Treatment> for String {
    fn from(value: Treatment) -> Self {
        value.to_string()
    }
}

/// Delivery stage recognized by the metrics service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    /// Pre-production stage.
    Beta,
    /// Production stage.
    Prod,
}

impl Stage {
    /// Stage name as used in experiment definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Beta => "Beta",
            Stage::Prod => "Prod",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Beta" => Ok(Stage::Beta),
            "Prod" => Ok(Stage::Prod),
            _ => Err(ValidationError::InvalidStage(s.to_owned())),
        }
    }
}

/// How repeated observations of the same metric are summarized before upload.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    /// Total of all observed values. Values must be non-negative.
    #[default]
    Sum,
    /// Arithmetic mean of all observed values.
    Average,
    /// p50/p90/p99 of all observed values. Keeps every sample until flush.
    Percentile,
}

impl AggregationType {
    /// Percentiles reported for [`AggregationType::Percentile`].
    pub const PERCENTILES: [u32; 3] = [50, 90, 99];

    /// Name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Sum => "sum",
            AggregationType::Average => "average",
            AggregationType::Percentile => "percentile",
        }
    }

    /// Check that `value` is acceptable for this aggregation.
    pub fn validate_value(&self, metric_name: &str, value: f64) -> Result<(), ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                metric_name: metric_name.to_owned(),
            });
        }
        if *self == AggregationType::Sum && value < 0.0 {
            return Err(ValidationError::NegativeSum {
                metric_name: metric_name.to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(AggregationType::Sum),
            "average" => Ok(AggregationType::Average),
            "percentile" => Ok(AggregationType::Percentile),
            _ => Err(ValidationError::InvalidAggregationType(s.to_owned())),
        }
    }
}
