//! Three-tier classification of results against reference ranges.
//!
//! A value inside `[min, max]` is [`ThreatLevel::Normal`]. Outside that, the
//! range is widened on both sides by `extension * (max - min)`; a value inside
//! the widened band is [`ThreatLevel::Warning`], anything further out is
//! [`ThreatLevel::Critical`]. Both intervals are inclusive.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::{Bounds, Parameter, ParameterKind, ReferenceRange, Value};

/// The subject's recorded gender, as resolved by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// Classified against the male range.
    Male,
    /// Classified against the female range.
    Female,
    /// Recorded, but maps to neither declared range.
    Other,
    /// Not recorded.
    #[default]
    Unknown,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
            Self::Unknown => "unknown",
        })
    }
}

/// Error returned when a string is not a recognised gender.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid gender '{0}': expected male, female, other or unknown")]
pub struct InvalidGenderError(String);

impl FromStr for Gender {
    type Err = InvalidGenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Self::Male),
            "female" | "f" => Ok(Self::Female),
            "other" | "o" => Ok(Self::Other),
            "unknown" | "u" | "" => Ok(Self::Unknown),
            _ => Err(InvalidGenderError(s.to_string())),
        }
    }
}

/// How far a value lies from its reference range.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    /// Inside the reference range, or not applicable.
    #[default]
    Normal,
    /// Outside the range but within the extended band.
    Warning,
    /// Outside the extended band.
    Critical,
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// The subject's gender does not select a range, and the declared ranges
/// disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot choose a reference range for gender '{gender}'")]
pub struct Unclassifiable {
    /// The gender that failed to map.
    pub gender: Gender,
}

/// Width of the warning band, as a fraction of the range width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPolicy {
    extension: f64,
}

impl Default for BandPolicy {
    fn default() -> Self {
        Self::CANONICAL
    }
}

impl BandPolicy {
    /// Half the range width on each side.
    pub const CANONICAL: Self = Self { extension: 0.5 };

    /// Creates a policy with the given extension factor.
    ///
    /// Returns `None` if the factor is negative or not finite.
    #[must_use]
    pub fn new(extension: f64) -> Option<Self> {
        (extension.is_finite() && extension >= 0.0).then_some(Self { extension })
    }

    /// The extension factor.
    #[must_use]
    pub const fn extension(self) -> f64 {
        self.extension
    }

    /// The extended band around `[min, max]`.
    ///
    /// A degenerate range (`min == max`) is treated as having width 1.
    #[must_use]
    pub fn band(self, min: f64, max: f64) -> (f64, f64) {
        let width = max - min;
        let width = if width == 0.0 { 1.0 } else { width };
        let margin = self.extension * width;
        (min - margin, max + margin)
    }

    /// Classifies a value against a complete range.
    ///
    /// # Examples
    ///
    /// ```
    /// use labcore::{BandPolicy, ThreatLevel};
    ///
    /// let policy = BandPolicy::CANONICAL;
    /// assert_eq!(policy.level(15.0, 10.0, 20.0), ThreatLevel::Normal);
    /// assert_eq!(policy.level(9.0, 10.0, 20.0), ThreatLevel::Warning);
    /// assert_eq!(policy.level(4.0, 10.0, 20.0), ThreatLevel::Critical);
    /// ```
    #[must_use]
    pub fn level(self, value: f64, min: f64, max: f64) -> ThreatLevel {
        if (min..=max).contains(&value) {
            return ThreatLevel::Normal;
        }
        let (low, high) = self.band(min, max);
        if (low..=high).contains(&value) {
            ThreatLevel::Warning
        } else {
            ThreatLevel::Critical
        }
    }

    /// Classifies a value against a gender-specific range.
    ///
    /// A missing value, a missing range, or an incomplete range for the
    /// subject's gender are not applicable and classify as
    /// [`ThreatLevel::Normal`].
    ///
    /// # Errors
    ///
    /// Returns [`Unclassifiable`] when the gender is neither male nor female
    /// and the two declared ranges differ.
    pub fn classify(
        self,
        value: Option<f64>,
        range: Option<&ReferenceRange>,
        gender: Gender,
    ) -> Result<ThreatLevel, Unclassifiable> {
        let (Some(value), Some(range)) = (value, range) else {
            return Ok(ThreatLevel::Normal);
        };
        if !value.is_finite() {
            return Ok(ThreatLevel::Normal);
        }

        let bounds = select_bounds(range, gender)?;
        Ok(bounds
            .and_then(|b| b.complete())
            .map_or(ThreatLevel::Normal, |(min, max)| {
                self.level(value, min, max)
            }))
    }

    /// Classifies a resolved parameter value.
    ///
    /// Text parameters and unresolved values are always
    /// [`ThreatLevel::Normal`].
    ///
    /// # Errors
    ///
    /// See [`BandPolicy::classify`].
    pub fn classify_parameter(
        self,
        parameter: &Parameter,
        value: &Value,
        gender: Gender,
    ) -> Result<ThreatLevel, Unclassifiable> {
        if parameter.kind == ParameterKind::Text {
            return Ok(ThreatLevel::Normal);
        }
        let number = value.as_number();
        let level = self.classify(number, parameter.range.as_ref(), gender)?;
        if number.is_some() && !has_complete_range(parameter.range.as_ref(), gender) {
            tracing::debug!(
                parameter = %parameter.name,
                %gender,
                "no complete reference range, classified as normal"
            );
        }
        Ok(level)
    }
}

fn select_bounds(range: &ReferenceRange, gender: Gender) -> Result<Option<Bounds>, Unclassifiable> {
    match gender {
        Gender::Male => Ok(range.male),
        Gender::Female => Ok(range.female),
        Gender::Other | Gender::Unknown => {
            let male = range.male.and_then(|b| b.complete());
            let female = range.female.and_then(|b| b.complete());
            match (male, female) {
                (None, None) => Ok(None),
                (Some(m), Some(f)) if m == f => Ok(range.male),
                _ => Err(Unclassifiable { gender }),
            }
        }
    }
}

fn has_complete_range(range: Option<&ReferenceRange>, gender: Gender) -> bool {
    range
        .and_then(|r| select_bounds(r, gender).ok().flatten())
        .and_then(|b| b.complete())
        .is_some()
}
