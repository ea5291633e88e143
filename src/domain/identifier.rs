use std::{
    fmt,
    hash::{Hash, Hasher},
    num::NonZeroU64,
    ops::Deref,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use non_empty_string::NonEmptyString;
use serde::{Deserialize, Serialize};

/// The kinds of identifier the allocator issues.
///
/// Each kind has its own counter within a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Patient registration number.
    Patient,
    /// Sample (specimen) number.
    Sample,
    /// Report number.
    Report,
    /// Invoice number.
    Invoice,
    /// Prescription number.
    Prescription,
}

impl IdentifierKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Patient,
        Self::Sample,
        Self::Report,
        Self::Invoice,
        Self::Prescription,
    ];

    /// The lowercase name, used in storage paths and messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Sample => "sample",
            Self::Report => "report",
            Self::Invoice => "invoice",
            Self::Prescription => "prescription",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not an identifier kind.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error(
    "Invalid identifier kind '{0}': expected patient, sample, report, invoice or prescription"
)]
pub struct InvalidKindError(String);

impl FromStr for IdentifierKind {
    type Err = InvalidKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| InvalidKindError(s.to_string()))
    }
}

/// A validated tenant (lab) identifier.
///
/// Scopes isolate counters from one another. They contain only ASCII
/// letters, digits, `-` and `_`, so they are safe to use as path segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Scope(NonEmptyString);

impl Scope {
    /// Creates a new `Scope`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScopeError` if the string is empty or contains
    /// characters other than ASCII letters, digits, `-` and `_`.
    pub fn new(s: String) -> Result<Self, InvalidScopeError> {
        let valid = !s.starts_with('.')
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(InvalidScopeError(s));
        }
        NonEmptyString::new(s.clone())
            .map(Self)
            .map_err(|_| InvalidScopeError(s))
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Hash for Scope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl Deref for Scope {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Scope {
    type Err = InvalidScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<&str> for Scope {
    type Error = InvalidScopeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

/// Error returned when a scope contains characters outside `[A-Za-z0-9_-]`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid scope '{0}': must be non-empty and contain only letters, digits, '-' or '_'")]
pub struct InvalidScopeError(String);

/// A validated identifier prefix containing only uppercase letters ([A-Z]+).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Prefix(NonEmptyString);

impl Prefix {
    /// Creates a new `Prefix` from a string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPrefixError` if the string is empty or contains
    /// characters other than uppercase letters (A-Z).
    pub fn new(s: String) -> Result<Self, InvalidPrefixError> {
        if !s.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(InvalidPrefixError(s));
        }
        NonEmptyString::new(s.clone())
            .map(Self)
            .map_err(|_| InvalidPrefixError(s))
    }

    /// Derives a prefix from a tenant's display name.
    ///
    /// Keeps the first four ASCII letters, upper-cased, dropping everything
    /// else. Falls back to `fallback` when the name has no letters.
    ///
    /// # Examples
    ///
    /// ```
    /// use labcore::domain::Prefix;
    ///
    /// let fallback = Prefix::new("LABX".to_string()).unwrap();
    /// assert_eq!(Prefix::from_display_name("Acme Diagnostics", &fallback).as_str(), "ACME");
    /// assert_eq!(Prefix::from_display_name("St. Jo's", &fallback).as_str(), "STJO");
    /// assert_eq!(Prefix::from_display_name("24/7", &fallback).as_str(), "LABX");
    /// ```
    #[must_use]
    pub fn from_display_name(name: &str, fallback: &Self) -> Self {
        let letters: String = name
            .chars()
            .filter(char::is_ascii_alphabetic)
            .take(4)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self::new(letters).unwrap_or_else(|_| fallback.clone())
    }

    /// Returns the string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Deref for Prefix {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Prefix {
    type Err = InvalidPrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Error returned when a string doesn't match the required pattern [A-Z]+.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid prefix '{0}': must be non-empty and contain only uppercase letters (A-Z)")]
pub struct InvalidPrefixError(String);

/// How the prefix of an identifier is chosen.
///
/// This is a business rule: premium tenants get identifiers branded with
/// their own name, everyone else shares a generic token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatPolicy {
    /// Prefix derived from the tenant's display name.
    Premium {
        /// The tenant's display name.
        display_name: String,
    },
    /// The configured generic prefix.
    Generic,
}

/// A human-facing sequential identifier.
///
/// Format: `{PREFIX}-{SEQUENCE}`, where the sequence is zero-padded to a
/// configured width and expands past it when needed.
///
/// Examples: `ACME-0001`, `LAB-0420`, `ACME-12345`
///
/// Identity is the prefix and sequence. The padding width only affects
/// display, so `ACME-42` and `ACME-0042` are equal.
#[derive(Debug, Clone)]
pub struct Identifier {
    prefix: Prefix,
    sequence: NonZeroU64,
    digits: usize,
}

impl Identifier {
    /// Creates an identifier.
    ///
    /// This is an infallible constructor that takes pre-validated types.
    #[must_use]
    pub const fn new(prefix: Prefix, sequence: NonZeroU64, digits: usize) -> Self {
        Self {
            prefix,
            sequence,
            digits,
        }
    }

    /// The prefix.
    #[must_use]
    pub const fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// The allocated sequence number.
    #[must_use]
    pub const fn sequence(&self) -> NonZeroU64 {
        self.sequence
    }

    /// The zero-padding width.
    #[must_use]
    pub const fn digits(&self) -> usize {
        self.digits
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix && self.sequence == other.sequence
    }
}

impl Eq for Identifier {}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.prefix
            .cmp(&other.prefix)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}-{:0width$}",
            self.prefix,
            self.sequence,
            width = self.digits
        )
    }
}

impl Serialize for Identifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing an identifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// Malformed structure.
    #[error("Invalid identifier format: {0}")]
    Syntax(String),

    /// The sequence is not a positive integer.
    #[error("Invalid sequence in identifier '{0}': expected a non-zero integer, got {1}")]
    Sequence(String, String),

    /// The prefix is not uppercase alphabetic.
    #[error(transparent)]
    Prefix(#[from] InvalidPrefixError),
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((prefix, sequence)) = s.rsplit_once('-') else {
            return Err(IdentifierError::Syntax(s.to_string()));
        };
        if prefix.is_empty() || sequence.is_empty() {
            return Err(IdentifierError::Syntax(s.to_string()));
        }
        if !sequence.chars().all(|c| c.is_ascii_digit()) {
            return Err(IdentifierError::Sequence(
                s.to_string(),
                sequence.to_string(),
            ));
        }

        let value = sequence
            .parse::<u64>()
            .ok()
            .and_then(NonZeroU64::new)
            .ok_or_else(|| IdentifierError::Sequence(s.to_string(), sequence.to_string()))?;
        let prefix = Prefix::new(prefix.to_string())?;

        Ok(Self::new(prefix, value, sequence.len()))
    }
}

impl TryFrom<&str> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value)
    }
}

/// A stand-in identifier issued without the counter.
///
/// Provisional identifiers are derived from the wall clock, so two of them
/// can collide. They exist only for the explicit degraded mode and render
/// with a `PROV` marker so they are never mistaken for an [`Identifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalIdentifier {
    prefix: Prefix,
    issued_at: DateTime<Utc>,
}

impl ProvisionalIdentifier {
    /// Creates a provisional identifier stamped with the given time.
    #[must_use]
    pub const fn new(prefix: Prefix, issued_at: DateTime<Utc>) -> Self {
        Self { prefix, issued_at }
    }

    /// The prefix.
    #[must_use]
    pub const fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// When the identifier was issued.
    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

impl fmt::Display for ProvisionalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}-PROV-{}",
            self.prefix,
            self.issued_at.format("%Y%m%d%H%M%S%3f")
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    fn prefix(s: &str) -> Prefix {
        Prefix::new(s.to_string()).unwrap()
    }

    #[test_case(4, 1, "ACME-0001"; "4 digits id 1")]
    #[test_case(4, 42, "ACME-0042"; "4 digits id 42")]
    #[test_case(4, 9999, "ACME-9999"; "4 digits at boundary")]
    #[test_case(4, 10000, "ACME-10000"; "4 digits expansion")]
    #[test_case(3, 7, "ACME-007"; "3 digits")]
    #[test_case(6, 123, "ACME-000123"; "6 digits")]
    #[test_case(0, 5, "ACME-5"; "no padding")]
    fn identifier_display(digits: usize, sequence: u64, expected: &str) {
        let id = Identifier::new(prefix("ACME"), NonZeroU64::new(sequence).unwrap(), digits);
        assert_eq!(id.to_string(), expected);
    }

    #[test]
    fn parses_identifier() {
        let id = Identifier::try_from("ACME-0042").unwrap();
        assert_eq!(id.prefix().as_str(), "ACME");
        assert_eq!(id.sequence().get(), 42);
        assert_eq!(id.digits(), 4);
        assert_eq!(id.to_string(), "ACME-0042");
    }

    #[test_case("ACME0042"; "no dash")]
    #[test_case(""; "empty")]
    #[test_case("-"; "only dash")]
    #[test_case("-0042"; "no prefix")]
    #[test_case("ACME-"; "no sequence")]
    fn rejects_malformed_identifier(input: &str) {
        assert!(matches!(
            Identifier::try_from(input),
            Err(IdentifierError::Syntax(_))
        ));
    }

    #[test_case("ACME-00x2"; "non numeric")]
    #[test_case("ACME-0000"; "zero")]
    #[test_case("ACME-99999999999999999999"; "overflow")]
    fn rejects_bad_sequence(input: &str) {
        assert!(matches!(
            Identifier::try_from(input),
            Err(IdentifierError::Sequence(_, _))
        ));
    }

    #[test_case("acme-0001"; "lowercase")]
    #[test_case("ACME--1"; "negative sequence")]
    #[test_case("AC1ME-0001"; "digit in prefix")]
    fn rejects_bad_prefix(input: &str) {
        assert!(matches!(
            Identifier::try_from(input),
            Err(IdentifierError::Prefix(_))
        ));
    }

    #[test]
    fn serializes_as_string() {
        let id = Identifier::new(prefix("LAB"), NonZeroU64::new(12).unwrap(), 4);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"LAB-0012\"");
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test_case("Acme Diagnostics", "ACME"; "plain name")]
    #[test_case("al-Shifa Labs", "ALSH"; "punctuation stripped")]
    #[test_case("3 Rivers Path", "RIVE"; "digits stripped")]
    #[test_case("Lab", "LAB"; "short name kept")]
    #[test_case("Ünïcode Lab", "NCOD"; "non ascii letters stripped")]
    #[test_case("", "LABX"; "empty falls back")]
    #[test_case("123 456", "LABX"; "no letters falls back")]
    fn derives_prefix_from_display_name(name: &str, expected: &str) {
        assert_eq!(
            Prefix::from_display_name(name, &prefix("LABX")).as_str(),
            expected
        );
    }

    #[test]
    fn prefix_validation() {
        assert!(Prefix::new(String::new()).is_err());
        assert!(Prefix::new("Acme".to_string()).is_err());
        assert!(Prefix::new("AC1E".to_string()).is_err());
        assert!(Prefix::new("ACME".to_string()).is_ok());
    }

    #[test_case("lab1", true)]
    #[test_case("north_wing-2", true)]
    #[test_case("", false)]
    #[test_case("lab 1", false)]
    #[test_case("../etc", false)]
    #[test_case(".hidden", false)]
    fn scope_validation(input: &str, valid: bool) {
        assert_eq!(Scope::try_from(input).is_ok(), valid);
    }

    #[test]
    fn parses_kind_case_insensitively() {
        assert_eq!(
            "Sample".parse::<IdentifierKind>(),
            Ok(IdentifierKind::Sample)
        );
        assert_eq!(
            "PRESCRIPTION".parse::<IdentifierKind>(),
            Ok(IdentifierKind::Prescription)
        );
        assert!("receipt".parse::<IdentifierKind>().is_err());
    }

    #[test]
    fn padding_is_not_part_of_identity() {
        let short: Identifier = "ACME-42".parse().unwrap();
        let padded: Identifier = "ACME-0042".parse().unwrap();

        assert_eq!(short, padded);
        assert_eq!(short.cmp(&padded), std::cmp::Ordering::Equal);
        assert_ne!(short.to_string(), padded.to_string());
        assert!(padded < "ACME-43".parse::<Identifier>().unwrap());
    }

    #[test]
    fn provisional_identifier_is_labelled() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let id = ProvisionalIdentifier::new(prefix("ACME"), at);
        assert_eq!(id.to_string(), "ACME-PROV-20240309140507000");
    }
}
