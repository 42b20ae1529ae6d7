//! Fixed-point score in hundredths, bounded to `0.00..=100.00`.
//!
//! Confidence and risk scores are accumulated by repeated addition, so they
//! are kept as integers to make every update exact and replayable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScoreError {
    #[error("score must be a finite number, got {0}")]
    NotFinite(f64),
    #[error("score {0} is outside 0.00..=100.00")]
    OutOfRange(f64),
    #[error("cannot parse score from '{0}'")]
    Parse(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Score(u32);

impl Score {
    pub const ZERO: Score = Score(0);
    pub const MAX: Score = Score(10_000);
    /// Smallest representable step (0.01).
    pub const UNIT: Score = Score(1);

    /// Build from hundredths, clamped to the valid range.
    pub const fn from_hundredths(hundredths: u32) -> Self {
        if hundredths > Self::MAX.0 {
            Self::MAX
        } else {
            Score(hundredths)
        }
    }

    /// Build from whole points, clamped to the valid range.
    pub const fn from_points(points: u32) -> Self {
        if points > 100 {
            Self::MAX
        } else {
            Score(points * 100)
        }
    }

    pub const fn hundredths(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn saturating_add(self, other: Score) -> Score {
        Score::from_hundredths(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Score) -> Score {
        Score(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> f64 {
        score.as_f64()
    }
}

impl TryFrom<f64> for Score {
    type Error = ScoreError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            return Err(ScoreError::NotFinite(value));
        }
        if !(0.0..=100.0).contains(&value) {
            return Err(ScoreError::OutOfRange(value));
        }
        Ok(Score((value * 100.0).round() as u32))
    }
}

impl FromStr for Score {
    type Err = ScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| ScoreError::Parse(s.to_string()))?;
        Score::try_from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_saturates_at_max() {
        let s = Score::from_points(95).saturating_add(Score::from_points(20));
        assert_eq!(s, Score::MAX);
    }

    #[test]
    fn subtraction_saturates_at_zero() {
        let s = Score::from_points(5).saturating_sub(Score::from_points(10));
        assert_eq!(s, Score::ZERO);
    }

    #[test]
    fn display_has_two_decimals() {
        assert_eq!(Score::from_hundredths(2999).to_string(), "29.99");
        assert_eq!(Score::from_points(70).to_string(), "70.00");
        assert_eq!(Score::ZERO.to_string(), "0.00");
    }

    #[test]
    fn float_conversion_rejects_out_of_range() {
        assert_eq!(Score::try_from(12.5).unwrap(), Score::from_hundredths(1250));
        assert!(matches!(Score::try_from(100.01), Err(ScoreError::OutOfRange(_))));
        assert!(matches!(Score::try_from(-1.0), Err(ScoreError::OutOfRange(_))));
        assert!(matches!(Score::try_from(f64::NAN), Err(ScoreError::NotFinite(_))));
    }

    #[test]
    fn serializes_as_json_number() {
        let json = serde_json::to_string(&Score::from_hundredths(4550)).unwrap();
        assert_eq!(json, "45.5");
        let back: Score = serde_json::from_str("45.5").unwrap();
        assert_eq!(back, Score::from_hundredths(4550));
        assert!(serde_json::from_str::<Score>("120").is_err());
    }

    #[test]
    fn parses_from_str() {
        assert_eq!("10".parse::<Score>().unwrap(), Score::from_points(10));
        assert!("ten".parse::<Score>().is_err());
    }
}
