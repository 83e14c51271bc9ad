use crate::error::ValidationError;
use serde::Serialize;
use std::fmt;

/// A recorded mark. Sentinels carry no magnitude and never enter an average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum ScoreValue {
    Numeric(f64),
    Absent,
    NotGraded,
}

const ABSENT_TOKENS: [&str; 2] = ["ABS", "A"];
const NOT_GRADED_TOKENS: [&str; 2] = ["NN", "N"];

impl ScoreValue {
    /// Parses raw mark input against the scale in force.
    ///
    /// `Ok(None)` means the input was blank: leave whatever is stored alone.
    /// Sentinel tokens are matched case-insensitively and are valid under any
    /// scale. Numbers accept either `,` or `.` as the decimal separator.
    pub fn parse(raw: &str, scale: &GradingScale) -> Result<Option<ScoreValue>, ValidationError> {
        let t = raw.trim();
        if t.is_empty() {
            return Ok(None);
        }
        let up = t.to_ascii_uppercase();
        if ABSENT_TOKENS.contains(&up.as_str()) {
            return Ok(Some(ScoreValue::Absent));
        }
        if NOT_GRADED_TOKENS.contains(&up.as_str()) {
            return Ok(Some(ScoreValue::NotGraded));
        }

        let normalized = t.replace(',', ".");
        let value: f64 = match normalized.parse() {
            Ok(v) if f64::is_finite(v) => v,
            _ => {
                return Err(ValidationError::NotANumber {
                    raw: t.to_string(),
                })
            }
        };
        if !(0.0..=scale.max_score()).contains(&value) {
            return Err(ValidationError::OutOfRange {
                value,
                max: scale.max_score(),
            });
        }
        // -0.0 would otherwise leak into stored values and re-serialize oddly.
        Ok(Some(ScoreValue::Numeric(value + 0.0)))
    }

    pub fn numeric(self) -> Option<f64> {
        match self {
            ScoreValue::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Storage status column value.
    pub fn status(self) -> &'static str {
        match self {
            ScoreValue::Numeric(_) => "scored",
            ScoreValue::Absent => "absent",
            ScoreValue::NotGraded => "not_graded",
        }
    }

    /// Rebuilds a value from its storage columns. Unknown statuses fall back to
    /// the raw value when one is present.
    pub fn from_storage(status: &str, raw_value: Option<f64>) -> ScoreValue {
        match status {
            "absent" => ScoreValue::Absent,
            "not_graded" => ScoreValue::NotGraded,
            "scored" => ScoreValue::Numeric(raw_value.unwrap_or(0.0)),
            _ => raw_value
                .map(ScoreValue::Numeric)
                .unwrap_or(ScoreValue::NotGraded),
        }
    }
}

impl fmt::Display for ScoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreValue::Numeric(v) => write!(f, "{}", v),
            ScoreValue::Absent => f.write_str("ABS"),
            ScoreValue::NotGraded => f.write_str("NN"),
        }
    }
}

/// Maximum valid numeric mark for a class. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScale {
    max_score: f64,
}

impl GradingScale {
    pub fn new(max_score: f64) -> Option<Self> {
        if max_score.is_finite() && max_score > 0.0 {
            Some(Self { max_score })
        } else {
            None
        }
    }

    pub fn max_score(&self) -> f64 {
        self.max_score
    }
}
