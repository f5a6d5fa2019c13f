use serde::{Deserialize, Serialize};

use super::composer::round_score;
use super::domain::Period;
use super::result::IndexResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Flat,
    Down,
}

impl Trend {
    pub const fn label(self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Flat => "flat",
            Trend::Down => "down",
        }
    }
}

/// Delta bounds for trend classification; `up` is exclusive above, `down` exclusive below.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendThresholds {
    pub up: f64,
    pub down: f64,
}

impl Default for TrendThresholds {
    fn default() -> Self {
        Self {
            up: 2.0,
            down: -2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendAssessment {
    pub previous_period: Period,
    pub previous_score: f64,
    pub delta: f64,
    pub trend: Trend,
}

pub fn classify(delta: f64, thresholds: &TrendThresholds) -> Trend {
    if delta > thresholds.up {
        Trend::Up
    } else if delta < thresholds.down {
        Trend::Down
    } else {
        Trend::Flat
    }
}

/// Compare against the latest published result before the current period, if any.
pub fn assess(
    current: f64,
    previous: Option<&IndexResult>,
    thresholds: &TrendThresholds,
) -> Option<TrendAssessment> {
    let previous = previous?;
    let delta = round_score(current - previous.overall);
    Some(TrendAssessment {
        previous_period: previous.period,
        previous_score: previous.overall,
        delta,
        trend: classify(delta, thresholds),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_uses_exclusive_bounds() {
        let thresholds = TrendThresholds::default();
        assert_eq!(classify(2.5, &thresholds), Trend::Up);
        assert_eq!(classify(2.0, &thresholds), Trend::Flat);
        assert_eq!(classify(0.0, &thresholds), Trend::Flat);
        assert_eq!(classify(-2.0, &thresholds), Trend::Flat);
        assert_eq!(classify(-2.01, &thresholds), Trend::Down);
    }

    #[test]
    fn custom_thresholds_apply() {
        let thresholds = TrendThresholds { up: 5.0, down: -1.0 };
        assert_eq!(classify(4.0, &thresholds), Trend::Flat);
        assert_eq!(classify(-1.5, &thresholds), Trend::Down);
    }

    #[test]
    fn no_previous_result_means_no_trend() {
        assert!(assess(50.0, None, &TrendThresholds::default()).is_none());
    }
}
