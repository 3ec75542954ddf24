use serde::{Deserialize, Serialize};

/// Provenance tag for values that may come from a documented default rather
/// than a measurement (e.g. the 2% daily vol / 0.6 correlation fallbacks).
///
/// Downstream consumers and tests use this to detect non-measurement inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataQuality {
    /// Derived from observed market data.
    Measured,
    /// Substituted from a named default because data was missing or too thin.
    Defaulted,
}

impl DataQuality {
    pub fn is_defaulted(&self) -> bool {
        matches!(self, DataQuality::Defaulted)
    }

    /// Combine: a result is only as good as its worst input.
    pub fn merge(self, other: DataQuality) -> DataQuality {
        if self.is_defaulted() || other.is_defaulted() {
            DataQuality::Defaulted
        } else {
            DataQuality::Measured
        }
    }
}
