//! Уровни риска и порог чувствительности.

use crate::form::FormError;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Уровень риска увольнения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::High => "High Risk",
        }
    }

    /// Цвет для отображения уровня в интерфейсе.
    pub fn color(self) -> &'static str {
        match self {
            RiskLevel::Low => "green",
            RiskLevel::Medium => "orange",
            RiskLevel::High => "red",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Границы уровней риска по вероятности увольнения.
///
/// `p < low_below` — низкий риск, `p < medium_below` — средний, иначе высокий.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskBands {
    #[serde(default = "default_low_below")]
    pub low_below: f64,
    #[serde(default = "default_medium_below")]
    pub medium_below: f64,
}

fn default_low_below() -> f64 {
    0.20
}

fn default_medium_below() -> f64 {
    0.35
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            low_below: default_low_below(),
            medium_below: default_medium_below(),
        }
    }
}

impl RiskBands {
    pub fn classify(&self, probability: f64) -> RiskLevel {
        if probability < self.low_below {
            RiskLevel::Low
        } else if probability < self.medium_below {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            self.low_below > 0.0 && self.low_below < 1.0,
            "risk.low_below must be in the (0, 1) range (got {})",
            self.low_below
        );
        ensure!(
            self.medium_below > self.low_below && self.medium_below < 1.0,
            "risk.medium_below must be greater than risk.low_below and below 1 (got {})",
            self.medium_below
        );
        Ok(())
    }
}

/// Диапазон ползунка «Attrition Sensitivity Threshold».
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityRange {
    #[serde(default = "default_sensitivity_min")]
    pub min: f64,
    #[serde(default = "default_sensitivity_max")]
    pub max: f64,
    #[serde(default = "default_sensitivity_step")]
    pub step: f64,
    #[serde(default = "default_sensitivity")]
    pub default: f64,
}

fn default_sensitivity_min() -> f64 {
    0.1
}

fn default_sensitivity_max() -> f64 {
    0.5
}

fn default_sensitivity_step() -> f64 {
    0.05
}

fn default_sensitivity() -> f64 {
    0.35
}

impl Default for SensitivityRange {
    fn default() -> Self {
        Self {
            min: default_sensitivity_min(),
            max: default_sensitivity_max(),
            step: default_sensitivity_step(),
            default: default_sensitivity(),
        }
    }
}

impl SensitivityRange {
    /// Вернуть запрошенный порог или значение по умолчанию.
    ///
    /// Порог вне `[min, max]` — ошибка пользовательского ввода.
    pub fn resolve(&self, requested: Option<f64>) -> Result<f64, FormError> {
        let value = requested.unwrap_or(self.default);
        if !value.is_finite() || value < self.min || value > self.max {
            return Err(FormError::SensitivityOutOfRange {
                min: self.min,
                max: self.max,
                value,
            });
        }
        Ok(value)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            self.min > 0.0 && self.max < 1.0 && self.min <= self.max,
            "sensitivity range must satisfy 0 < min <= max < 1 (got {}..={})",
            self.min,
            self.max
        );
        ensure!(
            (self.min..=self.max).contains(&self.default),
            "sensitivity.default must be within {}..={} (got {})",
            self.min,
            self.max,
            self.default
        );
        ensure!(
            self.step > 0.0 && self.step <= self.max - self.min + f64::EPSILON,
            "sensitivity.step must be positive and not wider than the range (got {})",
            self.step
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_band_edges() {
        let bands = RiskBands::default();
        assert_eq!(bands.classify(0.0), RiskLevel::Low);
        assert_eq!(bands.classify(0.199), RiskLevel::Low);
        assert_eq!(bands.classify(0.20), RiskLevel::Medium);
        assert_eq!(bands.classify(0.349), RiskLevel::Medium);
        assert_eq!(bands.classify(0.35), RiskLevel::High);
        assert_eq!(bands.classify(1.0), RiskLevel::High);
    }

    #[test]
    fn test_labels_and_colors() {
        assert_eq!(RiskLevel::Low.label(), "Low Risk");
        assert_eq!(RiskLevel::Medium.color(), "orange");
        assert_eq!(RiskLevel::High.to_string(), "High Risk");
        assert_eq!(serde_json::to_value(RiskLevel::High).unwrap(), "high");
    }

    #[test]
    fn test_bands_validation() {
        assert!(RiskBands::default().validate().is_ok());
        let inverted = RiskBands {
            low_below: 0.4,
            medium_below: 0.3,
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_sensitivity_resolve() {
        let range = SensitivityRange::default();
        assert_eq!(range.resolve(None), Ok(0.35));
        assert_eq!(range.resolve(Some(0.1)), Ok(0.1));
        assert_eq!(range.resolve(Some(0.5)), Ok(0.5));
        assert!(matches!(
            range.resolve(Some(0.55)),
            Err(FormError::SensitivityOutOfRange { .. })
        ));
        assert!(range.resolve(Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_sensitivity_validation() {
        assert!(SensitivityRange::default().validate().is_ok());
        let bad_default = SensitivityRange {
            default: 0.9,
            ..SensitivityRange::default()
        };
        assert!(bad_default.validate().is_err());
    }
}
