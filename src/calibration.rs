//! moisture sensor calibration: analog voltage -> soil moisture percent

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("dry and wet voltages must differ (both {0} V)")]
    Degenerate(f64),
    #[error("calibration voltages must be finite")]
    NonFinite,
}

/// dry/wet reference voltages defining 0% and 100% moisture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    dry_voltage: f64,
    wet_voltage: f64,
}

impl Calibration {
    pub fn new(dry_voltage: f64, wet_voltage: f64) -> Result<Self, CalibrationError> {
        if !dry_voltage.is_finite() || !wet_voltage.is_finite() {
            return Err(CalibrationError::NonFinite);
        }
        if dry_voltage == wet_voltage {
            return Err(CalibrationError::Degenerate(dry_voltage));
        }
        Ok(Self { dry_voltage, wet_voltage })
    }

    pub fn dry_voltage(&self) -> f64 {
        self.dry_voltage
    }

    pub fn wet_voltage(&self) -> f64 {
        self.wet_voltage
    }

    pub fn percent(&self, voltage: f64) -> u8 {
        voltage_to_percent(voltage, self.dry_voltage, self.wet_voltage)
    }
}

/// Linear interpolation between the dry and wet voltages, clamped to
/// `[0, 100]` and truncated. NaN maps to 0.
pub fn voltage_to_percent(voltage: f64, dry_voltage: f64, wet_voltage: f64) -> u8 {
    let percent = (voltage - dry_voltage) / (wet_voltage - dry_voltage) * 100.0;
    if percent.is_nan() {
        return 0;
    }
    percent.clamp(0.0, 100.0) as u8
}
