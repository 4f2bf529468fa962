// src/quantity.rs
use thiserror::Error;

/// Divisor converting `area * hiding_power * layers` into paint quantity units.
pub const COVERAGE_SCALE: f64 = 1000.0;

#[derive(Error, Debug, PartialEq)]
pub enum QuantityError {
    #[error("invalid area: {0}, must be greater than zero")]
    InvalidArea(f64),
    #[error("invalid layer count: {0}, must be greater than zero")]
    InvalidLayers(i32),
}

pub fn calculate(hiding_power: f64, area: f64, layers: i32) -> Result<f64, QuantityError> {
    // `!(area > 0.0)` also rejects NaN.
    if !(area > 0.0) {
        return Err(QuantityError::InvalidArea(area));
    }
    if layers <= 0 {
        return Err(QuantityError::InvalidLayers(layers));
    }
    Ok(area * hiding_power * f64::from(layers) / COVERAGE_SCALE)
}

/// Quantity stored with a freshly added or edited line. Lines may be saved
/// before the area is known, in which case the placeholder is zero.
pub fn provisional(hiding_power: f64, area: f64, layers: i32) -> f64 {
    calculate(hiding_power, area, layers).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn follows_the_coverage_formula() {
        assert!(approx(calculate(1.5, 20.0, 2).unwrap(), 0.06));
        assert!(approx(calculate(2.0, 1000.0, 1).unwrap(), 2.0));
        assert!(approx(calculate(0.0, 35.5, 3).unwrap(), 0.0));

        for (hp, area, layers) in [(0.25, 12.5, 4), (3.0, 0.1, 1), (1.0, 250.0, 7)] {
            let expected = area * hp * f64::from(layers) / 1000.0;
            assert!(approx(calculate(hp, area, layers).unwrap(), expected));
        }
    }

    #[test]
    fn rejects_non_positive_area() {
        assert_eq!(calculate(1.5, 0.0, 2), Err(QuantityError::InvalidArea(0.0)));
        assert_eq!(calculate(1.5, -3.0, 2), Err(QuantityError::InvalidArea(-3.0)));
        assert!(calculate(1.5, f64::NAN, 2).is_err());
    }

    #[test]
    fn rejects_non_positive_layers() {
        assert_eq!(calculate(1.5, 10.0, 0), Err(QuantityError::InvalidLayers(0)));
        assert_eq!(calculate(1.5, 10.0, -1), Err(QuantityError::InvalidLayers(-1)));
    }

    #[test]
    fn provisional_falls_back_to_zero() {
        assert_eq!(provisional(1.5, 0.0, 2), 0.0);
        assert!(approx(provisional(1.5, 20.0, 2), 0.06));
    }
}
