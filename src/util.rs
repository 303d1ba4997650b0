use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;

/// Seeded generator when a seed is configured, entropy-seeded otherwise.
pub fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Rounds half-way cases to the even neighbour, the way numpy does.
pub fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - x.signum()
    } else {
        rounded
    }
}

/// Clips `x` into `[min, max]` and rounds it to an integer position. NaN lands on `min`.
pub fn slot(x: f64, min: f64, max: f64) -> f64 {
    debug_assert!(min < max);
    round_half_even(x.max(min).min(max))
}

#[cfg(test)]
mod tests {
    use super::{round_half_even, slot};
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_round_half_even() {
        assert_approx_eq!(round_half_even(2.5), 2.0);
        assert_approx_eq!(round_half_even(3.5), 4.0);
        assert_approx_eq!(round_half_even(2.6), 3.0);
        assert_approx_eq!(round_half_even(2.4), 2.0);
        assert_approx_eq!(round_half_even(-2.5), -2.0);
        assert_approx_eq!(round_half_even(-3.5), -4.0);
    }

    #[test]
    fn test_slot() {
        assert_approx_eq!(slot(-4.0, 1.0, 20.0), 1.0);
        assert_approx_eq!(slot(37.2, 1.0, 20.0), 20.0);
        assert_approx_eq!(slot(7.4, 1.0, 20.0), 7.0);
        assert_approx_eq!(slot(f64::NAN, 1.0, 20.0), 1.0);
        assert_approx_eq!(slot(f64::INFINITY, 1.0, 20.0), 20.0);
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[derive(Debug, Default)]
pub struct Accuracy {
    len: u32,
    correct: u32,
    skipped: u32,
    error: f64,
    abs_error: f64,
}

impl Accuracy {
    pub fn record(&mut self, expected: f64, actual: f64) {
        self.len += 1;
        if (expected - actual).abs() <= 0.5 {
            self.correct += 1;
        }
        self.error += (actual - expected).powi(2);
        self.abs_error += (actual - expected).abs();
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    pub fn correct(&self) -> u32 {
        self.correct
    }

    pub fn mse(&self) -> f64 {
        self.error / f64::from(self.len)
    }

    pub fn mae(&self) -> f64 {
        self.abs_error / f64::from(self.len)
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 0 {
            return write!(f, "no rows evaluated, skipped: {}", self.skipped);
        }
        write!(
            f,
            "rows: {}, skipped: {}, within 0.5: {:.4}, mse: {:.4}, mae: {:.4}",
            self.len,
            self.skipped,
            f64::from(self.correct) / f64::from(self.len),
            self.mse(),
            self.mae()
        )
    }
}

#[cfg(test)]
#[test]
fn test_accuracy() {
    use assert_approx_eq::assert_approx_eq;

    let mut accuracy = Accuracy::default();
    accuracy.record(25.0, 25.3);
    accuracy.record(0.0, 2.0);
    accuracy.skip();
    assert_eq!(accuracy.len(), 2);
    assert_approx_eq!(accuracy.mse(), (0.09 + 4.0) / 2.0);
    assert_approx_eq!(accuracy.mae(), 1.15);
    assert_eq!(
        accuracy.to_string(),
        "rows: 2, skipped: 1, within 0.5: 0.5000, mse: 2.0450, mae: 1.1500"
    );
}
