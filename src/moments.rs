//! Gaussian moment summaries and the variance propagation rules used by
//! every stage.
//!
//! Estimates are treated as independent: `Var(aX + bY) = a²Var(X) + b²Var(Y)`
//! and `Var(cX) = c²Var(X)` for a fixed scalar `c`. Variances are summed in
//! [`Moments`]; the square root is taken once, when converting back to an
//! [`Estimate`].

use std::ops::{Add, Neg, Sub};

/// z-score of the two-sided 95% normal interval.
pub const Z95: f64 = 1.96;

/// Mean and standard deviation as reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub mean: f64,
    pub stdev: f64,
}

impl Estimate {
    pub fn new(mean: f64, stdev: f64) -> Self {
        Self { mean, stdev }
    }

    pub fn moments(self) -> Moments {
        Moments::new(self.mean, self.stdev * self.stdev)
    }

    /// Lower and upper bound of the normal interval `mean ± z·stdev`.
    pub fn interval(self, z: f64) -> (f64, f64) {
        (self.mean - z * self.stdev, self.mean + z * self.stdev)
    }
}

/// Mean and variance; the additive form used during propagation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub mean: f64,
    pub variance: f64,
}

impl Moments {
    pub const ZERO: Moments = Moments {
        mean: 0.0,
        variance: 0.0,
    };

    pub fn new(mean: f64, variance: f64) -> Self {
        Self { mean, variance }
    }

    /// A value known exactly.
    pub fn exact(mean: f64) -> Self {
        Self::new(mean, 0.0)
    }

    /// `c·X` with `c` held fixed.
    pub fn scale(self, c: f64) -> Self {
        Self::new(self.mean * c, self.variance * c * c)
    }

    /// `X / r` with `r` held fixed. Returns `None` for a zero or non-finite divisor.
    pub fn divide(self, r: f64) -> Option<Self> {
        if r == 0.0 || !r.is_finite() {
            return None;
        }
        Some(self.scale(1.0 / r))
    }

    pub fn stdev(self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    pub fn estimate(self) -> Estimate {
        Estimate::new(self.mean, self.stdev())
    }
}

impl Add for Moments {
    type Output = Moments;

    fn add(self, rhs: Moments) -> Moments {
        Moments::new(self.mean + rhs.mean, self.variance + rhs.variance)
    }
}

impl Sub for Moments {
    type Output = Moments;

    fn sub(self, rhs: Moments) -> Moments {
        Moments::new(self.mean - rhs.mean, self.variance + rhs.variance)
    }
}

impl Neg for Moments {
    type Output = Moments;

    fn neg(self) -> Moments {
        Moments::new(-self.mean, self.variance)
    }
}

impl std::iter::Sum for Moments {
    fn sum<I: Iterator<Item = Moments>>(iter: I) -> Moments {
        iter.fold(Moments::ZERO, |acc, m| acc + m)
    }
}

/// How a stage resolves an absent input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    /// Absent stays absent; any derived value is absent too.
    Propagate,
    /// Absent is read as an exact zero.
    Zero,
}

impl FillPolicy {
    pub fn resolve(self, value: Option<Moments>) -> Option<Moments> {
        match (self, value) {
            (_, Some(m)) => Some(m),
            (FillPolicy::Propagate, None) => None,
            (FillPolicy::Zero, None) => Some(Moments::ZERO),
        }
    }
}

/// Count-aware sum: absent members are skipped, the result is absent only
/// when every member is absent.
pub fn sum_present<I>(values: I) -> Option<Moments>
where
    I: IntoIterator<Item = Option<Moments>>,
{
    values
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<Moments>, m| {
            Some(acc.map_or(m, |a| a + m))
        })
}

/// `a - b` where either side may be absent.
pub fn difference(a: Option<Moments>, b: Option<Moments>, policy: FillPolicy) -> Option<Moments> {
    Some(policy.resolve(a)? - policy.resolve(b)?)
}

/// Relative deviation of `actual` from `expected`, safe around zero.
pub fn relative_gap(expected: f64, actual: f64) -> f64 {
    let scale = expected.abs().max(actual.abs()).max(1.0);
    (expected - actual).abs() / scale
}
