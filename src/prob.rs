//! Checked arithmetic on bounded probabilities.
//!
//! Every function here takes values that are already known to lie in
//! `[0, 1]` and returns a value in the same interval. The only way to build
//! a [`Prob`] is through [`Prob::new`], which is also the guard against an
//! out-of-range number leaking in from elsewhere in the kernel.

use std::fmt::{self, Display};

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone, Copy, PartialEq)]
pub enum ProbError {
    #[error("probability {0} lies outside [0, 1]")]
    #[diagnostic(code(biokernel::prob::out_of_range))]
    OutOfRange(f64),

    #[error("probability is not a number")]
    #[diagnostic(code(biokernel::prob::nan))]
    NotANumber,
}

/// A real number in the closed interval `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Prob(f64);

impl Prob {
    pub const ZERO: Prob = Prob(0.0);
    pub const ONE: Prob = Prob(1.0);

    pub fn new(value: f64) -> Result<Prob, ProbError> {
        if value.is_nan() {
            Err(ProbError::NotANumber)
        } else if !(0.0..=1.0).contains(&value) {
            Err(ProbError::OutOfRange(value))
        } else {
            Ok(Prob(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Prob {
    type Error = ProbError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Prob::new(value)
    }
}

impl Display for Prob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render(self.0))
    }
}

/// Renders a probability so that it lexes back as a probability literal:
/// whole numbers keep a trailing `.0`.
pub fn render(p: f64) -> String {
    if p == p.trunc() {
        format!("{p}.0")
    } else {
        format!("{p}")
    }
}

pub fn prob_mul(p: Prob, q: Prob) -> Prob {
    Prob(p.0 * q.0)
}

/// Saturating sum: `min(p + q, 1)`.
pub fn prob_add(p: Prob, q: Prob) -> Prob {
    Prob((p.0 + q.0).min(1.0))
}

pub fn prob_complement(p: Prob) -> Prob {
    Prob(1.0 - p.0)
}

pub fn prob_min(p: Prob, q: Prob) -> Prob {
    Prob(p.0.min(q.0))
}

pub fn prob_max(p: Prob, q: Prob) -> Prob {
    Prob(p.0.max(q.0))
}

/// Confidence of a value computed from two independently obtained inputs.
///
/// Multiplication encodes an independence assumption between the two
/// confidences. Changing this changes every `fuzzy_combine` and `fuzzy_bind`.
pub fn confidence_combine(c1: Prob, c2: Prob) -> Prob {
    prob_mul(c1, c2)
}
