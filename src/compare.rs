// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tolerance-based comparison of reference and device outputs.

use std::fmt;

use serde::Serialize;

use crate::tensor::{TensorBuffer, TensorError};

/// Relative tolerance used by [`nearly_equal`].
pub const EPSILON: f32 = 1e-4;

/// Relative/absolute float comparison.
///
/// Exact equality (including equal infinities) always passes. Near zero the
/// difference is held to an absolute bound of `EPSILON * f32::MIN_POSITIVE`;
/// elsewhere the difference relative to `|a| + |b|` must stay below
/// `EPSILON`. NaN never compares equal.
pub fn nearly_equal(a: f32, b: f32) -> bool {
    if a == b {
        return true;
    }
    let abs_a = f64::from(a.abs());
    let abs_b = f64::from(b.abs());
    let diff = f64::from((a - b).abs());
    let eps = f64::from(EPSILON);
    let min_normal = f64::from(f32::MIN_POSITIVE);

    if a == 0.0 || b == 0.0 || diff < min_normal {
        diff < eps * min_normal
    } else {
        diff / (abs_a + abs_b).min(f64::from(f32::MAX)) < eps
    }
}

/// Relative error as reported in [`VerifyReport`].
///
/// `None` for pairs that [`nearly_equal`] judges by the absolute bound.
fn relative_error(expected: f32, actual: f32) -> Option<f64> {
    let diff = f64::from((expected - actual).abs());
    if diff == 0.0 {
        return Some(0.0);
    }
    if expected == 0.0 || actual == 0.0 || diff < f64::from(f32::MIN_POSITIVE) {
        return None;
    }
    let denom = (f64::from(expected.abs()) + f64::from(actual.abs())).min(f64::from(f32::MAX));
    Some(diff / denom)
}

/// How [`verify`] reacts to the first mismatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum CompareMode {
    /// Stop at the first mismatching element.
    #[default]
    FailFast,
    /// Scan the whole tensor and count every mismatch.
    CollectAll,
}

/// One disagreeing element, located by `(batch, depth, row, col)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Mismatch {
    pub batch: usize,
    pub depth: usize,
    pub row: usize,
    pub col: usize,
    pub expected: f32,
    pub actual: f32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} layer {} row {} col {}: expected {}, got {}",
            self.batch, self.depth, self.row, self.col, self.expected, self.actual
        )
    }
}

/// The device result disagrees with the reference.
#[derive(Clone, Debug, PartialEq, Serialize, thiserror::Error)]
#[error("results incorrect at {first}; {count} mismatching element(s)")]
pub struct VerificationFailed {
    pub first: Mismatch,
    /// Mismatches seen. Always 1 in [`CompareMode::FailFast`].
    pub count: usize,
}

/// Summary of a passing comparison.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    /// Worst relative error among pairs held to the relative bound.
    pub max_relative_error: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CompareError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Mismatch(#[from] VerificationFailed),
}

/// Compare `device` against `reference` element by element in
/// `(batch, depth, row, col)` order.
pub fn verify(
    reference: &TensorBuffer,
    device: &TensorBuffer,
    mode: CompareMode,
) -> Result<VerifyReport, CompareError> {
    device.expect_dims(reference.dims())?;
    let shape = reference.shape();

    let mut first: Option<Mismatch> = None;
    let mut count = 0usize;
    let mut max_relative_error = 0.0f64;

    for (flat, (&expected, &actual)) in reference
        .as_slice()
        .iter()
        .zip(device.as_slice())
        .enumerate()
    {
        if nearly_equal(expected, actual) {
            if let Some(err) = relative_error(expected, actual) {
                max_relative_error = max_relative_error.max(err);
            }
            continue;
        }
        count += 1;
        if first.is_none() {
            let [batch, depth, row, col] = shape.unravel(flat);
            first = Some(Mismatch {
                batch,
                depth,
                row,
                col,
                expected,
                actual,
            });
        }
        if mode == CompareMode::FailFast {
            break;
        }
    }

    match first {
        Some(first) => Err(VerificationFailed { first, count }.into()),
        None => Ok(VerifyReport {
            checked: reference.len(),
            max_relative_error,
        }),
    }
}
