//! Least-squares quadratic fit for the crossed-Nicols intensity curve.
//!
//! Transmitted intensity near extinction is modeled as
//! `I(theta) = a * (theta - b)^2 + c`; the vertex `b` is the extinction
//! angle, `c` the intensity floor and `a` the curvature. The fit minimizes
//! the sum of squared residuals with Levenberg-Marquardt over an analytic
//! Jacobian.

use crate::error::{AppResult, PolarError};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

/// Fitted crossed-Nicols parameters for one polarizer angle.
///
/// Immutable once produced; consumed by the exposure adapter and the
/// domain-capture offset computation. `vertex_angle` is in degrees with
/// mod-360 semantics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub slope: f64,
    pub vertex_angle: f64,
    pub intensity_floor: f64,
}

impl FitResult {
    /// Expected intensity at an angular offset from the vertex.
    pub fn intensity_at_offset(&self, offset_deg: f64) -> f64 {
        self.intensity_floor + self.slope * offset_deg * offset_deg
    }
}

struct QuadraticProblem {
    angles: Vec<f64>,
    intensities: Vec<f64>,
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for QuadraticProblem {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let (a, b, c) = (self.params[0], self.params[1], self.params[2]);
        Some(DVector::from_iterator(
            self.angles.len(),
            self.angles
                .iter()
                .zip(&self.intensities)
                .map(|(&theta, &y)| a * (theta - b) * (theta - b) + c - y),
        ))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let (a, b) = (self.params[0], self.params[1]);
        let mut jac = DMatrix::zeros(self.angles.len(), 3);
        for (row, &theta) in self.angles.iter().enumerate() {
            let d = theta - b;
            jac[(row, 0)] = d * d;
            jac[(row, 1)] = -2.0 * a * d;
            jac[(row, 2)] = 1.0;
        }
        Some(jac)
    }
}

/// Fit `a * (theta - b)^2 + c` to the recorded sweep.
///
/// The initial guess seeds `a = 1`, `b = window_start + 2` (the window
/// center) and `c = min(intensities)`. A perfectly flat response converges to
/// `a` near zero; callers must tolerate a near-zero curvature without
/// dividing by it.
///
/// # Errors
/// [`PolarError::FitDegenerate`] when fewer than three samples are supplied,
/// the solver fails to converge, or any parameter is non-finite.
pub fn fit_quadratic(angles: &[f64], intensities: &[f64], window_start: f64) -> AppResult<FitResult> {
    if angles.len() != intensities.len() || angles.len() < 3 {
        return Err(PolarError::FitDegenerate(format!(
            "need at least 3 paired samples, got {} angles / {} intensities",
            angles.len(),
            intensities.len()
        )));
    }

    let floor_guess = intensities.iter().copied().fold(f64::INFINITY, f64::min);
    let problem = QuadraticProblem {
        angles: angles.to_vec(),
        intensities: intensities.to_vec(),
        params: DVector::from_vec(vec![1.0, window_start + 2.0, floor_guess]),
    };

    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    let params = problem.params();

    if !report.termination.was_successful() {
        return Err(PolarError::FitDegenerate(format!(
            "solver terminated with {:?}",
            report.termination
        )));
    }
    if !params.iter().all(|v| v.is_finite()) {
        return Err(PolarError::FitDegenerate(
            "fit produced non-finite parameters".into(),
        ));
    }

    Ok(FitResult {
        slope: params[0],
        vertex_angle: params[1],
        intensity_floor: params[2],
    })
}
