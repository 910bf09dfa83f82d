//! Exposure adaptation from the fitted intensity floor.

use crate::fit::FitResult;
use tracing::debug;

/// Hardware ceiling of the camera exposure, milliseconds.
pub const MAX_EXPOSURE_MS: f64 = 15_000.0;

/// Derive the domain-capture exposure from a crossed-Nicols fit.
///
/// The fitted quadratic predicts the intensity at `offset_deg` from the
/// vertex (`intensity_floor + slope * offset^2`) at the scan exposure.
/// Measured intensity scales linearly with exposure time below sensor
/// saturation, so scaling the base exposure by
/// `floor(target_intensity / predicted)` brings the mean ROI intensity to
/// the configured target. The result clamps to the 15 s hardware ceiling; a
/// non-positive prediction (possible with a near-zero curvature and a noisy
/// floor) also clamps to the ceiling rather than dividing by it.
pub fn adapt(
    fit: &FitResult,
    offset_deg: f64,
    target_intensity: f64,
    base_exposure_ms: f64,
) -> f64 {
    let predicted = fit.intensity_at_offset(offset_deg);
    if predicted <= 0.0 {
        return MAX_EXPOSURE_MS;
    }
    let exposure = (target_intensity / predicted).floor() * base_exposure_ms;
    let clamped = exposure.min(MAX_EXPOSURE_MS);
    debug!(predicted, exposure = clamped, "adapted exposure");
    clamped
}
