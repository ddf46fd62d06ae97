//! Per-axis rescaling of projected coordinates.

use crate::error::{ExplorerError, ExplorerResult};

/// Linearly maps each axis of `coords` (rows of `components` values) onto `[lo, hi]`.
///
/// Axes are scaled independently. An axis with no spread collapses to the
/// midpoint of the range.
pub fn rescale_axes(coords: &mut [f32], components: usize, range: [f32; 2]) -> ExplorerResult<()> {
    let [lo, hi] = range;
    if !(lo.is_finite() && hi.is_finite() && lo < hi) {
        return Err(ExplorerError::Configuration {
            reason: format!("projection.rescale must be an increasing finite range, got [{lo}, {hi}]"),
        });
    }
    if components == 0 || coords.is_empty() {
        return Ok(());
    }

    for axis in 0..components {
        let (min, max) = coords
            .iter()
            .skip(axis)
            .step_by(components)
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &v| (min.min(v), max.max(v)));
        let extent = max - min;

        for value in coords.iter_mut().skip(axis).step_by(components) {
            *value = if extent > f32::EPSILON {
                lo + (*value - min) / extent * (hi - lo)
            } else {
                (lo + hi) / 2.0
            };
        }
    }
    Ok(())
}
