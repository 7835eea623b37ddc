//! Story point ↔ duration table.
//!
//! The table is the single authority for which `storyPoint`/`originalEstimate`
//! pairs are valid. Parent tasks are the only place a duration is rounded to
//! a point value.

use super::error::MappingError;
use crate::model::estimate::Estimate;

pub const POINT_TABLE: [(u32, Estimate); 7] = [
    (1, Estimate::from_hours(1)),
    (3, Estimate::from_hours(3)),
    (5, Estimate::from_hours(5)),
    (8, Estimate::from_hours(8)),
    (13, Estimate::from_hours(13)),
    (20, Estimate::from_hours(20)),
    (40, Estimate::from_hours(40)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    /// Closest table entry; a duration exactly between two entries takes the larger.
    Nearest,
}

pub fn points_to_estimate(points: u32) -> Result<Estimate, MappingError> {
    POINT_TABLE
        .iter()
        .find(|(p, _)| *p == points)
        .map(|(_, e)| *e)
        .ok_or(MappingError::UnknownPoints(points))
}

pub fn estimate_to_points(estimate: Estimate, mode: MatchMode) -> Result<u32, MappingError> {
    match mode {
        MatchMode::Exact => POINT_TABLE
            .iter()
            .find(|(_, e)| *e == estimate)
            .map(|(p, _)| *p)
            .ok_or(MappingError::UnknownEstimate(estimate)),
        MatchMode::Nearest => Ok(nearest_points(estimate)),
    }
}

fn nearest_points(estimate: Estimate) -> u32 {
    let target = estimate.minutes();
    let mut best = POINT_TABLE[0];
    for entry in POINT_TABLE.iter().skip(1) {
        // Ascending table: `<=` lets the larger entry win a tie.
        if entry.1.minutes().abs_diff(target) <= best.1.minutes().abs_diff(target) {
            best = *entry;
        }
    }
    best.0
}

/// Check a leaf pair. Both absent is accepted; one without the other is not.
pub fn check_pair(estimate: Option<Estimate>, points: Option<u32>) -> Result<(), MappingError> {
    match (estimate, points) {
        (None, None) => Ok(()),
        (Some(estimate), Some(points)) => {
            let expected = points_to_estimate(points)?;
            if expected == estimate {
                Ok(())
            } else {
                Err(MappingError::Mismatch {
                    estimate,
                    points,
                    expected,
                })
            }
        }
        _ => Err(MappingError::Incomplete),
    }
}
