//! Range assembler: project a piecewise-constant series onto a sampling grid.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ComputeError;
use crate::types::{BlockInfo, ComputationResult};

/// How to sample a computed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleGrid {
    /// One entry per piece, no resampling.
    Raw,
    /// One sample per `step` blocks across `[start, end]` heights.
    BlockStep { start: u64, end: u64, step: u64 },
    /// One sample per `step_ms` across `[start_ms, end_ms]` block times.
    TimeStep {
        start_ms: u64,
        end_ms: u64,
        step_ms: u64,
    },
}

/// One projected sample. `at` is the grid coordinate (a height for block
/// steps, a time for time steps, absent for the raw series); `block` is
/// the block the underlying piece was computed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSample {
    pub block: BlockInfo,
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<u64>,
}

/// Project `pieces` (ascending by block) onto the grid.
///
/// Sampling is left-closed, right-closed: both boundaries are emitted, and
/// a grid step that overshoots the end clamps to it, so a step `S` over
/// `[start, end]` yields `⌈(end − start)/S⌉ + 1` samples. Each sample
/// takes the value of the piece whose validity interval contains the
/// coordinate.
pub fn assemble_range(
    pieces: &[ComputationResult],
    grid: SampleGrid,
) -> Result<Vec<RangeSample>, ComputeError> {
    match grid {
        SampleGrid::Raw => Ok(pieces
            .iter()
            .map(|piece| RangeSample {
                block: piece.block,
                value: piece.value.clone(),
                at: None,
            })
            .collect()),
        SampleGrid::BlockStep { start, end, step } => {
            validate_grid(start, end, step)?;
            sample(pieces, start, end, step, |piece| piece.block.height)
        }
        SampleGrid::TimeStep {
            start_ms,
            end_ms,
            step_ms,
        } => {
            validate_grid(start_ms, end_ms, step_ms)?;
            sample(pieces, start_ms, end_ms, step_ms, |piece| {
                piece.block.time_unix_ms
            })
        }
    }
}

fn validate_grid(start: u64, end: u64, step: u64) -> Result<(), ComputeError> {
    if step == 0 {
        return Err(ComputeError::BadInput("step must be positive".into()));
    }
    if start > end {
        return Err(ComputeError::BadInput(format!(
            "grid start {start} is after grid end {end}"
        )));
    }
    Ok(())
}

/// Walk the grid and the pieces together. Both are ascending, so a single
/// forward cursor over the pieces suffices.
fn sample(
    pieces: &[ComputationResult],
    start: u64,
    end: u64,
    step: u64,
    coordinate: impl Fn(&ComputationResult) -> u64,
) -> Result<Vec<RangeSample>, ComputeError> {
    let mut samples = Vec::new();
    let mut index = 0usize;
    let mut at = start;
    loop {
        // Advance to the last piece starting at or before the coordinate.
        while index + 1 < pieces.len() && coordinate(&pieces[index + 1]) <= at {
            index += 1;
        }
        let piece = pieces
            .get(index)
            .filter(|piece| coordinate(piece) <= at)
            .ok_or_else(|| {
                ComputeError::BadInput(format!("no piece covers grid coordinate {at}"))
            })?;
        samples.push(RangeSample {
            block: piece.block,
            value: piece.value.clone(),
            at: Some(at),
        });

        if at == end {
            break;
        }
        at = (at + step).min(end);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn piece(height: u64, time: u64, value: i64, valid: u64) -> ComputationResult {
        ComputationResult {
            block: BlockInfo::new(height, time),
            value: Some(json!(value)),
            dependent_events: vec![],
            dependent_transformations: vec![],
            latest_block_height_valid: valid,
        }
    }

    fn series() -> Vec<ComputationResult> {
        vec![
            piece(10, 100, 1, 19),
            piece(20, 200, 2, 24),
            piece(25, 250, 3, 29),
            piece(30, 300, 4, 30),
        ]
    }

    #[test]
    fn raw_passthrough() {
        let samples = assemble_range(&series(), SampleGrid::Raw).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].at, None);
        assert_eq!(samples[2].value, Some(json!(3)));
    }

    #[test]
    fn block_step_samples_containing_piece() {
        let samples = assemble_range(
            &series(),
            SampleGrid::BlockStep {
                start: 10,
                end: 30,
                step: 10,
            },
        )
        .unwrap();
        let values: Vec<_> = samples.iter().map(|s| s.value.clone().unwrap()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(4)]);
        assert_eq!(
            samples.iter().map(|s| s.at.unwrap()).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
    }

    #[test]
    fn sample_count_matches_ceiling_rule() {
        // ⌈(25 − 10)/10⌉ + 1 = 3 samples; the overshooting step clamps to
        // the right boundary.
        let samples = assemble_range(
            &series(),
            SampleGrid::BlockStep {
                start: 10,
                end: 25,
                step: 10,
            },
        )
        .unwrap();
        assert_eq!(
            samples.iter().map(|s| s.at.unwrap()).collect::<Vec<_>>(),
            vec![10, 20, 25]
        );
        assert_eq!(samples[2].value, Some(json!(3)));
    }

    #[test]
    fn time_step_sampling() {
        let samples = assemble_range(
            &series(),
            SampleGrid::TimeStep {
                start_ms: 100,
                end_ms: 300,
                step_ms: 100,
            },
        )
        .unwrap();
        let values: Vec<_> = samples.iter().map(|s| s.value.clone().unwrap()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(4)]);
    }

    #[test]
    fn boundary_between_pieces_takes_containing_piece() {
        // Height 25 is the start of the third piece — ties resolve to the
        // piece whose interval contains the boundary.
        let samples = assemble_range(
            &series(),
            SampleGrid::BlockStep {
                start: 25,
                end: 25,
                step: 5,
            },
        )
        .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, Some(json!(3)));
    }

    #[test]
    fn start_before_first_piece_is_rejected() {
        let err = assemble_range(
            &series(),
            SampleGrid::BlockStep {
                start: 5,
                end: 30,
                step: 5,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ComputeError::BadInput(_)));
    }

    #[test]
    fn cached_anchor_before_range_start_serves_early_samples() {
        // The first piece may sit earlier than the grid start when it came
        // from the computation cache; its validity makes it the answer.
        let samples = assemble_range(
            &series(),
            SampleGrid::BlockStep {
                start: 15,
                end: 22,
                step: 7,
            },
        )
        .unwrap();
        assert_eq!(
            samples.iter().map(|s| s.at.unwrap()).collect::<Vec<_>>(),
            vec![15, 22]
        );
        assert_eq!(samples[0].value, Some(json!(1)));
        assert_eq!(samples[1].value, Some(json!(2)));
    }

    #[test]
    fn invalid_grids_rejected() {
        let err = assemble_range(
            &series(),
            SampleGrid::BlockStep {
                start: 10,
                end: 30,
                step: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ComputeError::BadInput(_)));

        let err = assemble_range(
            &series(),
            SampleGrid::BlockStep {
                start: 30,
                end: 10,
                step: 5,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ComputeError::BadInput(_)));
    }
}
