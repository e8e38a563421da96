use crate::error::MinesError;
use crate::types::STEP_CAP;

// =============================================================================
// MULTIPLIER SEQUENCE
// =============================================================================

/// Payout multipliers for each successive safe reveal, capped at `STEP_CAP` steps.
pub fn generate(grid_size: u8, mine_count: u8, house_edge: f64) -> Result<Vec<f64>, MinesError> {
    generate_capped(grid_size, mine_count, house_edge, STEP_CAP)
}

/// Fair odds of surviving each reveal, scaled by `house_edge` and accumulated.
///
/// Step `i` (1-based) survives with probability
/// `(grid - mines - (i-1)) / (grid - (i-1))`, since every earlier safe tile has
/// already left the pool. The running product is never rounded.
pub fn generate_capped(
    grid_size: u8,
    mine_count: u8,
    house_edge: f64,
    step_cap: u8,
) -> Result<Vec<f64>, MinesError> {
    if grid_size == 0 {
        return Err(MinesError::config("grid must have at least one tile"));
    }
    if mine_count >= grid_size {
        return Err(MinesError::config(format!(
            "{} mines do not fit on a {}-tile grid",
            mine_count, grid_size
        )));
    }
    if !house_edge.is_finite() || house_edge <= 0.0 || house_edge > 1.0 {
        return Err(MinesError::config(format!(
            "house edge factor {} must be in (0, 1]",
            house_edge
        )));
    }

    let grid = grid_size as f64;
    let safe = (grid_size - mine_count) as f64;
    let steps = (grid_size - mine_count).min(step_cap);

    let mut multiplier = 1.0;
    let mut sequence = Vec::with_capacity(steps as usize);
    for i in 0..steps {
        let prior = i as f64;
        let survive = (safe - prior) / (grid - prior);
        multiplier *= house_edge / survive;
        sequence.push(multiplier);
    }

    Ok(sequence)
}

/// Multiplier after `revealed` safe reveals; past the cap the last entry applies.
pub fn multiplier_at(sequence: &[f64], revealed: usize) -> Option<f64> {
    if revealed == 0 || sequence.is_empty() {
        return None;
    }
    let idx = (revealed - 1).min(sequence.len() - 1);
    Some(sequence[idx])
}

/// Quote a payout in ledger units. This is the single rounding point.
pub fn payout(bet_amount: u64, multiplier: f64) -> u64 {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return 0;
    }
    let raw = (bet_amount as f64 * multiplier).floor();
    if raw >= u64::MAX as f64 {
        u64::MAX
    } else {
        raw as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_multiplier_three_mines() {
        let seq = generate(25, 3, 0.97).unwrap();
        let expected = 0.97 / (22.0 / 25.0);
        assert!((seq[0] - expected).abs() < 1e-12);
        assert!((seq[0] - 1.1023).abs() < 1e-4);
    }

    #[test]
    fn test_matches_fair_odds_product() {
        // 5 mines, 3 reveals: 25/20 * 24/19 * 23/18 * edge^3
        let seq = generate(25, 5, 0.99).unwrap();
        let expected = (25.0 / 20.0) * (24.0 / 19.0) * (23.0 / 18.0) * 0.99f64.powi(3);
        assert!((seq[2] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_length_is_capped() {
        assert_eq!(generate(25, 1, 0.97).unwrap().len(), 20);
        assert_eq!(generate(25, 3, 0.97).unwrap().len(), 20);
        assert_eq!(generate(25, 5, 0.97).unwrap().len(), 20);
        assert_eq!(generate(25, 10, 0.97).unwrap().len(), 15);
        assert_eq!(generate(25, 24, 0.97).unwrap().len(), 1);
        assert_eq!(generate_capped(25, 3, 0.97, 25).unwrap().len(), 22);
    }

    #[test]
    fn test_last_step_of_full_board() {
        // 24 mines: one safe tile, survive with 1/25
        let seq = generate(25, 24, 0.97).unwrap();
        assert!((seq[0] - 0.97 * 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_mines_is_pure_edge() {
        let seq = generate_capped(4, 0, 0.5, 4).unwrap();
        assert_eq!(seq, vec![0.5, 0.25, 0.125, 0.0625]);
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(matches!(generate(25, 25, 0.97), Err(MinesError::InvalidConfiguration(_))));
        assert!(matches!(generate(25, 30, 0.97), Err(MinesError::InvalidConfiguration(_))));
        assert!(generate(0, 0, 0.97).is_err());
        assert!(generate(25, 3, 0.0).is_err());
        assert!(generate(25, 3, 1.5).is_err());
    }

    #[test]
    fn test_multiplier_at_clamps() {
        let seq = vec![1.1, 1.2, 1.3];
        assert_eq!(multiplier_at(&seq, 0), None);
        assert_eq!(multiplier_at(&seq, 1), Some(1.1));
        assert_eq!(multiplier_at(&seq, 3), Some(1.3));
        assert_eq!(multiplier_at(&seq, 7), Some(1.3));
        assert_eq!(multiplier_at(&[], 1), None);
    }

    #[test]
    fn test_payout_floors_once() {
        assert_eq!(payout(1_000, 1.1023), 1_102);
        assert_eq!(payout(1_000, 0.0), 0);
        assert_eq!(payout(1_000, f64::NAN), 0);
        assert_eq!(payout(u64::MAX, 2.0), u64::MAX);
    }

    proptest! {
        #[test]
        fn prop_length_and_strictly_increasing(mines in 1u8..25, edge in 0.97f64..=1.0) {
            let seq = generate(25, mines, edge).unwrap();
            prop_assert_eq!(seq.len(), (25 - mines).min(STEP_CAP) as usize);
            for pair in seq.windows(2) {
                prop_assert!(pair[1] > pair[0]);
            }
            prop_assert!(seq[0] > 1.0);
        }

        #[test]
        fn prop_any_grid_length(grid in 1u8..=64, mines_frac in 0.0f64..1.0, cap in 1u8..=40) {
            let mines = ((grid as f64) * mines_frac) as u8;
            let mines = mines.min(grid - 1);
            let seq = generate_capped(grid, mines, 0.97, cap).unwrap();
            prop_assert_eq!(seq.len(), (grid - mines).min(cap) as usize);
            prop_assert!(seq.iter().all(|m| m.is_finite() && *m > 0.0));
        }
    }
}
