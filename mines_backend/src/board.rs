use std::collections::BTreeSet;

use crate::error::MinesError;
use crate::rng::RngProvider;

/// Place `mine_count` distinct mines on a `grid_size` board.
///
/// Draws uniform indices and drops repeats until the set is full, which leaves
/// every combination of positions equally likely.
pub fn place<R: RngProvider>(
    grid_size: u8,
    mine_count: u8,
    rng: &mut R,
) -> Result<BTreeSet<u8>, MinesError> {
    if mine_count >= grid_size {
        return Err(MinesError::config(format!(
            "{} mines do not fit on a {}-tile grid",
            mine_count, grid_size
        )));
    }

    let mut mines = BTreeSet::new();
    while mines.len() < mine_count as usize {
        let position = rng.next_int(grid_size as u32) as u8;
        mines.insert(position);
    }
    Ok(mines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    struct ChaCha(ChaCha8Rng);

    impl RngProvider for ChaCha {
        fn next_int(&mut self, bound: u32) -> u32 {
            if bound == 0 {
                return 0;
            }
            self.0.next_u32() % bound
        }
    }

    /// Replays a fixed script, then repeats its last value.
    struct Scripted(Vec<u32>, usize);

    impl RngProvider for Scripted {
        fn next_int(&mut self, bound: u32) -> u32 {
            let value = self.0[self.1.min(self.0.len() - 1)];
            self.1 += 1;
            value % bound
        }
    }

    #[test]
    fn test_ten_thousand_boards_exact_and_distinct() {
        let mut rng = ChaCha(ChaCha8Rng::seed_from_u64(42));
        for _ in 0..10_000 {
            let mines = place(25, 3, &mut rng).unwrap();
            assert_eq!(mines.len(), 3);
            assert!(mines.iter().all(|&m| m < 25));
        }
    }

    #[test]
    fn test_duplicates_are_redrawn() {
        let mut rng = Scripted(vec![4, 4, 4, 9, 4, 17], 0);
        let mines = place(25, 3, &mut rng).unwrap();
        assert_eq!(mines.into_iter().collect::<Vec<_>>(), vec![4, 9, 17]);
        assert_eq!(rng.1, 6);
    }

    #[test]
    fn test_fails_fast_without_drawing() {
        let mut rng = Scripted(vec![0], 0);
        assert!(matches!(place(25, 25, &mut rng), Err(MinesError::InvalidConfiguration(_))));
        assert!(place(3, 4, &mut rng).is_err());
        assert_eq!(rng.1, 0);
    }

    #[test]
    fn test_every_position_gets_mined() {
        let mut rng = ChaCha(ChaCha8Rng::seed_from_u64(7));
        let mut counts = [0u32; 25];
        let trials = 20_000;
        for _ in 0..trials {
            for m in place(25, 3, &mut rng).unwrap() {
                counts[m as usize] += 1;
            }
        }
        // Each tile is a mine with probability 3/25
        let expected = trials as f64 * 3.0 / 25.0;
        for count in counts {
            assert!((count as f64 - expected).abs() / expected < 0.1);
        }
    }

    #[test]
    fn test_nearly_full_board() {
        let mut rng = ChaCha(ChaCha8Rng::seed_from_u64(1));
        let mines = place(25, 24, &mut rng).unwrap();
        assert_eq!(mines.len(), 24);
    }

    proptest::proptest! {
        #[test]
        fn prop_exact_count_in_range(seed in proptest::prelude::any::<u64>(), grid in 1u8..=64, frac in 0.0f64..1.0) {
            let mine_count = ((grid as f64 * frac) as u8).min(grid - 1);
            let mut rng = ChaCha(ChaCha8Rng::seed_from_u64(seed));
            let mines = place(grid, mine_count, &mut rng).unwrap();
            proptest::prop_assert_eq!(mines.len(), mine_count as usize);
            proptest::prop_assert!(mines.iter().all(|&m| m < grid));
        }
    }
}
