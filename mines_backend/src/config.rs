use candid::{CandidType, Deserialize, Principal};
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use serde::Serialize;
use std::borrow::Cow;

use crate::error::MinesError;
use crate::types::{DEFAULT_MINES, GRID_SIZE, HOUSE_EDGE, PENDING_TIMEOUT_NS, STEP_CAP};

// =============================================================================
// GAME CONFIGURATION
// =============================================================================

/// Board and payout parameters for one session.
///
/// Editable only between rounds; a round freezes the values it started with.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct GameConfig {
    pub grid_size: u8,
    pub mine_count: u8,
    pub house_edge: f64, // 0.97 = 3% edge
    pub step_cap: u8,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_size: GRID_SIZE,
            mine_count: DEFAULT_MINES,
            house_edge: HOUSE_EDGE,
            step_cap: STEP_CAP,
        }
    }
}

impl GameConfig {
    pub fn new(grid_size: u8, mine_count: u8, house_edge: f64) -> Self {
        Self {
            grid_size,
            mine_count,
            house_edge,
            step_cap: STEP_CAP,
        }
    }

    pub fn with_mines(&self, mine_count: u8) -> Self {
        Self {
            mine_count,
            ..self.clone()
        }
    }

    pub fn safe_tiles(&self) -> u8 {
        self.grid_size - self.mine_count
    }

    pub fn validate(&self) -> Result<(), MinesError> {
        if self.grid_size == 0 {
            return Err(MinesError::config("grid must have at least one tile"));
        }
        if self.mine_count == 0 {
            return Err(MinesError::config("at least one mine is required"));
        }
        if self.mine_count >= self.grid_size {
            return Err(MinesError::config(format!(
                "{} mines do not fit on a {}-tile grid",
                self.mine_count, self.grid_size
            )));
        }
        if !self.house_edge.is_finite() || self.house_edge <= 0.0 || self.house_edge > 1.0 {
            return Err(MinesError::config(format!(
                "house edge factor {} must be in (0, 1]",
                self.house_edge
            )));
        }
        if self.step_cap == 0 {
            return Err(MinesError::config("step cap must be at least 1"));
        }
        Ok(())
    }
}

// =============================================================================
// CANISTER SETTINGS
// =============================================================================

#[derive(CandidType, Deserialize, Clone, Debug, Default)]
pub struct InitArgs {
    /// External balance ledger. `None` runs the canister in demo mode.
    pub ledger: Option<Principal>,
    pub default_config: Option<GameConfig>,
    pub pending_timeout_secs: Option<u64>,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Settings {
    pub ledger: Option<Principal>,
    pub default_config: GameConfig,
    pub pending_timeout_ns: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ledger: None,
            default_config: GameConfig::default(),
            pending_timeout_ns: PENDING_TIMEOUT_NS,
        }
    }
}

impl Settings {
    pub fn from_init(args: InitArgs) -> Result<Self, MinesError> {
        let default_config = args.default_config.unwrap_or_default();
        default_config.validate()?;

        let pending_timeout_ns = match args.pending_timeout_secs {
            Some(0) => return Err(MinesError::config("pending timeout must be positive")),
            Some(secs) => secs.saturating_mul(1_000_000_000),
            None => PENDING_TIMEOUT_NS,
        };

        Ok(Self {
            ledger: args.ledger,
            default_config,
            pending_timeout_ns,
        })
    }

    pub fn is_demo(&self) -> bool {
        self.ledger.is_none()
    }
}

impl Storable for Settings {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).expect("Settings serialize to JSON"))
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).unwrap_or_default()
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: 512,
        is_fixed_size: false,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.safe_tiles(), 22);
    }

    #[test]
    fn test_rejects_mines_filling_grid() {
        let err = GameConfig::new(25, 25, 0.97).validate().unwrap_err();
        assert!(matches!(err, MinesError::InvalidConfiguration(_)));
        assert!(GameConfig::new(25, 0, 0.97).validate().is_err());
        assert!(GameConfig::new(0, 0, 0.97).validate().is_err());
    }

    #[test]
    fn test_rejects_house_edge_out_of_range() {
        assert!(GameConfig::new(25, 3, 0.0).validate().is_err());
        assert!(GameConfig::new(25, 3, 1.01).validate().is_err());
        assert!(GameConfig::new(25, 3, f64::NAN).validate().is_err());
        assert!(GameConfig::new(25, 3, 1.0).validate().is_ok());
    }

    #[test]
    fn test_settings_from_init() {
        let settings = Settings::from_init(InitArgs::default()).unwrap();
        assert!(settings.is_demo());
        assert_eq!(settings.pending_timeout_ns, PENDING_TIMEOUT_NS);

        let settings = Settings::from_init(InitArgs {
            ledger: Some(Principal::anonymous()),
            default_config: Some(GameConfig::new(16, 2, 0.99)),
            pending_timeout_secs: Some(30),
        })
        .unwrap();
        assert!(!settings.is_demo());
        assert_eq!(settings.default_config.grid_size, 16);
        assert_eq!(settings.pending_timeout_ns, 30_000_000_000);

        let bad = InitArgs {
            default_config: Some(GameConfig::new(5, 5, 0.97)),
            ..Default::default()
        };
        assert!(Settings::from_init(bad).is_err());
    }

    #[test]
    fn test_settings_storable_roundtrip() {
        let settings = Settings::default();
        let bytes = settings.to_bytes();
        assert_eq!(Settings::from_bytes(bytes), settings);
    }
}
