//! Surge Cards
//!
//! A player may select one surge card per round. The card is folded into a
//! `SurgeModifiers` set once, at round start, and that set applies unchanged
//! to every turn of the round.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Selectable per-round modifier card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum SurgeCard {
    /// +30% outgoing damage.
    Fury = 1,
    /// -30% incoming damage.
    Bulwark = 2,
    /// Heal for 30% of damage dealt.
    Leech = 3,
    /// Burn opponent energy on each landed hit.
    Drain = 4,
    /// Steal opponent energy on each landed hit.
    Siphon = 5,
    /// A landed special stuns the opponent.
    Concussion = 6,
    /// Opponent's block does not absorb.
    Breaker = 7,
    /// Absorbed attacks are partially reflected.
    Mirror = 8,
    /// Part of all damage received is returned.
    Thorns = 9,
    /// Landed punches and kicks hit twice.
    TwinStrike = 10,
}

/// Unknown surge selector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurgeError {
    /// Code outside 1..=10.
    #[error("invalid surge card code {0}")]
    InvalidCode(u8),
    /// Identifier not recognised.
    #[error("unknown surge card '{0}'")]
    UnknownId(String),
}

impl SurgeCard {
    /// Every card in code order.
    pub const ALL: [SurgeCard; 10] = [
        SurgeCard::Fury,
        SurgeCard::Bulwark,
        SurgeCard::Leech,
        SurgeCard::Drain,
        SurgeCard::Siphon,
        SurgeCard::Concussion,
        SurgeCard::Breaker,
        SurgeCard::Mirror,
        SurgeCard::Thorns,
        SurgeCard::TwinStrike,
    ];

    /// Commitment code (1..=10).
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Commitment code for an optional selection; 0 means none.
    pub fn selector(card: Option<SurgeCard>) -> u8 {
        card.map(SurgeCard::code).unwrap_or(0)
    }

    /// Decode a non-zero commitment code.
    pub fn from_code(code: u8) -> Result<Self, SurgeError> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .ok_or(SurgeError::InvalidCode(code))
    }

    /// Wire identifier.
    pub const fn id(self) -> &'static str {
        match self {
            SurgeCard::Fury => "fury",
            SurgeCard::Bulwark => "bulwark",
            SurgeCard::Leech => "leech",
            SurgeCard::Drain => "drain",
            SurgeCard::Siphon => "siphon",
            SurgeCard::Concussion => "concussion",
            SurgeCard::Breaker => "breaker",
            SurgeCard::Mirror => "mirror",
            SurgeCard::Thorns => "thorns",
            SurgeCard::TwinStrike => "twin-strike",
        }
    }

    /// Fold this card into a modifier set.
    pub const fn modifiers(self) -> SurgeModifiers {
        let base = SurgeModifiers::NEUTRAL;
        match self {
            SurgeCard::Fury => SurgeModifiers { damage_pct: 130, ..base },
            SurgeCard::Bulwark => SurgeModifiers { damage_reduction_pct: 30, ..base },
            SurgeCard::Leech => SurgeModifiers { lifesteal_pct: 30, ..base },
            SurgeCard::Drain => SurgeModifiers { energy_burn: 15, ..base },
            SurgeCard::Siphon => SurgeModifiers { energy_steal: 10, ..base },
            SurgeCard::Concussion => SurgeModifiers { stun_on_special: true, ..base },
            SurgeCard::Breaker => SurgeModifiers { disable_opponent_block: true, ..base },
            SurgeCard::Mirror => SurgeModifiers { reflect_pct: 50, ..base },
            SurgeCard::Thorns => SurgeModifiers { thorns_pct: 25, ..base },
            SurgeCard::TwinStrike => SurgeModifiers { double_hit: true, ..base },
        }
    }
}

impl fmt::Display for SurgeCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SurgeCard {
    type Err = SurgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.id() == wanted)
            .ok_or_else(|| SurgeError::UnknownId(s.to_string()))
    }
}

/// Per-round modifier set for one fighter.
///
/// Percentages are integers; the combat engine multiplies them together and
/// floors once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurgeModifiers {
    /// Outgoing damage percentage (100 = unchanged).
    pub damage_pct: u32,
    /// Incoming damage reduction percentage.
    pub damage_reduction_pct: u32,
    /// Percentage of dealt damage healed.
    pub lifesteal_pct: u32,
    /// Opponent energy destroyed per landed hit.
    pub energy_burn: u32,
    /// Opponent energy transferred per landed hit.
    pub energy_steal: u32,
    /// A landed, unblocked special stuns the opponent next turn.
    pub stun_on_special: bool,
    /// Opponent blocks never absorb.
    pub disable_opponent_block: bool,
    /// Percentage of an absorbed attack sent back to the attacker.
    pub reflect_pct: u32,
    /// Percentage of damage received returned to the attacker.
    pub thorns_pct: u32,
    /// Landed punch/kick damage is doubled.
    pub double_hit: bool,
}

impl SurgeModifiers {
    /// No-op modifier set.
    pub const NEUTRAL: SurgeModifiers = SurgeModifiers {
        damage_pct: 100,
        damage_reduction_pct: 0,
        lifesteal_pct: 0,
        energy_burn: 0,
        energy_steal: 0,
        stun_on_special: false,
        disable_opponent_block: false,
        reflect_pct: 0,
        thorns_pct: 0,
        double_hit: false,
    };

    /// Modifiers for an optional selection.
    pub fn for_selection(card: Option<SurgeCard>) -> Self {
        card.map(SurgeCard::modifiers).unwrap_or(Self::NEUTRAL)
    }
}

impl Default for SurgeModifiers {
    fn default() -> Self {
        Self::NEUTRAL
    }
}
