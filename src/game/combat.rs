//! Combat Replay Engine
//!
//! Pure, deterministic turn resolution. Given both effective moves, both
//! fighters' meters and both sides' surge modifiers, produce the next meters
//! and a per-side classification of what happened.
//!
//! All multipliers are integer percentages. They are multiplied together in
//! `u64` and floored once, so identical inputs always give identical outputs
//! on every platform.

use serde::{Deserialize, Serialize};

use crate::game::moves::Move;
use crate::game::state::{FighterState, Side, ENERGY_REGEN, MAX_ENERGY, MAX_GUARD, MAX_HEALTH};
use crate::game::surge::SurgeModifiers;

// =============================================================================
// TUNING
// =============================================================================

/// Percentage applied when a punch meets an effective block.
pub const CHIP_PCT: u64 = 20;

/// Percentage applied when a special meets an effective block.
pub const SPECIAL_VS_BLOCK_PCT: u64 = 50;

/// Incoming damage percentage against a guard-broken fighter.
pub const GUARD_BREAK_PCT: u64 = 125;

/// Guard gained for each turn spent blocking.
pub const GUARD_BUILD: u32 = 25;

/// Guard spent when a block absorbs an attack.
pub const GUARD_SPEND: u32 = 10;

/// Base damage for a move.
#[inline]
pub const fn base_damage(mv: Move) -> u32 {
    match mv {
        Move::Punch => 10,
        Move::Kick => 15,
        Move::Special => 25,
        Move::Block | Move::Stunned => 0,
    }
}

/// Energy cost for a move.
#[inline]
pub const fn energy_cost(mv: Move) -> u32 {
    match mv {
        Move::Kick => 10,
        Move::Special => 30,
        Move::Punch | Move::Block | Move::Stunned => 0,
    }
}

// =============================================================================
// OUTCOME TYPES
// =============================================================================

/// What a side's move achieved this turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Attack connected.
    Hit,
    /// Attack was absorbed by a block, or this side's block absorbed one.
    Blocked,
    /// Attack was absorbed and partially sent back.
    Reflected,
    /// Block was broken through, or the attack broke a guard.
    Shattered,
    /// Interrupted, fizzled for lack of energy, or blocked nothing.
    Missed,
    /// This side could not act.
    Stunned,
}

impl MoveOutcome {
    fn verb(self) -> &'static str {
        match self {
            MoveOutcome::Hit => "lands",
            MoveOutcome::Blocked => "is blocked",
            MoveOutcome::Reflected => "is reflected",
            MoveOutcome::Shattered => "shatters the guard",
            MoveOutcome::Missed => "misses",
            MoveOutcome::Stunned => "is stunned",
        }
    }
}

/// Result of one resolved turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    /// Effective moves that were resolved.
    pub moves: [Move; 2],
    /// Total damage each side inflicted (attack, reflect and thorns).
    pub damage_dealt: [u32; 2],
    /// Total damage each side received.
    pub damage_taken: [u32; 2],
    /// Meters after the turn.
    pub fighters: [FighterState; 2],
    /// Per-side classification.
    pub outcome: [MoveOutcome; 2],
    /// Stun flags for the next turn.
    pub stunned_next: [bool; 2],
    /// Sides that were guard-broken this turn.
    pub guard_broken: [bool; 2],
    /// Deterministic description of the turn.
    pub narrative: String,
    /// A fighter was knocked out.
    pub round_over: bool,
    /// Knockout winner. `None` with `round_over` is a double knockout.
    pub winner: Option<Side>,
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Resolve one turn.
///
/// `move1`/`move2` are the effective moves (already replaced with
/// `Move::Stunned` for a stunned side).
pub fn resolve_turn(
    move1: Move,
    move2: Move,
    fighter1: FighterState,
    fighter2: FighterState,
    mods1: &SurgeModifiers,
    mods2: &SurgeModifiers,
) -> TurnOutcome {
    let moves = [move1, move2];
    let mut fighters = [fighter1, fighter2];
    let mods = [*mods1, *mods2];

    // 1. A move the fighter cannot afford fizzles and acts as no move.
    let fizzled = [0, 1].map(|i| energy_cost(moves[i]) > fighters[i].energy);
    let acted = [0, 1].map(|i| if fizzled[i] { Move::Stunned } else { moves[i] });

    // 2. Guard break and effective blocks.
    let guard_broken = [0, 1].map(|i| fighters[i].guard >= MAX_GUARD && acted[i] != Move::Block);
    let blocking = [0, 1].map(|i| acted[i] == Move::Block && !mods[1 - i].disable_opponent_block);

    // 3. Attack damage, i -> opponent.
    let mut attack = [0u32; 2];
    let mut landed = [false; 2];
    let mut absorbed_by = [false; 2];
    let mut absorbed = [0u32; 2];
    let mut shattered_block = [false; 2];
    for i in 0..2 {
        let j = 1 - i;
        let mv = acted[i];
        if !mv.is_attack() {
            continue;
        }

        let pct = if blocking[j] {
            match mv {
                Move::Punch => CHIP_PCT,
                Move::Kick => 100,
                _ => SPECIAL_VS_BLOCK_PCT,
            }
        } else if acted[j].is_attack() && acted[j].beats(mv) {
            0
        } else {
            100
        };

        absorbed_by[j] = blocking[j] && mv != Move::Kick;
        shattered_block[j] = blocking[j] && mv == Move::Kick;

        let guard_pct = if guard_broken[j] { GUARD_BREAK_PCT } else { 100 };
        let reduction = 100 - u64::from(mods[j].damage_reduction_pct.min(100));
        let scaled = u64::from(base_damage(mv)) * u64::from(mods[i].damage_pct) * guard_pct * reduction;
        let raw = scaled * pct / 100_000_000;
        let mut dmg = raw.min(u64::from(u32::MAX)) as u32;
        if absorbed_by[j] {
            let unblocked = (scaled / 1_000_000).min(u64::from(u32::MAX)) as u32;
            absorbed[j] = unblocked.saturating_sub(dmg);
        }

        landed[i] = dmg > 0 && !absorbed_by[j];
        if landed[i] && mods[i].double_hit && matches!(mv, Move::Punch | Move::Kick) {
            dmg = dmg.saturating_mul(2);
        }
        attack[i] = dmg;
    }

    // 4. Reflect and thorns flow back to the attacker.
    let mut taken = [0u32; 2];
    for i in 0..2 {
        let j = 1 - i;
        taken[j] = taken[j].saturating_add(attack[i]);
        if absorbed_by[j] && mods[j].reflect_pct > 0 {
            let reflected = absorbed[j] * mods[j].reflect_pct / 100;
            taken[i] = taken[i].saturating_add(reflected);
        }
        if attack[i] > 0 && mods[j].thorns_pct > 0 {
            taken[i] = taken[i].saturating_add(attack[i] * mods[j].thorns_pct / 100);
        }
    }
    let dealt = [taken[1], taken[0]];

    for i in 0..2 {
        fighters[i].health = fighters[i].health.saturating_sub(taken[i]);
    }

    // 5. Lifesteal only for a fighter still standing.
    for i in 0..2 {
        if mods[i].lifesteal_pct > 0 && fighters[i].health > 0 {
            let heal = attack[i] * mods[i].lifesteal_pct / 100;
            fighters[i].health = (fighters[i].health + heal).min(MAX_HEALTH);
        }
    }

    // 6. Energy: pay, regen, clamp, then on-hit burn and steal.
    for i in 0..2 {
        let spent = fighters[i].energy - energy_cost(acted[i]);
        fighters[i].energy = (spent + ENERGY_REGEN).min(MAX_ENERGY);
    }
    for i in 0..2 {
        let j = 1 - i;
        if !landed[i] {
            continue;
        }
        fighters[j].energy = fighters[j].energy.saturating_sub(mods[i].energy_burn);
        let stolen = mods[i].energy_steal.min(fighters[j].energy);
        fighters[j].energy -= stolen;
        fighters[i].energy = (fighters[i].energy + stolen).min(MAX_ENERGY);
    }

    // 7. Guard meter.
    for i in 0..2 {
        let guard = fighters[i].guard;
        fighters[i].guard = if guard_broken[i] {
            0
        } else if !blocking[i] || shattered_block[i] {
            guard
        } else if absorbed_by[i] {
            (guard + GUARD_BUILD).saturating_sub(GUARD_SPEND).min(MAX_GUARD)
        } else {
            (guard + GUARD_BUILD).min(MAX_GUARD)
        };
    }

    // 8. Stun for next turn.
    let stunned_next = [0, 1].map(|i| {
        let j = 1 - i;
        guard_broken[i] || (mods[j].stun_on_special && acted[j] == Move::Special && landed[j])
    });

    // 9. Classification.
    let outcome = [0, 1].map(|i| {
        let j = 1 - i;
        if moves[i] == Move::Stunned {
            MoveOutcome::Stunned
        } else if fizzled[i] {
            MoveOutcome::Missed
        } else if moves[i] == Move::Block {
            if absorbed_by[i] {
                MoveOutcome::Blocked
            } else if shattered_block[i] {
                MoveOutcome::Shattered
            } else {
                MoveOutcome::Missed
            }
        } else if absorbed_by[j] && mods[j].reflect_pct > 0 {
            MoveOutcome::Reflected
        } else if absorbed_by[j] {
            MoveOutcome::Blocked
        } else if attack[i] > 0 && (shattered_block[j] || guard_broken[j]) {
            MoveOutcome::Shattered
        } else if attack[i] > 0 {
            MoveOutcome::Hit
        } else {
            MoveOutcome::Missed
        }
    });

    let ko = [fighters[0].is_down(), fighters[1].is_down()];
    let round_over = ko[0] || ko[1];
    let winner = match ko {
        [true, false] => Some(Side::Player2),
        [false, true] => Some(Side::Player1),
        _ => None,
    };

    let narrative = narrate(&moves, &outcome, &dealt, &guard_broken, round_over, winner);

    TurnOutcome {
        moves,
        damage_dealt: dealt,
        damage_taken: taken,
        fighters,
        outcome,
        stunned_next,
        guard_broken,
        narrative,
        round_over,
        winner,
    }
}

fn narrate(
    moves: &[Move; 2],
    outcome: &[MoveOutcome; 2],
    dealt: &[u32; 2],
    guard_broken: &[bool; 2],
    round_over: bool,
    winner: Option<Side>,
) -> String {
    let mut parts = Vec::with_capacity(4);
    for side in Side::BOTH {
        let i = side.index();
        let mut line = if moves[i] == Move::Stunned {
            format!("{} {}", side.label(), outcome[i].verb())
        } else {
            format!("{}'s {} {}", side.label(), moves[i], outcome[i].verb())
        };
        if dealt[i] > 0 {
            line.push_str(&format!(" for {}", dealt[i]));
        }
        parts.push(line);
    }
    for side in Side::BOTH {
        if guard_broken[side.index()] {
            parts.push(format!("{}'s guard breaks", side.label()));
        }
    }
    let mut text = parts.join(". ");
    text.push('.');
    if round_over {
        match winner {
            Some(side) => text.push_str(&format!(" {} wins by knockout!", side.label())),
            None => text.push_str(" Double knockout!"),
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::surge::SurgeCard;
    use proptest::prelude::*;

    const N: SurgeModifiers = SurgeModifiers::NEUTRAL;

    fn fresh() -> FighterState {
        FighterState::fresh()
    }

    fn resolve(m1: Move, m2: Move) -> TurnOutcome {
        resolve_turn(m1, m2, fresh(), fresh(), &N, &N)
    }

    #[test]
    fn test_punch_interrupts_special() {
        let out = resolve(Move::Special, Move::Punch);
        assert_eq!(out.outcome, [MoveOutcome::Missed, MoveOutcome::Hit]);
        assert_eq!(out.damage_taken, [10, 0]);
        assert_eq!(out.fighters[0].health, 90);
        assert_eq!(out.fighters[1].health, 100);
        // special still costs energy when interrupted
        assert_eq!(out.fighters[0].energy, 100 - 30 + 8);
        assert_eq!(out.fighters[1].energy, 100);
    }

    #[test]
    fn test_neutral_attacks_trade() {
        let out = resolve(Move::Punch, Move::Kick);
        assert_eq!(out.damage_taken, [15, 10]);
        assert_eq!(out.outcome, [MoveOutcome::Hit, MoveOutcome::Hit]);
    }

    #[test]
    fn test_mirror_match_trades() {
        let out = resolve(Move::Special, Move::Special);
        assert_eq!(out.damage_taken, [25, 25]);
    }

    #[test]
    fn test_block_chips_punch() {
        let out = resolve(Move::Punch, Move::Block);
        assert_eq!(out.damage_taken, [0, 2]);
        assert_eq!(out.outcome, [MoveOutcome::Blocked, MoveOutcome::Blocked]);
        assert_eq!(out.fighters[1].guard, GUARD_BUILD - GUARD_SPEND);
    }

    #[test]
    fn test_kick_shatters_block() {
        let out = resolve(Move::Block, Move::Kick);
        assert_eq!(out.damage_taken, [15, 0]);
        assert_eq!(out.outcome, [MoveOutcome::Shattered, MoveOutcome::Shattered]);
        assert_eq!(out.fighters[0].guard, 0);
    }

    #[test]
    fn test_special_halved_by_block() {
        let out = resolve(Move::Special, Move::Block);
        assert_eq!(out.damage_taken, [0, 12]);
    }

    #[test]
    fn test_idle_block_builds_guard() {
        let out = resolve(Move::Block, Move::Block);
        assert_eq!(out.fighters[0].guard, GUARD_BUILD);
        assert_eq!(out.fighters[1].guard, GUARD_BUILD);
        assert_eq!(out.outcome, [MoveOutcome::Missed, MoveOutcome::Missed]);
    }

    #[test]
    fn test_stunned_never_deals_damage() {
        let out = resolve(Move::Stunned, Move::Kick);
        assert_eq!(out.outcome, [MoveOutcome::Stunned, MoveOutcome::Hit]);
        assert_eq!(out.damage_taken, [15, 0]);
        assert_eq!(out.damage_dealt[0], 0);
    }

    #[test]
    fn test_fizzle_without_energy() {
        let tired = FighterState { health: 100, energy: 20, guard: 0 };
        let out = resolve_turn(Move::Special, Move::Block, tired, fresh(), &N, &N);
        assert_eq!(out.outcome[0], MoveOutcome::Missed);
        assert_eq!(out.damage_taken[1], 0);
        assert_eq!(out.fighters[0].energy, 28);
    }

    #[test]
    fn test_guard_break() {
        let saturated = FighterState { health: 100, energy: 100, guard: MAX_GUARD };
        let out = resolve_turn(Move::Punch, Move::Kick, fresh(), saturated, &N, &N);
        assert!(out.guard_broken[1]);
        assert_eq!(out.fighters[1].guard, 0);
        assert!(out.stunned_next[1]);
        // 10 * 125% = 12.5, floored
        assert_eq!(out.damage_taken[1], 12);
        assert_eq!(out.outcome[0], MoveOutcome::Shattered);
    }

    #[test]
    fn test_saturated_guard_while_blocking_is_safe() {
        let saturated = FighterState { health: 100, energy: 100, guard: MAX_GUARD };
        let out = resolve_turn(Move::Block, Move::Punch, saturated, fresh(), &N, &N);
        assert!(!out.guard_broken[0]);
        assert!(!out.stunned_next[0]);
    }

    #[test]
    fn test_fury_and_bulwark() {
        let fury = SurgeCard::Fury.modifiers();
        let bulwark = SurgeCard::Bulwark.modifiers();
        let out = resolve_turn(Move::Special, Move::Kick, fresh(), fresh(), &fury, &bulwark);
        // 25 * 130% * 70% = 22.75
        assert_eq!(out.damage_taken[1], 22);
        assert_eq!(out.damage_taken[0], 0);
    }

    #[test]
    fn test_leech_heals_after_damage() {
        let leech = SurgeCard::Leech.modifiers();
        let hurt = FighterState { health: 50, energy: 100, guard: 0 };
        let out = resolve_turn(Move::Special, Move::Block, hurt, fresh(), &N, &N);
        assert_eq!(out.fighters[0].health, 50);
        let out = resolve_turn(Move::Kick, Move::Kick, hurt, fresh(), &leech, &N);
        // takes 15, heals 30% of 15 = 4
        assert_eq!(out.fighters[0].health, 50 - 15 + 4);
    }

    #[test]
    fn test_drain_and_siphon() {
        let drain = SurgeCard::Drain.modifiers();
        let out = resolve_turn(Move::Punch, Move::Block, fresh(), fresh(), &drain, &N);
        // punch absorbed: no landed hit, no burn
        assert_eq!(out.fighters[1].energy, 100);

        let out = resolve_turn(Move::Punch, Move::Kick, fresh(), fresh(), &drain, &N);
        assert_eq!(out.fighters[1].energy, 100 - 10 + 8 - 15);

        let siphon = SurgeCard::Siphon.modifiers();
        let low = FighterState { health: 100, energy: 40, guard: 0 };
        let out = resolve_turn(Move::Kick, Move::Punch, low, fresh(), &siphon, &N);
        assert_eq!(out.fighters[0].energy, 40 - 10 + 8 + 10);
        assert_eq!(out.fighters[1].energy, 90);
    }

    #[test]
    fn test_concussion_stuns_on_landed_special() {
        let concussion = SurgeCard::Concussion.modifiers();
        let out = resolve_turn(Move::Special, Move::Kick, fresh(), fresh(), &concussion, &N);
        assert!(out.stunned_next[1]);
        let out = resolve_turn(Move::Special, Move::Block, fresh(), fresh(), &concussion, &N);
        assert!(!out.stunned_next[1]);
    }

    #[test]
    fn test_breaker_disables_block() {
        let breaker = SurgeCard::Breaker.modifiers();
        let out = resolve_turn(Move::Punch, Move::Block, fresh(), fresh(), &breaker, &N);
        assert_eq!(out.damage_taken[1], 10);
        assert_eq!(out.outcome, [MoveOutcome::Hit, MoveOutcome::Missed]);
        assert_eq!(out.fighters[1].guard, 0);
    }

    #[test]
    fn test_mirror_reflects_absorbed_attack() {
        let mirror = SurgeCard::Mirror.modifiers();
        let out = resolve_turn(Move::Special, Move::Block, fresh(), fresh(), &N, &mirror);
        assert_eq!(out.outcome[0], MoveOutcome::Reflected);
        // 12 of 25 gets through, half of the 13 absorbed comes back.
        assert_eq!(out.damage_taken[1], 12);
        assert_eq!(out.damage_taken[0], 6);

        // The attacker's own boost is part of what the block absorbs.
        let fury = SurgeCard::Fury.modifiers();
        let out = resolve_turn(Move::Special, Move::Block, fresh(), fresh(), &fury, &mirror);
        assert_eq!(out.damage_taken[1], 16);
        assert_eq!(out.damage_taken[0], 8);

        let out = resolve_turn(Move::Punch, Move::Block, fresh(), fresh(), &N, &mirror);
        assert_eq!(out.damage_taken[1], 2);
        assert_eq!(out.damage_taken[0], 4);
    }

    #[test]
    fn test_thorns_returns_damage() {
        let thorns = SurgeCard::Thorns.modifiers();
        let out = resolve_turn(Move::Special, Move::Kick, fresh(), fresh(), &N, &thorns);
        assert_eq!(out.damage_taken[1], 25);
        assert_eq!(out.damage_taken[0], 6);
        assert_eq!(out.damage_dealt[1], 6);
    }

    #[test]
    fn test_twin_strike_doubles_landed_hits() {
        let twin = SurgeCard::TwinStrike.modifiers();
        let out = resolve_turn(Move::Kick, Move::Special, fresh(), fresh(), &twin, &N);
        // special beats kick: interrupted, nothing to double
        assert_eq!(out.damage_taken[1], 0);
        let out = resolve_turn(Move::Kick, Move::Punch, fresh(), fresh(), &twin, &N);
        assert_eq!(out.damage_taken[1], 30);
    }

    #[test]
    fn test_knockout_and_double_knockout() {
        let low = FighterState { health: 5, energy: 100, guard: 0 };
        let out = resolve_turn(Move::Punch, Move::Kick, fresh(), low, &N, &N);
        assert!(out.round_over);
        assert_eq!(out.winner, Some(Side::Player1));
        assert!(out.narrative.ends_with("Player 1 wins by knockout!"));

        let out = resolve_turn(Move::Punch, Move::Kick, low, low, &N, &N);
        assert!(out.round_over);
        assert_eq!(out.winner, None);
        assert!(out.narrative.ends_with("Double knockout!"));
    }

    #[test]
    fn test_narrative_is_stable() {
        let out = resolve(Move::Special, Move::Punch);
        assert_eq!(
            out.narrative,
            "Player 1's special misses. Player 2's punch lands for 10."
        );
    }

    fn any_move() -> impl Strategy<Value = Move> {
        prop_oneof![
            Just(Move::Stunned),
            Just(Move::Punch),
            Just(Move::Kick),
            Just(Move::Block),
            Just(Move::Special),
        ]
    }

    fn any_fighter() -> impl Strategy<Value = FighterState> {
        (0..=MAX_HEALTH, 0..=MAX_ENERGY, 0..=MAX_GUARD)
            .prop_map(|(health, energy, guard)| FighterState { health, energy, guard })
    }

    fn any_mods() -> impl Strategy<Value = SurgeModifiers> {
        prop_oneof![
            Just(SurgeModifiers::NEUTRAL),
            (1u8..=10).prop_map(|c| SurgeModifiers::for_selection(SurgeCard::from_code(c).ok())),
        ]
    }

    proptest! {
        #[test]
        fn prop_resolution_is_deterministic(
            m1 in any_move(), m2 in any_move(),
            f1 in any_fighter(), f2 in any_fighter(),
            s1 in any_mods(), s2 in any_mods(),
        ) {
            let a = resolve_turn(m1, m2, f1, f2, &s1, &s2);
            let b = resolve_turn(m1, m2, f1, f2, &s1, &s2);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_meters_stay_in_range(
            m1 in any_move(), m2 in any_move(),
            f1 in any_fighter(), f2 in any_fighter(),
            s1 in any_mods(), s2 in any_mods(),
        ) {
            let out = resolve_turn(m1, m2, f1, f2, &s1, &s2);
            for f in out.fighters {
                prop_assert!(f.health <= MAX_HEALTH);
                prop_assert!(f.energy <= MAX_ENERGY);
                prop_assert!(f.guard <= MAX_GUARD);
            }
            prop_assert_eq!(out.round_over, out.fighters[0].health == 0 || out.fighters[1].health == 0);
        }

        #[test]
        fn prop_stunned_side_deals_no_attack_damage(
            m2 in any_move(), f1 in any_fighter(), f2 in any_fighter(),
        ) {
            let out = resolve_turn(Move::Stunned, m2, f1, f2, &N, &N);
            prop_assert_eq!(out.damage_dealt[0], 0);
            prop_assert_eq!(out.outcome[0], MoveOutcome::Stunned);
        }
    }
}
