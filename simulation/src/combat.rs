//! Combat start and turn progression.

use crate::error::InvalidAction;
use crate::state::{GameState, TurnRecord, TurnState};
use protocol::ids::UnitId;
use protocol::{CombatOutcome, CombatPhase, GameEvent, GameEventKind};

/// Rolls initiative and opens the encounter.
///
/// Initiative is `initiativeStat + d6` per unit, drawn from the state's
/// seeded stream in unit id order, sorted descending; ties break by unit id
/// ascending. The order is fixed for the whole encounter, defeated units
/// are removed but never reordered.
pub fn start_combat(state: &mut GameState) -> Result<Vec<GameEvent>, InvalidAction> {
    if state.combat.phase != CombatPhase::NotStarted {
        return Err(InvalidAction::CombatNotActive);
    }

    let mut rolls: Vec<(i32, UnitId)> = Vec::with_capacity(state.units.len());
    // Stable draw order: unit ids ascending.
    let mut ids: Vec<UnitId> = state.units.iter().map(|u| u.id).collect();
    ids.sort_unstable();
    for id in ids {
        let stat = state
            .unit(id)
            .map(|u| u.stats.initiative)
            .unwrap_or_default();
        let roll = stat + state.rng.d6();
        rolls.push((roll, id));
    }
    rolls.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    state.combat.initiative = rolls.into_iter().map(|(_, id)| id).collect();
    state.combat.phase = CombatPhase::Active;
    state.combat.round = 1;
    state.combat.current_turn = 0;

    let first = state.combat.initiative[0];
    reset_turn_state(state, first);
    let round = state.combat.round;
    let event = state.emit(GameEventKind::TurnStarted { unit_id: first, round });
    Ok(vec![event])
}

/// Ends the current unit's turn and hands the turn to the next living unit.
/// Wrapping around the order increments the round.
pub(crate) fn advance_turn(state: &mut GameState) -> Vec<GameEvent> {
    let mut events = Vec::with_capacity(2);
    let Some(current) = state.current_unit_id() else {
        return events;
    };

    state.turn_history.push(TurnRecord {
        round: state.combat.round,
        unit_id: current,
    });
    events.push(state.emit(GameEventKind::TurnEnded { unit_id: current }));

    if state.combat.initiative.is_empty() {
        return events;
    }
    let next_index = (state.combat.current_turn + 1) % state.combat.initiative.len();
    if next_index <= state.combat.current_turn {
        state.combat.round += 1;
    }
    state.combat.current_turn = next_index;

    let next = state.combat.initiative[next_index];
    reset_turn_state(state, next);
    let round = state.combat.round;
    events.push(state.emit(GameEventKind::TurnStarted { unit_id: next, round }));
    events
}

/// Drops a defeated unit from the initiative order, keeping the current
/// turn pointed at the same unit.
pub(crate) fn remove_from_initiative(state: &mut GameState, unit_id: UnitId) {
    let Some(index) = state.combat.initiative.iter().position(|id| *id == unit_id) else {
        return;
    };
    state.combat.initiative.remove(index);
    if index < state.combat.current_turn {
        state.combat.current_turn -= 1;
    } else if state.combat.current_turn >= state.combat.initiative.len()
        && !state.combat.initiative.is_empty()
    {
        state.combat.current_turn = 0;
    }
}

/// Checks for a finished encounter and flips the phase. At most one
/// `game_over` is ever emitted.
pub(crate) fn check_game_over(state: &mut GameState) -> Option<GameEvent> {
    if state.combat.phase != CombatPhase::Active {
        return None;
    }
    let outcome = if state.living_monsters().next().is_none() {
        CombatOutcome::Victory
    } else if state.living_players().next().is_none() {
        CombatOutcome::Defeat
    } else {
        return None;
    };
    state.combat.phase = match outcome {
        CombatOutcome::Victory => CombatPhase::Victory,
        CombatOutcome::Defeat => CombatPhase::Defeat,
    };
    Some(state.emit(GameEventKind::GameOver { outcome }))
}

fn reset_turn_state(state: &mut GameState, unit_id: UnitId) {
    let movement = state
        .unit(unit_id)
        .map(|u| u.stats.movement)
        .unwrap_or_default();
    state.combat.turn_state = TurnState {
        movement_remaining: movement,
        action_used: false,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::sample_state;

    #[test]
    fn initiative_is_deterministic() {
        let mut a = sample_state(42, 2);
        let mut b = sample_state(42, 2);
        start_combat(&mut a).unwrap();
        start_combat(&mut b).unwrap();
        assert_eq!(a.combat.initiative, b.combat.initiative);
        assert_eq!(a, b);
    }

    #[test]
    fn initiative_contains_every_unit_once() {
        let mut state = sample_state(7, 3);
        start_combat(&mut state).unwrap();
        let mut order = state.combat.initiative.clone();
        order.sort_unstable();
        let mut ids: Vec<_> = state.units.iter().map(|u| u.id).collect();
        ids.sort_unstable();
        assert_eq!(order, ids);
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut state = sample_state(1, 2);
        start_combat(&mut state).unwrap();
        assert_eq!(start_combat(&mut state), Err(InvalidAction::CombatNotActive));
    }

    #[test]
    fn full_wrap_increments_round() {
        let mut state = sample_state(11, 2);
        start_combat(&mut state).unwrap();
        let turns = state.combat.initiative.len();
        assert_eq!(state.combat.round, 1);
        for _ in 0..turns {
            advance_turn(&mut state);
        }
        assert_eq!(state.combat.round, 2);
        assert_eq!(state.combat.current_turn, 0);
    }

    #[test]
    fn removal_before_current_shifts_index() {
        let mut state = sample_state(13, 3);
        start_combat(&mut state).unwrap();
        advance_turn(&mut state);
        advance_turn(&mut state);
        assert_eq!(state.combat.current_turn, 2);
        let current = state.current_unit_id().unwrap();
        let first = state.combat.initiative[0];
        remove_from_initiative(&mut state, first);
        assert_eq!(state.current_unit_id(), Some(current));
        assert_eq!(state.combat.current_turn, 1);
    }

    #[test]
    fn turn_started_carries_round() {
        let mut state = sample_state(3, 2);
        let events = start_combat(&mut state).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            GameEventKind::TurnStarted { round, unit_id } => {
                assert_eq!(*round, 1);
                assert_eq!(*unit_id, state.combat.initiative[0]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
