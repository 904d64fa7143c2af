//! The monster brain. Deliberately simple and fully deterministic: the
//! chosen action depends only on the state, so a replayed session makes the
//! same choices without any extra bookkeeping.

use crate::state::GameState;
use protocol::ids::UnitId;
use protocol::{GameAction, Position};

/// Picks the next action for the monster whose turn it is.
///
/// Priority: attack the nearest living player when in range, otherwise step
/// toward it with the remaining movement, otherwise end the turn. Ties on
/// distance break by unit id ascending, steps probe neighbors in a fixed
/// N, E, S, W order.
pub fn monster_action(state: &GameState) -> GameAction {
    let Some(unit_id) = state.current_unit_id() else {
        // Nothing to do outside active combat; the caller handles this.
        return GameAction::EndTurn { unit_id: 0 };
    };
    let Some(monster) = state.unit(unit_id) else {
        return GameAction::EndTurn { unit_id };
    };

    let Some(target) = nearest_player(state, monster.position) else {
        return GameAction::EndTurn { unit_id };
    };
    let target_pos = state.unit(target).map(|u| u.position).unwrap_or(monster.position);

    let range = monster.stats.range.max(1);
    let distance = monster.position.distance(&target_pos);
    if distance <= range && !state.combat.turn_state.action_used {
        let clear = range == 1 || state.map.line_of_sight(monster.position, target_pos);
        if clear {
            return GameAction::Attack { unit_id, target_id: target };
        }
    }

    let budget = state.combat.turn_state.movement_remaining;
    let path = greedy_path(state, unit_id, monster.position, target_pos, budget);
    if path.is_empty() {
        GameAction::EndTurn { unit_id }
    } else {
        GameAction::Move { unit_id, path }
    }
}

fn nearest_player(state: &GameState, from: Position) -> Option<UnitId> {
    state
        .living_players()
        .map(|u| (u.position.distance(&from), u.id))
        .min()
        .map(|(_, id)| id)
}

const STEPS: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Greedy walk toward the target: each step picks the first free neighbor
/// that strictly shrinks the distance, stopping next to the target or when
/// stuck. Good enough for a dungeon corridor, and cheap.
fn greedy_path(
    state: &GameState,
    unit_id: UnitId,
    from: Position,
    target: Position,
    budget: u32,
) -> Vec<Position> {
    let mut path = Vec::new();
    let mut here = from;
    for _ in 0..budget {
        if here.distance(&target) <= 1 {
            break;
        }
        let next = STEPS.iter().copied().find_map(|(dx, dy)| {
            let candidate = Position::new(here.x + dx, here.y + dy);
            let closer = candidate.distance(&target) < here.distance(&target);
            let free = state.map.is_walkable(candidate)
                && !state.is_occupied(candidate, unit_id);
            (closer && free).then_some(candidate)
        });
        match next {
            Some(step) => {
                path.push(step);
                here = step;
            }
            None => break,
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::execute_action;
    use crate::combat::start_combat;
    use crate::state::tests::sample_state;
    use crate::unit::UnitKind;

    fn rig_monster_turn(state: &mut GameState) -> UnitId {
        let monster_id = state
            .units
            .iter()
            .find(|u| u.kind == UnitKind::Monster)
            .unwrap()
            .id;
        let index = state
            .combat
            .initiative
            .iter()
            .position(|id| *id == monster_id)
            .unwrap();
        state.combat.current_turn = index;
        state.combat.turn_state.movement_remaining =
            state.unit(monster_id).unwrap().stats.movement;
        state.combat.turn_state.action_used = false;
        monster_id
    }

    #[test]
    fn adjacent_monster_attacks() {
        let mut state = sample_state(42, 2);
        start_combat(&mut state).unwrap();
        let monster_id = rig_monster_turn(&mut state);
        let player_pos = state.unit(0).unwrap().position;
        state.unit_mut(monster_id).unwrap().position =
            Position::new(player_pos.x + 1, player_pos.y);

        let action = monster_action(&state);
        assert_eq!(action, GameAction::Attack { unit_id: monster_id, target_id: 0 });
        // The chosen action must also be executable.
        execute_action(&mut state, &action).unwrap();
    }

    #[test]
    fn distant_monster_closes_in_or_ends() {
        let mut state = sample_state(42, 2);
        start_combat(&mut state).unwrap();
        let monster_id = rig_monster_turn(&mut state);

        let action = monster_action(&state);
        match &action {
            GameAction::Move { unit_id, path } => {
                assert_eq!(*unit_id, monster_id);
                assert!(!path.is_empty());
                let nearest = |s: &GameState| {
                    let here = s.unit(monster_id).unwrap().position;
                    s.living_players()
                        .map(|p| p.position.distance(&here))
                        .min()
                        .unwrap()
                };
                let before = nearest(&state);
                execute_action(&mut state, &action).unwrap();
                assert!(nearest(&state) < before);
            }
            GameAction::EndTurn { unit_id } => assert_eq!(*unit_id, monster_id),
            other => panic!("unexpected monster action {other:?}"),
        }
    }

    #[test]
    fn spent_monster_ends_its_turn() {
        let mut state = sample_state(42, 2);
        start_combat(&mut state).unwrap();
        let monster_id = rig_monster_turn(&mut state);
        state.combat.turn_state.movement_remaining = 0;
        state.combat.turn_state.action_used = true;

        let action = monster_action(&state);
        assert_eq!(action, GameAction::EndTurn { unit_id: monster_id });
    }

    #[test]
    fn choice_is_deterministic() {
        let mut a = sample_state(17, 3);
        let mut b = sample_state(17, 3);
        start_combat(&mut a).unwrap();
        start_combat(&mut b).unwrap();
        rig_monster_turn(&mut a);
        rig_monster_turn(&mut b);
        assert_eq!(monster_action(&a), monster_action(&b));
    }
}
