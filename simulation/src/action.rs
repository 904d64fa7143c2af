//! Action validation and execution. The single entry point the server uses
//! to mutate a running encounter.

use crate::combat::{advance_turn, check_game_over, remove_from_initiative};
use crate::error::InvalidAction;
use crate::state::{GameState, LootDrop};
use protocol::ids::{DropId, UnitId};
use protocol::{CombatPhase, GameAction, GameEvent, GameEventKind, Position, Weapon};

/// Executes one action against the state.
///
/// On success the state is mutated and the produced events are returned in
/// order. On rejection an [`InvalidAction`] is returned and the state is
/// untouched. Identical `(state, action)` inputs yield identical results.
pub fn execute_action(
    state: &mut GameState,
    action: &GameAction,
) -> Result<Vec<GameEvent>, InvalidAction> {
    if state.combat.phase != CombatPhase::Active {
        return Err(InvalidAction::CombatNotActive);
    }
    let unit_id = action.unit_id();
    if state.unit(unit_id).is_none() {
        return Err(InvalidAction::UnknownUnit(unit_id));
    }
    if state.current_unit_id() != Some(unit_id) {
        return Err(InvalidAction::NotUnitsTurn(unit_id));
    }

    match action {
        GameAction::Move { unit_id, path } => execute_move(state, *unit_id, path),
        GameAction::Attack { unit_id, target_id } => {
            execute_attack(state, *unit_id, *target_id)
        }
        GameAction::CollectLoot { unit_id, drop_id } => {
            execute_collect(state, *unit_id, *drop_id)
        }
        GameAction::EndTurn { .. } => Ok(advance_turn(state)),
    }
}

/// Validates the whole path before anything moves: contiguous orthogonal
/// steps over walkable, unoccupied tiles, within the remaining movement.
fn execute_move(
    state: &mut GameState,
    unit_id: UnitId,
    path: &[Position],
) -> Result<Vec<GameEvent>, InvalidAction> {
    if path.is_empty() {
        return Err(InvalidAction::EmptyPath);
    }
    if path.len() as u32 > state.combat.turn_state.movement_remaining {
        return Err(InvalidAction::TooFar);
    }

    let mut previous = state
        .unit(unit_id)
        .map(|u| u.position)
        .ok_or(InvalidAction::UnknownUnit(unit_id))?;
    for step in path {
        if !previous.is_adjacent_step(step) {
            return Err(InvalidAction::BrokenPath);
        }
        if !state.map.is_walkable(*step) {
            return Err(InvalidAction::NotWalkable);
        }
        if state.is_occupied(*step, unit_id) {
            return Err(InvalidAction::TileOccupied);
        }
        previous = *step;
    }

    let destination = previous;
    state.combat.turn_state.movement_remaining -= path.len() as u32;
    if let Some(unit) = state.unit_mut(unit_id) {
        unit.position = destination;
    }
    let event = state.emit(GameEventKind::UnitMoved {
        unit_id,
        path: path.to_vec(),
        to: destination,
    });
    Ok(vec![event])
}

/// Resolves an attack. Damage is
/// `max(1, attack − defense + offset)` with a seeded offset in −1..=+1.
fn execute_attack(
    state: &mut GameState,
    unit_id: UnitId,
    target_id: UnitId,
) -> Result<Vec<GameEvent>, InvalidAction> {
    if state.combat.turn_state.action_used {
        return Err(InvalidAction::NoActionLeft);
    }
    if unit_id == target_id {
        return Err(InvalidAction::SelfTarget(unit_id));
    }
    let attacker = state
        .unit(unit_id)
        .ok_or(InvalidAction::UnknownUnit(unit_id))?;
    let target = state
        .unit(target_id)
        .ok_or(InvalidAction::UnknownUnit(target_id))?;
    if !target.is_alive() {
        return Err(InvalidAction::TargetDead(target_id));
    }
    let range = attacker.stats.range.max(1);
    if attacker.position.distance(&target.position) > range {
        return Err(InvalidAction::OutOfRange);
    }
    if range > 1 && !state.map.line_of_sight(attacker.position, target.position) {
        return Err(InvalidAction::NoLineOfSight);
    }

    let attack = attacker.stats.attack;
    let defense = target.stats.defense;
    let target_is_monster = !target.is_player();
    let target_position = target.position;

    let offset = state.rng.range(-1, 1);
    let damage = (attack - defense + offset).max(1);

    let mut events = Vec::with_capacity(3);
    let target_hp = match state.unit_mut(target_id) {
        Some(target) => {
            target.stats.hp = (target.stats.hp - damage).max(0);
            target.stats.hp
        }
        None => return Err(InvalidAction::UnknownUnit(target_id)),
    };
    state.combat.turn_state.action_used = true;
    events.push(state.emit(GameEventKind::UnitAttacked {
        attacker_id: unit_id,
        target_id,
        damage,
        target_hp,
    }));

    if target_hp == 0 {
        events.push(state.emit(GameEventKind::UnitDefeated {
            unit_id: target_id,
            attacker_id: Some(unit_id),
        }));
        remove_from_initiative(state, target_id);
        if target_is_monster
            && let Some(event) = roll_loot(state, target_position)
        {
            events.push(event);
        }
        if let Some(event) = check_game_over(state) {
            events.push(event);
        }
    }

    Ok(events)
}

/// Picks up a drop from the unit's own tile. Counts as the turn's action.
fn execute_collect(
    state: &mut GameState,
    unit_id: UnitId,
    drop_id: DropId,
) -> Result<Vec<GameEvent>, InvalidAction> {
    if state.combat.turn_state.action_used {
        return Err(InvalidAction::NoActionLeft);
    }
    let position = state
        .unit(unit_id)
        .map(|u| u.position)
        .ok_or(InvalidAction::UnknownUnit(unit_id))?;
    let index = state
        .loot_drops
        .iter()
        .position(|d| d.id == drop_id && d.position == position)
        .ok_or(InvalidAction::NoSuchDrop(drop_id))?;

    let drop = state.loot_drops.remove(index);
    state.player_inventory.gold += drop.gold;
    state.player_inventory.silver += drop.silver;
    if let Some(weapon) = &drop.weapon {
        state.player_inventory.weapons.push(weapon.clone());
    }
    state.combat.turn_state.action_used = true;
    let event = state.emit(GameEventKind::LootCollected {
        drop_id,
        unit_id,
        gold: drop.gold,
        silver: drop.silver,
        weapon: drop.weapon,
    });
    Ok(vec![event])
}

const WEAPON_DROP_PERCENT: u32 = 25;

const DROP_WEAPONS: [(&str, i32, u32); 4] = [
    ("Rusty Dagger", 1, 1),
    ("Iron Sword", 2, 1),
    ("Short Bow", 1, 4),
    ("Fire Wand", 2, 3),
];

/// A defeated monster leaves coins and sometimes a weapon. All draws come
/// from the state's stream.
fn roll_loot(state: &mut GameState, position: Position) -> Option<GameEvent> {
    let gold = state.rng.range_u64(2, 12);
    let silver = state.rng.range_u64(0, 40);
    let weapon = if state.rng.percent(WEAPON_DROP_PERCENT) {
        let pick = state.rng.range(0, DROP_WEAPONS.len() as i32 - 1) as usize;
        let (name, attack_bonus, range) = DROP_WEAPONS[pick];
        Some(Weapon {
            id: format!("drop-{}", state.next_drop_id),
            name: name.to_string(),
            attack_bonus,
            range,
        })
    } else {
        None
    };

    let id = state.take_drop_id();
    state.loot_drops.push(LootDrop {
        id,
        position,
        gold,
        silver,
        weapon: weapon.clone(),
    });
    Some(state.emit(GameEventKind::LootDropped {
        drop_id: id,
        position,
        gold,
        silver,
        weapon,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::start_combat;
    use crate::state::tests::sample_state;
    use crate::unit::UnitKind;

    /// Builds a started encounter and rigs the current turn onto `unit_id`.
    fn rigged(seed: u64, players: usize, unit_id: UnitId) -> GameState {
        let mut state = sample_state(seed, players);
        start_combat(&mut state).unwrap();
        let index = state
            .combat
            .initiative
            .iter()
            .position(|id| *id == unit_id)
            .unwrap();
        state.combat.current_turn = index;
        let movement = state.unit(unit_id).unwrap().stats.movement;
        state.combat.turn_state.movement_remaining = movement;
        state.combat.turn_state.action_used = false;
        state
    }

    /// Moves the two units next to each other for melee tests.
    fn make_adjacent(state: &mut GameState, a: UnitId, b: UnitId) {
        let base = state.unit(a).unwrap().position;
        let side = Position::new(base.x + 1, base.y);
        state.unit_mut(b).unwrap().position = side;
    }

    #[test]
    fn wrong_unit_is_rejected() {
        let mut state = rigged(42, 2, 0);
        let before = state.clone();
        let result = execute_action(&mut state, &GameAction::EndTurn { unit_id: 1 });
        assert_eq!(result, Err(InvalidAction::NotUnitsTurn(1)));
        assert_eq!(state, before, "rejection must not touch the state");
    }

    #[test]
    fn move_happy_path() {
        let mut state = rigged(42, 2, 0);
        let from = state.unit(0).unwrap().position;
        // Find a free walkable neighbor.
        let step = [(0, -1), (1, 0), (0, 1), (-1, 0)]
            .into_iter()
            .map(|(dx, dy)| Position::new(from.x + dx, from.y + dy))
            .find(|p| state.map.is_walkable(*p) && !state.is_occupied(*p, 0))
            .expect("spawn room has a free neighbor");
        let movement = state.combat.turn_state.movement_remaining;

        let events =
            execute_action(&mut state, &GameAction::Move { unit_id: 0, path: vec![step] })
                .unwrap();
        assert_eq!(state.unit(0).unwrap().position, step);
        assert_eq!(state.combat.turn_state.movement_remaining, movement - 1);
        assert!(matches!(
            events[0].kind,
            GameEventKind::UnitMoved { unit_id: 0, .. }
        ));
    }

    #[test]
    fn move_rejects_broken_and_long_paths() {
        let mut state = rigged(42, 2, 0);
        let from = state.unit(0).unwrap().position;
        let far = Position::new(from.x + 2, from.y);
        assert_eq!(
            execute_action(&mut state, &GameAction::Move { unit_id: 0, path: vec![far] }),
            Err(InvalidAction::BrokenPath)
        );

        let movement = state.combat.turn_state.movement_remaining as i32;
        let too_long: Vec<Position> = (1..=movement + 1)
            .map(|i| Position::new(from.x + i, from.y))
            .collect();
        assert_eq!(
            execute_action(
                &mut state,
                &GameAction::Move { unit_id: 0, path: too_long }
            ),
            Err(InvalidAction::TooFar)
        );
    }

    #[test]
    fn move_rejects_occupied_tile() {
        let mut state = rigged(42, 2, 0);
        make_adjacent(&mut state, 0, 1);
        let other = state.unit(1).unwrap().position;
        assert_eq!(
            execute_action(
                &mut state,
                &GameAction::Move { unit_id: 0, path: vec![other] }
            ),
            Err(InvalidAction::TileOccupied)
        );
    }

    #[test]
    fn attack_damage_formula() {
        let mut state = rigged(42, 2, 0);
        let monster_id = state
            .units
            .iter()
            .find(|u| u.kind == UnitKind::Monster)
            .unwrap()
            .id;
        make_adjacent(&mut state, 0, monster_id);

        let attack = state.unit(0).unwrap().stats.attack;
        let defense = state.unit(monster_id).unwrap().stats.defense;
        let events = execute_action(
            &mut state,
            &GameAction::Attack { unit_id: 0, target_id: monster_id },
        )
        .unwrap();
        let GameEventKind::UnitAttacked { damage, .. } = events[0].kind else {
            panic!("expected unit_attacked first");
        };
        let base = attack - defense;
        assert!(damage >= (base - 1).max(1) && damage <= base + 1);
        assert!(state.combat.turn_state.action_used);
    }

    #[test]
    fn second_attack_in_a_turn_is_rejected() {
        let mut state = rigged(42, 2, 0);
        let monster_id = state
            .units
            .iter()
            .find(|u| u.kind == UnitKind::Monster)
            .unwrap()
            .id;
        make_adjacent(&mut state, 0, monster_id);
        execute_action(
            &mut state,
            &GameAction::Attack { unit_id: 0, target_id: monster_id },
        )
        .unwrap();
        assert_eq!(
            execute_action(
                &mut state,
                &GameAction::Attack { unit_id: 0, target_id: monster_id },
            ),
            Err(InvalidAction::NoActionLeft)
        );
    }

    #[test]
    fn defeat_removes_from_initiative_and_drops_loot() {
        let mut state = rigged(42, 2, 0);
        let monster_id = state
            .units
            .iter()
            .find(|u| u.kind == UnitKind::Monster)
            .unwrap()
            .id;
        make_adjacent(&mut state, 0, monster_id);
        state.unit_mut(monster_id).unwrap().stats.hp = 1;

        let events = execute_action(
            &mut state,
            &GameAction::Attack { unit_id: 0, target_id: monster_id },
        )
        .unwrap();
        assert!(events.iter().any(|e| matches!(
            e.kind,
            GameEventKind::UnitDefeated { unit_id, attacker_id: Some(0) }
                if unit_id == monster_id
        )));
        assert!(!state.combat.initiative.contains(&monster_id));
        assert!(events
            .iter()
            .any(|e| matches!(e.kind, GameEventKind::LootDropped { .. })));
        assert!(!state.loot_drops.is_empty());
    }

    #[test]
    fn killing_the_last_monster_wins() {
        let mut state = rigged(42, 2, 0);
        let monster_ids: Vec<UnitId> = state
            .units
            .iter()
            .filter(|u| u.kind == UnitKind::Monster)
            .map(|u| u.id)
            .collect();
        // All but one die off-screen.
        for id in &monster_ids[1..] {
            state.unit_mut(*id).unwrap().stats.hp = 0;
            crate::combat::remove_from_initiative(&mut state, *id);
        }
        let last = monster_ids[0];
        make_adjacent(&mut state, 0, last);
        state.unit_mut(last).unwrap().stats.hp = 1;

        let events = execute_action(
            &mut state,
            &GameAction::Attack { unit_id: 0, target_id: last },
        )
        .unwrap();
        assert_eq!(state.combat.phase, CombatPhase::Victory);
        assert!(events.iter().any(|e| matches!(
            e.kind,
            GameEventKind::GameOver { outcome: protocol::CombatOutcome::Victory }
        )));
    }

    #[test]
    fn collect_loot_needs_matching_tile() {
        let mut state = rigged(42, 2, 0);
        let here = state.unit(0).unwrap().position;
        state.loot_drops.push(LootDrop {
            id: 9,
            position: Position::new(here.x + 3, here.y),
            gold: 5,
            silver: 0,
            weapon: None,
        });
        assert_eq!(
            execute_action(
                &mut state,
                &GameAction::CollectLoot { unit_id: 0, drop_id: 9 }
            ),
            Err(InvalidAction::NoSuchDrop(9))
        );

        state.loot_drops[0].position = here;
        let events = execute_action(
            &mut state,
            &GameAction::CollectLoot { unit_id: 0, drop_id: 9 },
        )
        .unwrap();
        assert_eq!(state.player_inventory.gold, 5);
        assert!(state.loot_drops.is_empty());
        assert!(matches!(
            events[0].kind,
            GameEventKind::LootCollected { drop_id: 9, .. }
        ));
    }

    #[test]
    fn end_turn_is_always_valid_for_owner() {
        let mut state = rigged(42, 2, 0);
        let events =
            execute_action(&mut state, &GameAction::EndTurn { unit_id: 0 }).unwrap();
        assert!(matches!(events[0].kind, GameEventKind::TurnEnded { unit_id: 0 }));
        assert!(matches!(events[1].kind, GameEventKind::TurnStarted { .. }));
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let mut a = sample_state(42, 2);
        let mut b = sample_state(42, 2);
        let ea = start_combat(&mut a).unwrap();
        let eb = start_combat(&mut b).unwrap();
        assert_eq!(ea, eb);

        let script = [
            GameAction::EndTurn { unit_id: a.current_unit_id().unwrap() },
            GameAction::EndTurn { unit_id: {
                let mut probe = a.clone();
                advance_turn(&mut probe);
                probe.current_unit_id().unwrap()
            } },
        ];
        for action in &script {
            let ra = execute_action(&mut a, action);
            let rb = execute_action(&mut b, action);
            assert_eq!(ra, rb);
        }
        assert_eq!(a, b);
    }
}
