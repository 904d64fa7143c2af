//! Validation failures of the simulation. Each carries a stable reason code
//! that travels in the error reply to the requester.

use protocol::ids::{DropId, UnitId};
use thiserror::Error;

/// Why an action was rejected. No state is changed on rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidAction {
    #[error("combat is not active")]
    CombatNotActive,
    #[error("unit {0} does not exist")]
    UnknownUnit(UnitId),
    #[error("it is not the turn of unit {0}")]
    NotUnitsTurn(UnitId),
    #[error("empty movement path")]
    EmptyPath,
    #[error("path is not a chain of orthogonal steps")]
    BrokenPath,
    #[error("path leaves the walkable area")]
    NotWalkable,
    #[error("path crosses an occupied tile")]
    TileOccupied,
    #[error("path is longer than the remaining movement")]
    TooFar,
    #[error("the action for this turn was already used")]
    NoActionLeft,
    #[error("unit {0} cannot target itself")]
    SelfTarget(UnitId),
    #[error("target unit {0} is already dead")]
    TargetDead(UnitId),
    #[error("target is out of range")]
    OutOfRange,
    #[error("no line of sight to the target")]
    NoLineOfSight,
    #[error("no loot drop {0} at this unit's tile")]
    NoSuchDrop(DropId),
}

impl InvalidAction {
    /// The stable machine readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            InvalidAction::CombatNotActive => "COMBAT_NOT_ACTIVE",
            InvalidAction::UnknownUnit(_) => "UNKNOWN_UNIT",
            InvalidAction::NotUnitsTurn(_) => "NOT_UNITS_TURN",
            InvalidAction::EmptyPath => "EMPTY_PATH",
            InvalidAction::BrokenPath => "BROKEN_PATH",
            InvalidAction::NotWalkable => "NOT_WALKABLE",
            InvalidAction::TileOccupied => "TILE_OCCUPIED",
            InvalidAction::TooFar => "TOO_FAR",
            InvalidAction::NoActionLeft => "NO_ACTION_LEFT",
            InvalidAction::SelfTarget(_) => "SELF_TARGET",
            InvalidAction::TargetDead(_) => "TARGET_DEAD",
            InvalidAction::OutOfRange => "OUT_OF_RANGE",
            InvalidAction::NoLineOfSight => "NO_LINE_OF_SIGHT",
            InvalidAction::NoSuchDrop(_) => "NO_SUCH_DROP",
        }
    }
}
