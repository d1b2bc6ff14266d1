mod error;
mod models;
mod online;
mod population;
pub mod reference;
mod tracker;

pub use error::{ModelError, Result, TrackerError};
pub use models::{
  AchievementEarned, BattleRankUp, CharacterId, ContinentLock, Death, Event, EventKind,
  FacilityControl, GainExperience, ItemAdded, MetagameEvent, OutfitId, PlayerFacility,
  PlayerLogin, PlayerLogout, SkillAdded, VehicleDestroy, WorldId, ZoneAction, ZoneId,
};
pub use online::{LoginOutcome, OnlineCharacter, OnlineIndex};
pub use population::{FactionCounts, PopulationFolder, WorldPopulation, ZoneOutcome};
pub use reference::{Faction, Platform};
pub use tracker::{PlatformTracker, Trackers};
