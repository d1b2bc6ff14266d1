use std::fmt;
use std::str::FromStr;

use arrayvec::{ArrayString, ArrayVec};
use serde::{Deserialize, Serialize};

use crate::reference::Faction;

/// Upstream character id, stored inline (no heap allocation).
pub type CharacterId = ArrayString<24>;

/// Upstream outfit id, stored inline.
pub type OutfitId = ArrayString<24>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(pub u32);

impl FromStr for WorldId {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.parse().map(WorldId)
  }
}

impl fmt::Display for WorldId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// Zone id as sent upstream. The upper 16 bits carry the instance number.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

impl ZoneId {
  /// The zone definition with the instance bits stripped.
  pub fn definition(self) -> ZoneId {
    ZoneId(self.0 & 0xFFFF)
  }
}

impl FromStr for ZoneId {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.parse().map(ZoneId)
  }
}

impl fmt::Display for ZoneId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// Route discriminator for [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EventKind {
  PlayerLogin,
  PlayerLogout,
  AchievementEarned,
  BattleRankUp,
  Death,
  GainExperience,
  ItemAdded,
  PlayerFacilityCapture,
  PlayerFacilityDefend,
  SkillAdded,
  VehicleDestroy,
  MetagameEvent,
  FacilityControl,
  ContinentLock,
}

impl EventKind {
  pub const ALL: [EventKind; 14] = [
    EventKind::PlayerLogin,
    EventKind::PlayerLogout,
    EventKind::AchievementEarned,
    EventKind::BattleRankUp,
    EventKind::Death,
    EventKind::GainExperience,
    EventKind::ItemAdded,
    EventKind::PlayerFacilityCapture,
    EventKind::PlayerFacilityDefend,
    EventKind::SkillAdded,
    EventKind::VehicleDestroy,
    EventKind::MetagameEvent,
    EventKind::FacilityControl,
    EventKind::ContinentLock,
  ];

  /// Kinds that carry a zone context for a character.
  pub const ZONE_ACTIONS: [EventKind; 9] = [
    EventKind::AchievementEarned,
    EventKind::BattleRankUp,
    EventKind::Death,
    EventKind::GainExperience,
    EventKind::ItemAdded,
    EventKind::PlayerFacilityCapture,
    EventKind::PlayerFacilityDefend,
    EventKind::SkillAdded,
    EventKind::VehicleDestroy,
  ];

  /// The upstream event name, as used in the subscribe command.
  pub fn as_str(self) -> &'static str {
    match self {
      EventKind::PlayerLogin => "PlayerLogin",
      EventKind::PlayerLogout => "PlayerLogout",
      EventKind::AchievementEarned => "AchievementEarned",
      EventKind::BattleRankUp => "BattleRankUp",
      EventKind::Death => "Death",
      EventKind::GainExperience => "GainExperience",
      EventKind::ItemAdded => "ItemAdded",
      EventKind::PlayerFacilityCapture => "PlayerFacilityCapture",
      EventKind::PlayerFacilityDefend => "PlayerFacilityDefend",
      EventKind::SkillAdded => "SkillAdded",
      EventKind::VehicleDestroy => "VehicleDestroy",
      EventKind::MetagameEvent => "MetagameEvent",
      EventKind::FacilityControl => "FacilityControl",
      EventKind::ContinentLock => "ContinentLock",
    }
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A decoded game-world event. Dispatched on the upstream `event_name` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event_name")]
pub enum Event {
  PlayerLogin(PlayerLogin),
  PlayerLogout(PlayerLogout),
  AchievementEarned(AchievementEarned),
  BattleRankUp(BattleRankUp),
  Death(Death),
  GainExperience(GainExperience),
  ItemAdded(ItemAdded),
  PlayerFacilityCapture(PlayerFacility),
  PlayerFacilityDefend(PlayerFacility),
  SkillAdded(SkillAdded),
  VehicleDestroy(VehicleDestroy),
  MetagameEvent(MetagameEvent),
  FacilityControl(FacilityControl),
  ContinentLock(ContinentLock),
}

/// A character seen acting inside a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneAction {
  pub world_id: WorldId,
  pub zone_id: ZoneId,
  pub character_id: CharacterId,
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Event::PlayerLogin(_) => EventKind::PlayerLogin,
      Event::PlayerLogout(_) => EventKind::PlayerLogout,
      Event::AchievementEarned(_) => EventKind::AchievementEarned,
      Event::BattleRankUp(_) => EventKind::BattleRankUp,
      Event::Death(_) => EventKind::Death,
      Event::GainExperience(_) => EventKind::GainExperience,
      Event::ItemAdded(_) => EventKind::ItemAdded,
      Event::PlayerFacilityCapture(_) => EventKind::PlayerFacilityCapture,
      Event::PlayerFacilityDefend(_) => EventKind::PlayerFacilityDefend,
      Event::SkillAdded(_) => EventKind::SkillAdded,
      Event::VehicleDestroy(_) => EventKind::VehicleDestroy,
      Event::MetagameEvent(_) => EventKind::MetagameEvent,
      Event::FacilityControl(_) => EventKind::FacilityControl,
      Event::ContinentLock(_) => EventKind::ContinentLock,
    }
  }

  pub fn world_id(&self) -> WorldId {
    match self {
      Event::PlayerLogin(e) => e.world_id,
      Event::PlayerLogout(e) => e.world_id,
      Event::AchievementEarned(e) => e.world_id,
      Event::BattleRankUp(e) => e.world_id,
      Event::Death(e) => e.world_id,
      Event::GainExperience(e) => e.world_id,
      Event::ItemAdded(e) => e.world_id,
      Event::PlayerFacilityCapture(e) | Event::PlayerFacilityDefend(e) => e.world_id,
      Event::SkillAdded(e) => e.world_id,
      Event::VehicleDestroy(e) => e.world_id,
      Event::MetagameEvent(e) => e.world_id,
      Event::FacilityControl(e) => e.world_id,
      Event::ContinentLock(e) => e.world_id,
    }
  }

  /// The character the event is about, if any.
  pub fn character_id(&self) -> Option<CharacterId> {
    match self {
      Event::PlayerLogin(e) => Some(e.character_id),
      Event::PlayerLogout(e) => Some(e.character_id),
      Event::AchievementEarned(e) => Some(e.character_id),
      Event::BattleRankUp(e) => Some(e.character_id),
      Event::Death(e) => Some(e.character_id),
      Event::GainExperience(e) => Some(e.character_id),
      Event::ItemAdded(e) => Some(e.character_id),
      Event::PlayerFacilityCapture(e) | Event::PlayerFacilityDefend(e) => Some(e.character_id),
      Event::SkillAdded(e) => Some(e.character_id),
      Event::VehicleDestroy(e) => Some(e.character_id),
      Event::MetagameEvent(_) | Event::FacilityControl(_) | Event::ContinentLock(_) => None,
    }
  }

  /// Characters this event places inside a zone. Deaths and vehicle kills
  /// place the attacker there too.
  pub fn zone_actions(&self) -> ArrayVec<ZoneAction, 2> {
    let mut actions = ArrayVec::new();
    let mut push = |world_id, zone_id, character_id: CharacterId| {
      if !is_environment(&character_id) {
        actions.push(ZoneAction {
          world_id,
          zone_id,
          character_id,
        });
      }
    };
    match self {
      Event::AchievementEarned(e) => push(e.world_id, e.zone_id, e.character_id),
      Event::BattleRankUp(e) => push(e.world_id, e.zone_id, e.character_id),
      Event::Death(e) => {
        push(e.world_id, e.zone_id, e.character_id);
        if e.attacker_character_id != e.character_id {
          push(e.world_id, e.zone_id, e.attacker_character_id);
        }
      }
      Event::GainExperience(e) => push(e.world_id, e.zone_id, e.character_id),
      Event::ItemAdded(e) => push(e.world_id, e.zone_id, e.character_id),
      Event::PlayerFacilityCapture(e) | Event::PlayerFacilityDefend(e) => {
        push(e.world_id, e.zone_id, e.character_id)
      }
      Event::SkillAdded(e) => push(e.world_id, e.zone_id, e.character_id),
      Event::VehicleDestroy(e) => {
        push(e.world_id, e.zone_id, e.character_id);
        if e.attacker_character_id != e.character_id {
          push(e.world_id, e.zone_id, e.attacker_character_id);
        }
      }
      Event::PlayerLogin(_)
      | Event::PlayerLogout(_)
      | Event::MetagameEvent(_)
      | Event::FacilityControl(_)
      | Event::ContinentLock(_) => {}
    }
    actions
  }
}

/// Upstream uses "0" for kills by the environment.
fn is_environment(character_id: &CharacterId) -> bool {
  character_id.is_empty() || character_id.as_str() == "0"
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerLogin {
  pub character_id: CharacterId,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(default, rename = "faction_id", deserialize_with = "de::number")]
  pub faction: Faction,
  #[serde(default, deserialize_with = "de::outfit")]
  pub outfit_id: Option<OutfitId>,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerLogout {
  pub character_id: CharacterId,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(default, rename = "faction_id", deserialize_with = "de::number")]
  pub faction: Faction,
  #[serde(default, deserialize_with = "de::outfit")]
  pub outfit_id: Option<OutfitId>,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AchievementEarned {
  pub character_id: CharacterId,
  #[serde(deserialize_with = "de::number")]
  pub achievement_id: u32,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BattleRankUp {
  pub character_id: CharacterId,
  #[serde(deserialize_with = "de::number")]
  pub battle_rank: u32,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Death {
  pub character_id: CharacterId,
  pub attacker_character_id: CharacterId,
  #[serde(default, deserialize_with = "de::number")]
  pub attacker_weapon_id: u32,
  #[serde(default, deserialize_with = "de::flag")]
  pub is_headshot: bool,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GainExperience {
  pub character_id: CharacterId,
  #[serde(deserialize_with = "de::number")]
  pub experience_id: u32,
  #[serde(default, deserialize_with = "de::number")]
  pub amount: u32,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemAdded {
  pub character_id: CharacterId,
  #[serde(deserialize_with = "de::number")]
  pub item_id: u32,
  #[serde(default, deserialize_with = "de::number")]
  pub item_count: u32,
  #[serde(default)]
  pub context: String,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

/// Payload shared by PlayerFacilityCapture and PlayerFacilityDefend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerFacility {
  pub character_id: CharacterId,
  #[serde(deserialize_with = "de::number")]
  pub facility_id: u32,
  #[serde(default, deserialize_with = "de::outfit")]
  pub outfit_id: Option<OutfitId>,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SkillAdded {
  pub character_id: CharacterId,
  #[serde(deserialize_with = "de::number")]
  pub skill_id: u32,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VehicleDestroy {
  pub character_id: CharacterId,
  pub attacker_character_id: CharacterId,
  #[serde(deserialize_with = "de::number")]
  pub vehicle_id: u32,
  #[serde(default, deserialize_with = "de::number")]
  pub attacker_vehicle_id: u32,
  #[serde(default, rename = "faction_id", deserialize_with = "de::number")]
  pub faction: Faction,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetagameEvent {
  #[serde(deserialize_with = "de::number")]
  pub metagame_event_id: u32,
  #[serde(default)]
  pub metagame_event_state_name: String,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(default, deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FacilityControl {
  #[serde(deserialize_with = "de::number")]
  pub facility_id: u32,
  #[serde(default, rename = "new_faction_id", deserialize_with = "de::number")]
  pub new_faction: Faction,
  #[serde(default, rename = "old_faction_id", deserialize_with = "de::number")]
  pub old_faction: Faction,
  #[serde(default, deserialize_with = "de::outfit")]
  pub outfit_id: Option<OutfitId>,
  #[serde(default, deserialize_with = "de::number")]
  pub duration_held: u64,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContinentLock {
  #[serde(default, deserialize_with = "de::number")]
  pub triggering_faction: Faction,
  #[serde(default, deserialize_with = "de::number")]
  pub previous_faction: Faction,
  #[serde(default, deserialize_with = "de::number")]
  pub metagame_event_id: u32,
  #[serde(deserialize_with = "de::number")]
  pub world_id: WorldId,
  #[serde(deserialize_with = "de::number")]
  pub zone_id: ZoneId,
  #[serde(deserialize_with = "de::number")]
  pub timestamp: u64,
}

/// Upstream encodes every number as a JSON string.
mod de {
  use std::fmt::Display;
  use std::str::FromStr;

  use serde::de::Error;
  use serde::{Deserialize, Deserializer};

  use super::OutfitId;

  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Text(String),
    Number(u64),
    Flag(bool),
  }

  impl Raw {
    fn into_text(self) -> String {
      match self {
        Raw::Text(text) => text,
        Raw::Number(n) => n.to_string(),
        Raw::Flag(b) => u8::from(b).to_string(),
      }
    }
  }

  pub(super) fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
  where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
  {
    let text = Raw::deserialize(deserializer)?.into_text();
    text.trim().parse().map_err(Error::custom)
  }

  pub(super) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
  where
    D: Deserializer<'de>,
  {
    let text = Raw::deserialize(deserializer)?.into_text();
    match text.as_str() {
      "1" | "true" => Ok(true),
      "0" | "false" | "" => Ok(false),
      other => Err(Error::custom(format!("invalid flag {other:?}"))),
    }
  }

  /// `"0"` and empty strings mean "no outfit".
  pub(super) fn outfit<'de, D>(deserializer: D) -> Result<Option<OutfitId>, D::Error>
  where
    D: Deserializer<'de>,
  {
    let Some(raw) = Option::<Raw>::deserialize(deserializer)? else {
      return Ok(None);
    };
    let text = raw.into_text();
    if text.is_empty() || text == "0" {
      return Ok(None);
    }
    OutfitId::from(&text).map(Some).map_err(Error::custom)
  }
}
