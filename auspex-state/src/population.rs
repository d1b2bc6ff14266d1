//! Faction population folded from login, logout and zone events.
//!
//! Counts are kept per world: one global tally per faction and one tally per
//! zone and faction. A character contributes to at most one zone, its last seen
//! one, and only while that zone is in the reference table.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::error::{Result, TrackerError};
use crate::models::{CharacterId, WorldId, ZoneId};
use crate::reference::{self, Faction, Platform, ZONES};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FactionCounts {
    pub vs: u32,
    pub nc: u32,
    pub tr: u32,
    pub nso: u32,
    pub unknown: u32,
}

impl FactionCounts {
    pub fn get(&self, faction: Faction) -> u32 {
        match faction {
            Faction::Vs => self.vs,
            Faction::Nc => self.nc,
            Faction::Tr => self.tr,
            Faction::Nso => self.nso,
            Faction::Unknown => self.unknown,
        }
    }

    pub fn total(&self) -> u32 {
        self.vs + self.nc + self.tr + self.nso + self.unknown
    }

    fn slot(&mut self, faction: Faction) -> &mut u32 {
        match faction {
            Faction::Vs => &mut self.vs,
            Faction::Nc => &mut self.nc,
            Faction::Tr => &mut self.tr,
            Faction::Nso => &mut self.nso,
            Faction::Unknown => &mut self.unknown,
        }
    }

    fn increment(&mut self, faction: Faction) {
        *self.slot(faction) += 1;
    }

    fn decrement(&mut self, faction: Faction) {
        let slot = self.slot(faction);
        *slot = slot.saturating_sub(1);
    }
}

/// Per-zone breakdown for one world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorldPopulation {
    pub world_id: WorldId,
    pub name: &'static str,
    pub total: FactionCounts,
    pub zones: BTreeMap<ZoneId, FactionCounts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneOutcome {
    /// Character isn't online yet; nothing changed.
    Untracked,
    Unchanged,
    Entered { left: Option<ZoneId> },
    /// Zone is outside the reference table; last zone forgotten.
    Cleared { left: Option<ZoneId> },
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    world_id: WorldId,
    faction: Faction,
    zone: Option<ZoneId>,
}

#[derive(Debug, Default)]
struct WorldCounts {
    total: FactionCounts,
    zones: BTreeMap<ZoneId, FactionCounts>,
}

impl WorldCounts {
    fn seeded() -> Self {
        Self {
            total: FactionCounts::default(),
            zones: ZONES.iter().map(|z| (z.id, FactionCounts::default())).collect(),
        }
    }
}

#[derive(Debug)]
pub struct PopulationFolder {
    platform: Platform,
    worlds: BTreeMap<WorldId, WorldCounts>,
    characters: HashMap<CharacterId, Tracked>,
}

impl PopulationFolder {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            worlds: platform.worlds().map(|w| (w.id, WorldCounts::seeded())).collect(),
            characters: HashMap::new(),
        }
    }

    pub fn login(&mut self, character_id: CharacterId, world_id: WorldId, faction: Faction) {
        if let Some(tracked) = self.characters.get(&character_id) {
            if tracked.world_id == world_id && tracked.faction == faction {
                return;
            }
            // Switched world or faction since we last saw it.
            self.logout(&character_id);
        }

        self.worlds
            .entry(world_id)
            .or_insert_with(WorldCounts::seeded)
            .total
            .increment(faction);
        self.characters.insert(
            character_id,
            Tracked {
                world_id,
                faction,
                zone: None,
            },
        );
    }

    pub fn logout(&mut self, character_id: &CharacterId) {
        let Some(tracked) = self.characters.remove(character_id) else {
            return;
        };
        if let Some(counts) = self.worlds.get_mut(&tracked.world_id) {
            counts.total.decrement(tracked.faction);
            if let Some(zone) = tracked.zone {
                counts.zones.entry(zone).or_default().decrement(tracked.faction);
            }
        }
    }

    pub fn zone_action(
        &mut self,
        world_id: WorldId,
        zone_id: ZoneId,
        character_id: &CharacterId,
    ) -> ZoneOutcome {
        let Some(tracked) = self.characters.get_mut(character_id) else {
            return ZoneOutcome::Untracked;
        };
        if tracked.world_id != world_id {
            debug!(%character_id, tracked = %tracked.world_id, seen = %world_id, "zone action on a different world");
        }
        let counts = self
            .worlds
            .entry(tracked.world_id)
            .or_insert_with(WorldCounts::seeded);

        let Some(zone) = reference::zone(zone_id) else {
            let left = tracked.zone.take();
            if let Some(left) = left {
                counts.zones.entry(left).or_default().decrement(tracked.faction);
            }
            return ZoneOutcome::Cleared { left };
        };

        if tracked.zone == Some(zone.id) {
            return ZoneOutcome::Unchanged;
        }
        let left = tracked.zone.replace(zone.id);
        if let Some(left) = left {
            counts.zones.entry(left).or_default().decrement(tracked.faction);
        }
        counts.zones.entry(zone.id).or_default().increment(tracked.faction);
        ZoneOutcome::Entered { left }
    }

    /// Last known zone of an online character.
    pub fn last_zone(&self, character_id: &CharacterId) -> Option<ZoneId> {
        self.characters.get(character_id).and_then(|t| t.zone)
    }

    pub fn worlds(&self) -> BTreeMap<WorldId, FactionCounts> {
        self.worlds.iter().map(|(id, c)| (*id, c.total)).collect()
    }

    pub fn world(&self, world_id: WorldId) -> Result<WorldPopulation> {
        let world = reference::world(world_id)
            .filter(|w| w.platform == self.platform)
            .ok_or(TrackerError::UnknownWorld(world_id))?;
        let population = match self.worlds.get(&world_id) {
            Some(counts) => WorldPopulation {
                world_id,
                name: world.name,
                total: counts.total,
                zones: counts.zones.clone(),
            },
            None => WorldPopulation {
                world_id,
                name: world.name,
                total: FactionCounts::default(),
                zones: WorldCounts::seeded().zones,
            },
        };
        Ok(population)
    }
}
