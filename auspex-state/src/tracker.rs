//! Presence and population tracking per platform.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::{Result, TrackerError};
use crate::models::{CharacterId, OutfitId, PlayerLogin, PlayerLogout, WorldId, ZoneId};
use crate::online::{LoginOutcome, OnlineCharacter, OnlineIndex};
use crate::population::{FactionCounts, PopulationFolder, WorldPopulation, ZoneOutcome};
use crate::reference::Platform;

/// Online index and population counters for one platform.
///
/// Only the platform's event-handling task writes to a tracker. Reads hand out
/// copies, so callers never observe later mutations.
#[derive(Debug)]
pub struct PlatformTracker {
    platform: Platform,
    online: RwLock<OnlineIndex>,
    population: RwLock<PopulationFolder>,
}

impl PlatformTracker {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            online: RwLock::new(OnlineIndex::new()),
            population: RwLock::new(PopulationFolder::new(platform)),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub async fn handle_login(&self, login: &PlayerLogin) {
        let outcome = self.online.write().await.login(OnlineCharacter {
            character_id: login.character_id,
            outfit_id: login.outfit_id,
            world_id: login.world_id,
            faction: login.faction,
            since: login.timestamp,
        });
        self.population
            .write()
            .await
            .login(login.character_id, login.world_id, login.faction);

        match outcome {
            LoginOutcome::Added => {
                debug!(platform = %self.platform, character_id = %login.character_id, "character online")
            }
            LoginOutcome::Moved { from } => debug!(
                platform = %self.platform,
                character_id = %login.character_id,
                from = ?from,
                to = ?login.outfit_id,
                "character changed outfit"
            ),
            LoginOutcome::Relocated => debug!(
                platform = %self.platform,
                character_id = %login.character_id,
                world_id = %login.world_id,
                faction = ?login.faction,
                "character changed world or faction"
            ),
            LoginOutcome::Unchanged => {
                trace!(character_id = %login.character_id, "repeat login ignored")
            }
        }
    }

    pub async fn handle_logout(&self, logout: &PlayerLogout) {
        let removed = self.online.write().await.logout(&logout.character_id);
        self.population.write().await.logout(&logout.character_id);
        if removed.is_some() {
            debug!(platform = %self.platform, character_id = %logout.character_id, "character offline");
        }
    }

    pub async fn handle_zone_action(
        &self,
        world_id: WorldId,
        zone_id: ZoneId,
        character_id: &CharacterId,
    ) -> ZoneOutcome {
        self.population
            .write()
            .await
            .zone_action(world_id, zone_id, character_id)
    }

    pub async fn online_characters(
        &self,
        ids: &[CharacterId],
    ) -> HashMap<CharacterId, OnlineCharacter> {
        self.online.read().await.characters(ids)
    }

    pub async fn outfit_members_online(
        &self,
        outfit_ids: &[OutfitId],
    ) -> HashMap<OutfitId, HashMap<CharacterId, OnlineCharacter>> {
        self.online.read().await.outfit_members(outfit_ids)
    }

    pub async fn online_count(&self) -> usize {
        self.online.read().await.len()
    }

    pub async fn last_zone(&self, character_id: &CharacterId) -> Option<ZoneId> {
        self.population.read().await.last_zone(character_id)
    }

    pub async fn worlds_population(&self) -> BTreeMap<WorldId, FactionCounts> {
        self.population.read().await.worlds()
    }

    pub async fn detailed_world_population(&self, world_id: WorldId) -> Result<WorldPopulation> {
        self.population.read().await.world(world_id)
    }
}

/// Registry of the trackers for every tracked platform.
/// Uses scc::HashMap for lock-free concurrent access.
pub struct Trackers {
    platforms: scc::HashMap<Platform, Arc<PlatformTracker>>,
}

impl Trackers {
    pub fn new() -> Self {
        Self {
            platforms: scc::HashMap::new(),
        }
    }

    /// Start tracking a platform, returning its tracker. Tracking the same
    /// platform twice returns the existing tracker.
    pub async fn track(&self, platform: Platform) -> Arc<PlatformTracker> {
        let tracker = Arc::new(PlatformTracker::new(platform));
        match self.platforms.insert_async(platform, tracker.clone()).await {
            Ok(()) => tracker,
            Err((platform, _)) => self
                .platforms
                .read_async(&platform, |_, existing| existing.clone())
                .await
                .unwrap_or(tracker),
        }
    }

    pub async fn get(&self, platform: Platform) -> Result<Arc<PlatformTracker>> {
        self.platforms
            .read_async(&platform, |_, tracker| tracker.clone())
            .await
            .ok_or(TrackerError::PlatformNotTracked(platform))
    }

    pub async fn online_characters(
        &self,
        platform: Platform,
        ids: &[CharacterId],
    ) -> Result<HashMap<CharacterId, OnlineCharacter>> {
        Ok(self.get(platform).await?.online_characters(ids).await)
    }

    pub async fn online_outfit_members(
        &self,
        platform: Platform,
        outfit_ids: &[OutfitId],
    ) -> Result<HashMap<OutfitId, HashMap<CharacterId, OnlineCharacter>>> {
        Ok(self.get(platform).await?.outfit_members_online(outfit_ids).await)
    }

    pub async fn worlds_population(
        &self,
        platform: Platform,
    ) -> Result<BTreeMap<WorldId, FactionCounts>> {
        Ok(self.get(platform).await?.worlds_population().await)
    }

    pub async fn detailed_world_population(
        &self,
        platform: Platform,
        world_id: WorldId,
    ) -> Result<WorldPopulation> {
        self.get(platform)
            .await?
            .detailed_world_population(world_id)
            .await
    }
}

impl Default for Trackers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Faction;

    fn login(character: &str, outfit: Option<&str>, faction: Faction) -> PlayerLogin {
        PlayerLogin {
            character_id: CharacterId::from(character).unwrap(),
            world_id: WorldId(1),
            faction,
            outfit_id: outfit.map(|o| OutfitId::from(o).unwrap()),
            timestamp: 1,
        }
    }

    fn logout(character: &str) -> PlayerLogout {
        PlayerLogout {
            character_id: CharacterId::from(character).unwrap(),
            world_id: WorldId(1),
            faction: Faction::Unknown,
            outfit_id: None,
            timestamp: 2,
        }
    }

    #[tokio::test]
    async fn test_login_then_logout_round_trip() {
        let tracker = PlatformTracker::new(Platform::Pc);
        tracker.handle_login(&login("a", Some("o1"), Faction::Nc)).await;

        assert_eq!(tracker.worlds_population().await[&WorldId(1)].nc, 1);
        assert_eq!(tracker.online_count().await, 1);

        tracker.handle_logout(&logout("a")).await;
        assert_eq!(tracker.worlds_population().await[&WorldId(1)].nc, 0);
        assert_eq!(tracker.online_count().await, 0);
    }

    #[tokio::test]
    async fn test_outfit_move_is_visible_to_readers() {
        let tracker = PlatformTracker::new(Platform::Pc);
        tracker.handle_login(&login("a", Some("o1"), Faction::Vs)).await;
        tracker.handle_login(&login("a", Some("o2"), Faction::Vs)).await;

        let o1 = OutfitId::from("o1").unwrap();
        let o2 = OutfitId::from("o2").unwrap();
        let members = tracker.outfit_members_online(&[o1, o2]).await;
        assert!(members[&o1].is_empty());
        assert_eq!(members[&o2].len(), 1);
        assert_eq!(tracker.worlds_population().await[&WorldId(1)].vs, 1);
    }

    #[tokio::test]
    async fn test_relogin_same_outfit_other_world_keeps_views_consistent() {
        let tracker = PlatformTracker::new(Platform::Pc);
        tracker.handle_login(&login("a", Some("9"), Faction::Nc)).await;
        let mut moved = login("a", Some("9"), Faction::Tr);
        moved.world_id = WorldId(17);
        tracker.handle_login(&moved).await;

        let a = CharacterId::from("a").unwrap();
        let online = tracker.online_characters(&[a]).await;
        assert_eq!(online[&a].world_id, WorldId(17));
        assert_eq!(online[&a].faction, Faction::Tr);

        let worlds = tracker.worlds_population().await;
        assert_eq!(worlds[&WorldId(1)].nc, 0);
        assert_eq!(worlds[&WorldId(17)].tr, 1);
    }

    #[tokio::test]
    async fn test_registry_rejects_untracked_platform() {
        let trackers = Trackers::new();
        trackers.track(Platform::Pc).await;

        assert!(trackers.worlds_population(Platform::Pc).await.is_ok());
        assert_eq!(
            trackers.worlds_population(Platform::Ps4Eu).await.unwrap_err(),
            TrackerError::PlatformNotTracked(Platform::Ps4Eu)
        );
    }

    #[tokio::test]
    async fn test_tracking_twice_returns_same_tracker() {
        let trackers = Trackers::new();
        let first = trackers.track(Platform::Pc).await;
        let second = trackers.track(Platform::Pc).await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_detailed_population_for_foreign_world() {
        let trackers = Trackers::new();
        trackers.track(Platform::Ps4Us).await;

        let err = trackers
            .detailed_world_population(Platform::Ps4Us, WorldId(1))
            .await
            .unwrap_err();
        assert_eq!(err, TrackerError::UnknownWorld(WorldId(1)));
    }
}
