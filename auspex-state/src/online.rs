//! Online index for a single platform.
//!
//! Characters are bucketed by outfit, with a reverse index from character to
//! entry so add/move/remove stay O(1). Data is rebuilt from the live stream on
//! restart, so durability isn't needed.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{CharacterId, OutfitId, WorldId};
use crate::reference::Faction;

/// A character currently online.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineCharacter {
    pub character_id: CharacterId,
    pub outfit_id: Option<OutfitId>,
    pub world_id: WorldId,
    pub faction: Faction,
    /// Upstream timestamp of the login that brought the character online.
    pub since: u64,
}

/// What a login did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Added,
    Moved { from: Option<OutfitId> },
    /// Same outfit, but the world or faction changed.
    Relocated,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct OnlineIndex {
    outfits: HashMap<OutfitId, HashMap<CharacterId, OnlineCharacter>>,
    characters: HashMap<CharacterId, OnlineCharacter>,
}

impl OnlineIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a login. A repeat login into the same outfit, world and faction
    /// changes nothing; a login into another outfit moves the character.
    pub fn login(&mut self, entry: OnlineCharacter) -> LoginOutcome {
        let outcome = match self.characters.get(&entry.character_id) {
            Some(existing)
                if existing.outfit_id == entry.outfit_id
                    && existing.world_id == entry.world_id
                    && existing.faction == entry.faction =>
            {
                return LoginOutcome::Unchanged;
            }
            Some(existing) if existing.outfit_id == entry.outfit_id => LoginOutcome::Relocated,
            Some(existing) => {
                let from = existing.outfit_id;
                self.remove_from_outfit(from, &entry.character_id);
                LoginOutcome::Moved { from }
            }
            None => LoginOutcome::Added,
        };

        if let Some(outfit_id) = entry.outfit_id {
            self.outfits
                .entry(outfit_id)
                .or_default()
                .insert(entry.character_id, entry.clone());
        }
        self.characters.insert(entry.character_id, entry);
        outcome
    }

    /// Record a logout. Untracked characters are ignored.
    pub fn logout(&mut self, character_id: &CharacterId) -> Option<OnlineCharacter> {
        let removed = self.characters.remove(character_id)?;
        self.remove_from_outfit(removed.outfit_id, character_id);
        Some(removed)
    }

    fn remove_from_outfit(&mut self, outfit_id: Option<OutfitId>, character_id: &CharacterId) {
        let Some(outfit_id) = outfit_id else {
            return;
        };
        if let Some(members) = self.outfits.get_mut(&outfit_id) {
            members.remove(character_id);
            if members.is_empty() {
                self.outfits.remove(&outfit_id);
            }
        }
    }

    pub fn get(&self, character_id: &CharacterId) -> Option<&OnlineCharacter> {
        self.characters.get(character_id)
    }

    /// Copies of the requested characters that are online.
    pub fn characters(&self, ids: &[CharacterId]) -> HashMap<CharacterId, OnlineCharacter> {
        ids.iter()
            .filter_map(|id| self.characters.get(id).map(|c| (*id, c.clone())))
            .collect()
    }

    /// Copies of the online members of each requested outfit. Outfits with no
    /// one online map to an empty set.
    pub fn outfit_members(
        &self,
        outfit_ids: &[OutfitId],
    ) -> HashMap<OutfitId, HashMap<CharacterId, OnlineCharacter>> {
        outfit_ids
            .iter()
            .map(|id| (*id, self.outfits.get(id).cloned().unwrap_or_default()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> CharacterId {
        CharacterId::from(s).unwrap()
    }

    fn outfit(s: &str) -> OutfitId {
        OutfitId::from(s).unwrap()
    }

    fn online(character: &str, outfit_id: Option<&str>) -> OnlineCharacter {
        OnlineCharacter {
            character_id: id(character),
            outfit_id: outfit_id.map(outfit),
            world_id: WorldId(1),
            faction: Faction::Nc,
            since: 100,
        }
    }

    #[test]
    fn test_login_adds_to_outfit_bucket() {
        let mut index = OnlineIndex::new();
        assert_eq!(index.login(online("a", Some("o1"))), LoginOutcome::Added);

        let members = index.outfit_members(&[outfit("o1")]);
        assert!(members[&outfit("o1")].contains_key(&id("a")));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_repeat_login_same_outfit_is_noop() {
        let mut index = OnlineIndex::new();
        index.login(online("a", Some("o1")));
        let before = index.characters(&[id("a")]);

        let mut again = online("a", Some("o1"));
        again.since = 999;
        assert_eq!(index.login(again), LoginOutcome::Unchanged);

        assert_eq!(index.characters(&[id("a")]), before);
        assert_eq!(index.outfit_members(&[outfit("o1")])[&outfit("o1")].len(), 1);
    }

    #[test]
    fn test_login_into_other_outfit_moves_character() {
        let mut index = OnlineIndex::new();
        index.login(online("a", Some("o1")));

        let outcome = index.login(online("a", Some("o2")));
        assert_eq!(outcome, LoginOutcome::Moved { from: Some(outfit("o1")) });

        let members = index.outfit_members(&[outfit("o1"), outfit("o2")]);
        assert!(members[&outfit("o1")].is_empty());
        assert!(members[&outfit("o2")].contains_key(&id("a")));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_login_same_outfit_other_world_replaces_entry() {
        let mut index = OnlineIndex::new();
        index.login(online("a", Some("o1")));

        let mut elsewhere = online("a", Some("o1"));
        elsewhere.world_id = WorldId(17);
        elsewhere.faction = Faction::Tr;
        assert_eq!(index.login(elsewhere), LoginOutcome::Relocated);

        let entry = index.get(&id("a")).unwrap();
        assert_eq!((entry.world_id, entry.faction), (WorldId(17), Faction::Tr));
        let members = index.outfit_members(&[outfit("o1")]);
        assert_eq!(members[&outfit("o1")][&id("a")].world_id, WorldId(17));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_character_without_outfit() {
        let mut index = OnlineIndex::new();
        index.login(online("a", None));
        assert!(index.get(&id("a")).is_some());

        index.login(online("a", Some("o1")));
        assert_eq!(index.get(&id("a")).unwrap().outfit_id, Some(outfit("o1")));
    }

    #[test]
    fn test_logout_removes_everywhere() {
        let mut index = OnlineIndex::new();
        index.login(online("a", Some("o1")));
        index.login(online("b", Some("o1")));

        assert!(index.logout(&id("a")).is_some());
        let members = index.outfit_members(&[outfit("o1")]);
        assert_eq!(members[&outfit("o1")].len(), 1);
        assert!(index.characters(&[id("a")]).is_empty());
    }

    #[test]
    fn test_logout_of_untracked_character_is_noop() {
        let mut index = OnlineIndex::new();
        assert!(index.logout(&id("ghost")).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let mut index = OnlineIndex::new();
        index.login(online("a", Some("o1")));
        let snapshot = index.outfit_members(&[outfit("o1")]);

        index.logout(&id("a"));
        assert!(snapshot[&outfit("o1")].contains_key(&id("a")));
    }
}
