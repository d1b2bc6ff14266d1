//! Fixed reference data: platforms, worlds, zones and factions.
//!
//! Population accounting only knows about the zones listed here. Anything else
//! (VR training, Sanctuary, private instances) is uninteresting.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ModelError;
use crate::models::{WorldId, ZoneId};

/// An independently addressable game shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Pc,
    Ps4Us,
    Ps4Eu,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Pc, Platform::Ps4Us, Platform::Ps4Eu];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Pc => "pc",
            Platform::Ps4Us => "ps4us",
            Platform::Ps4Eu => "ps4eu",
        }
    }

    /// Environment name used by the push service for this platform.
    pub fn environment(self) -> &'static str {
        match self {
            Platform::Pc => "ps2",
            Platform::Ps4Us => "ps2ps4us",
            Platform::Ps4Eu => "ps2ps4eu",
        }
    }

    /// Worlds hosted on this platform, in id order.
    pub fn worlds(self) -> impl Iterator<Item = &'static World> {
        WORLDS.iter().filter(move |w| w.platform == self)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pc" => Ok(Platform::Pc),
            "ps4us" => Ok(Platform::Ps4Us),
            "ps4eu" => Ok(Platform::Ps4Eu),
            _ => Err(ModelError::UnknownPlatform(s.to_string())),
        }
    }
}

/// One of the game's opposing sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Faction {
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "vs")]
    Vs,
    #[serde(rename = "nc")]
    Nc,
    #[serde(rename = "tr")]
    Tr,
    #[serde(rename = "nso")]
    Nso,
}

impl Faction {
    pub fn from_id(id: u32) -> Self {
        match id {
            1 => Faction::Vs,
            2 => Faction::Nc,
            3 => Faction::Tr,
            4 => Faction::Nso,
            _ => Faction::Unknown,
        }
    }
}

impl FromStr for Faction {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Faction::from_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct World {
    pub id: WorldId,
    pub name: &'static str,
    pub platform: Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: &'static str,
}

pub const WORLDS: &[World] = &[
    World { id: WorldId(1), name: "Connery", platform: Platform::Pc },
    World { id: WorldId(10), name: "Miller", platform: Platform::Pc },
    World { id: WorldId(13), name: "Cobalt", platform: Platform::Pc },
    World { id: WorldId(17), name: "Emerald", platform: Platform::Pc },
    World { id: WorldId(19), name: "Jaeger", platform: Platform::Pc },
    World { id: WorldId(40), name: "SolTech", platform: Platform::Pc },
    World { id: WorldId(1000), name: "Genudine", platform: Platform::Ps4Us },
    World { id: WorldId(2000), name: "Ceres", platform: Platform::Ps4Eu },
];

pub const ZONES: &[Zone] = &[
    Zone { id: ZoneId(2), name: "Indar" },
    Zone { id: ZoneId(4), name: "Hossin" },
    Zone { id: ZoneId(6), name: "Amerish" },
    Zone { id: ZoneId(8), name: "Esamir" },
    Zone { id: ZoneId(14), name: "Koltyr" },
    Zone { id: ZoneId(344), name: "Oshur" },
];

pub fn world(id: WorldId) -> Option<&'static World> {
    WORLDS.iter().find(|w| w.id == id)
}

/// Looks a zone up by its definition, ignoring the instance bits.
pub fn zone(id: ZoneId) -> Option<&'static Zone> {
    let definition = id.definition();
    ZONES.iter().find(|z| z.id == definition)
}
