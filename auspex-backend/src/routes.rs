use crate::error::AppError;
use crate::validation::{self, ValidationError};
use crate::AppState;

use auspex_state::{CharacterId, FactionCounts, OnlineCharacter, OutfitId, Platform, WorldId, WorldPopulation};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_macros::debug_handler;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Deserialize)]
pub(crate) struct IdsQuery {
    #[serde(default)]
    ids: String,
}

#[derive(Serialize)]
pub(crate) struct WorldSummary {
    world_id: WorldId,
    name: &'static str,
    population: FactionCounts,
}

fn platform(raw: &str) -> Result<Platform, AppError> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("Unknown platform {raw:?}")))
}

#[debug_handler]
pub(crate) async fn characters(
    State(state): State<Arc<AppState>>,
    Path(raw_platform): Path<String>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<HashMap<CharacterId, OnlineCharacter>>, AppError> {
    let platform = platform(&raw_platform)?;
    let ids = validation::parse_ids(&query.ids)?;

    let online = state.trackers.online_characters(platform, &ids).await?;
    Ok(Json(online))
}

#[debug_handler]
pub(crate) async fn outfits(
    State(state): State<Arc<AppState>>,
    Path(raw_platform): Path<String>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<HashMap<OutfitId, HashMap<CharacterId, OnlineCharacter>>>, AppError> {
    let platform = platform(&raw_platform)?;
    let ids = validation::parse_ids(&query.ids)?;

    let members = state.trackers.online_outfit_members(platform, &ids).await?;
    Ok(Json(members))
}

pub(crate) async fn population(
    State(state): State<Arc<AppState>>,
    Path(raw_platform): Path<String>,
) -> Result<Json<Vec<WorldSummary>>, AppError> {
    let platform = platform(&raw_platform)?;
    let worlds: BTreeMap<WorldId, FactionCounts> =
        state.trackers.worlds_population(platform).await?;

    let summaries = worlds
        .into_iter()
        .map(|(world_id, population)| WorldSummary {
            world_id,
            name: auspex_state::reference::world(world_id).map_or("unknown", |w| w.name),
            population,
        })
        .collect();
    Ok(Json(summaries))
}

pub(crate) async fn world_population(
    State(state): State<Arc<AppState>>,
    Path((raw_platform, raw_world)): Path<(String, String)>,
) -> Result<Json<WorldPopulation>, AppError> {
    let platform = platform(&raw_platform)?;
    let world_id: WorldId = raw_world
        .parse()
        .map_err(|_| ValidationError::WorldIdInvalid(raw_world.clone()))?;

    let world = state
        .trackers
        .detailed_world_population(platform, world_id)
        .await?;
    Ok(Json(world))
}
