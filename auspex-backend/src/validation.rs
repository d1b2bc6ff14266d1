/// Input validation for the query routes
use arrayvec::ArrayString;
use thiserror::Error;

pub const MAX_IDS: usize = 100;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Id list cannot be empty")]
    IdsEmpty,

    #[error("Too many ids (max {max}, got {actual})")]
    TooManyIds { max: usize, actual: usize },

    #[error("Id {0:?} is not numeric")]
    IdNotNumeric(String),

    #[error("Id too long (max 24 characters, got {0})")]
    IdTooLong(usize),

    #[error("World id {0:?} is not a number")]
    WorldIdInvalid(String),
}

/// Parses a comma separated list of character or outfit ids
///
/// Rules:
/// - At least one id, at most 100
/// - Each id is 1 to 24 ASCII digits
/// - Blank entries are skipped, repeats collapse
pub fn parse_ids(raw: &str) -> Result<Vec<ArrayString<24>>, ValidationError> {
    let mut ids = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = parse_id(id)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err(ValidationError::IdsEmpty);
    }
    if ids.len() > MAX_IDS {
        return Err(ValidationError::TooManyIds {
            max: MAX_IDS,
            actual: ids.len(),
        });
    }
    Ok(ids)
}

fn parse_id(id: &str) -> Result<ArrayString<24>, ValidationError> {
    if !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::IdNotNumeric(id.to_string()));
    }
    ArrayString::from(id).map_err(|_| ValidationError::IdTooLong(id.len()))
}
