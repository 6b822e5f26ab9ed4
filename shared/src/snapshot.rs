//! World snapshot text format.
//!
//! `COD1GameState|` followed by one
//! `EntityID:<id>|PosX:<x>|PosY:<y>|PosZ:<z>|State:<state>|` group per entity,
//! coordinates printed with two decimals.

use crate::wire::ProtocolError;
use std::fmt::Write;

pub const SNAPSHOT_HEADER: &str = "COD1GameState|";

const FIELDS_PER_ENTITY: usize = 5;

/// An entity as seen by the network layer. Owned and simulated elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: i64,
    pub position: [f64; 3],
    pub state: String,
}

impl Entity {
    pub fn new(id: i64, position: [f64; 3], state: impl Into<String>) -> Self {
        Self {
            id,
            position,
            state: state.into(),
        }
    }
}

/// Serializes the snapshot body for the given entity set.
pub fn serialize_snapshot(entities: &[Entity]) -> String {
    let mut body = String::from(SNAPSHOT_HEADER);
    for entity in entities {
        let [x, y, z] = entity.position;
        // Writing into a String cannot fail.
        let _ = write!(
            body,
            "EntityID:{}|PosX:{:.2}|PosY:{:.2}|PosZ:{:.2}|State:{}|",
            entity.id, x, y, z, entity.state
        );
    }
    body
}

fn malformed(reason: String) -> ProtocolError {
    ProtocolError::Malformed {
        command: "snapshot",
        reason,
    }
}

fn value<'a>(field: &'a str, key: &str) -> Result<&'a str, ProtocolError> {
    field
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| malformed(format!("expected {} but found {:?}", key, field)))
}

fn coordinate(field: &str, key: &str) -> Result<f64, ProtocolError> {
    let raw = value(field, key)?;
    raw.parse()
        .map_err(|_| malformed(format!("bad {} value {:?}", key, raw)))
}

/// Parses a snapshot body back into entities.
pub fn parse_snapshot_body(body: &str) -> Result<Vec<Entity>, ProtocolError> {
    let rest = body
        .strip_prefix(SNAPSHOT_HEADER)
        .ok_or_else(|| malformed("missing header".to_string()))?;

    let fields: Vec<&str> = rest.split('|').filter(|f| !f.is_empty()).collect();
    if fields.len() % FIELDS_PER_ENTITY != 0 {
        return Err(malformed(format!(
            "{} fields is not a whole number of entities",
            fields.len()
        )));
    }

    fields
        .chunks(FIELDS_PER_ENTITY)
        .map(|group| {
            let raw_id = value(group[0], "EntityID")?;
            let id = raw_id
                .parse()
                .map_err(|_| malformed(format!("bad entity id {:?}", raw_id)))?;
            Ok(Entity {
                id,
                position: [
                    coordinate(group[1], "PosX")?,
                    coordinate(group[2], "PosY")?,
                    coordinate(group[3], "PosZ")?,
                ],
                state: value(group[4], "State")?.to_string(),
            })
        })
        .collect()
}
