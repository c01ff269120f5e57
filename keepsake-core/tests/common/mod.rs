/*!
Shared fixtures for integration tests: a cultivation-game state schema and
documents that satisfy or break it.
*/

#![allow(dead_code)]

use keepsake_core::{FieldRule, KeepsakeConfig, MemoryStore, SaveStore, Schema};
use serde_json::{json, Value};

pub const SCHEMA_VERSION: &str = "1.2.0";

pub fn game_schema() -> Schema {
    Schema::new(
        SCHEMA_VERSION,
        vec![
            FieldRule::object("meta")
                .required()
                .default_value(json!({"version": SCHEMA_VERSION, "createdAt": 0})),
            FieldRule::string("meta.version").required().default_value(json!(SCHEMA_VERSION)),
            FieldRule::integer("meta.createdAt").required().min(0.0),
            FieldRule::number("jade").required().min(0.0),
            FieldRule::number("spiritCrystals").required().min(0.0),
            FieldRule::integer("qi.level").required().range(1.0, 100.0).default_value(json!(1)),
            FieldRule::number("qi.current").required().min(0.0),
            FieldRule::string("realm")
                .required()
                .allowed([json!("mortal"), json!("foundation"), json!("core"), json!("nascent")])
                .default_value(json!("mortal")),
            FieldRule::array("inventory").optional().max_length(64),
        ],
    )
    .expect("game schema is valid")
}

pub fn valid_state() -> Value {
    json!({
        "meta": {"version": SCHEMA_VERSION, "createdAt": 1_700_000_000_000i64},
        "jade": 250,
        "spiritCrystals": 12.5,
        "qi": {"level": 14, "current": 830.25},
        "realm": "foundation",
        "inventory": ["jade slip", "spirit herb"],
        "settings": {"music": false}
    })
}

/// Negative jade, out-of-range qi level, non-numeric crystals, no meta block
pub fn corrupted_state() -> Value {
    json!({
        "jade": -50,
        "spiritCrystals": "lots",
        "qi": {"level": 500, "current": 10},
        "realm": "mortal",
        "unknownFutureField": {"keep": "me"}
    })
}

pub fn memory_store() -> SaveStore<MemoryStore> {
    SaveStore::new(MemoryStore::new(), game_schema())
}

pub fn memory_store_with(config: &KeepsakeConfig) -> SaveStore<MemoryStore> {
    SaveStore::with_config(MemoryStore::new(), game_schema(), config).expect("config is valid")
}
