use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::debug;

use super::currency::ExchangeRates;
use super::error::MigrationError;
use super::types::{CURRENT_SCHEMA_VERSION, Profile, Scenario};

const SCHEMA_VERSION: &str = "schemaVersion";

/// Documents written before versioning was introduced count as version 1.
fn schema_version(doc: &Map<String, Value>) -> u64 {
    doc.get(SCHEMA_VERSION).and_then(Value::as_u64).unwrap_or(1)
}

fn as_object(value: &mut Value) -> Result<&mut Map<String, Value>, MigrationError> {
    value.as_object_mut().ok_or(MigrationError::NotAnObject)
}

/// Brings a scenario document up to the current schema without deserializing it.
pub fn migrate_scenario(mut value: Value) -> Result<Value, MigrationError> {
    let doc = as_object(&mut value)?;
    let version = schema_version(doc);
    if version > CURRENT_SCHEMA_VERSION {
        return Err(MigrationError::UnsupportedVersion {
            found: version,
            latest: CURRENT_SCHEMA_VERSION,
        });
    }
    if version < 2 {
        scenario_v1_to_v2(doc)?;
    }
    Ok(value)
}

pub fn migrate_profile(mut value: Value) -> Result<Value, MigrationError> {
    let doc = as_object(&mut value)?;
    let version = schema_version(doc);
    if version > CURRENT_SCHEMA_VERSION {
        return Err(MigrationError::UnsupportedVersion {
            found: version,
            latest: CURRENT_SCHEMA_VERSION,
        });
    }
    if version < 2 {
        profile_v1_to_v2(doc)?;
    }
    Ok(value)
}

fn scenario_v1_to_v2(doc: &mut Map<String, Value>) -> Result<(), MigrationError> {
    if let Some(Value::Array(crashes)) = doc.get_mut("marketCrashes") {
        for (index, crash) in crashes.iter_mut().enumerate() {
            let Some(crash) = crash.as_object_mut() else {
                return Err(MigrationError::NotAnObject);
            };
            if crash.contains_key("drops") {
                continue;
            }
            if !crash.contains_key("age") {
                return Err(MigrationError::MissingField {
                    entity: "marketCrashes",
                    index,
                    field: "age",
                });
            }
            let Some(drop) = crash.remove("equityDrop") else {
                return Err(MigrationError::MissingField {
                    entity: "marketCrashes",
                    index,
                    field: "equityDrop",
                });
            };
            crash.insert(
                "drops".to_string(),
                json!([
                    { "assetClass": "Local Equity", "dropPercent": drop },
                    { "assetClass": "Offshore Equity", "dropPercent": drop },
                ]),
            );
        }
    }

    if let Some(annual) = doc.remove("annualExpenses") {
        doc.entry("expenses")
            .or_insert_with(|| json!({ "kind": "flat", "annualExpenses": annual }));
    }

    doc.insert(SCHEMA_VERSION.to_string(), json!(2));
    debug!("migrated scenario document from schema version 1");
    Ok(())
}

fn profile_v1_to_v2(doc: &mut Map<String, Value>) -> Result<(), MigrationError> {
    if let Some(Value::Array(categories)) = doc.get_mut("expenseCategories") {
        for category in categories.iter_mut() {
            let Some(category) = category.as_object_mut() else {
                return Err(MigrationError::NotAnObject);
            };
            category
                .entry("subcategories")
                .or_insert_with(|| Value::Array(Vec::new()));
        }
    }

    if let Some(Value::Object(settings)) = doc.get_mut("settings") {
        let base = settings
            .get("reportingCurrency")
            .and_then(Value::as_str)
            .unwrap_or("ZAR")
            .to_string();
        // v1 kept rates as a flat {"USD/ZAR": 18.5} map.
        let legacy = match settings.get("exchangeRates") {
            Some(Value::Object(rates)) if !rates.contains_key("base") => {
                Some(Value::Object(rates.clone()))
            }
            _ => None,
        };
        if let Some(legacy) = legacy {
            let pairs: BTreeMap<String, f64> = serde_json::from_value(legacy)?;
            let rates = ExchangeRates::from_legacy_pairs(&base, &pairs);
            settings.insert("exchangeRates".to_string(), serde_json::to_value(rates)?);
        }
    }

    doc.insert(SCHEMA_VERSION.to_string(), json!(2));
    debug!("migrated profile document from schema version 1");
    Ok(())
}

pub fn scenario_from_value(value: Value) -> Result<Scenario, MigrationError> {
    Ok(serde_json::from_value(migrate_scenario(value)?)?)
}

pub fn profile_from_value(value: Value) -> Result<Profile, MigrationError> {
    Ok(serde_json::from_value(migrate_profile(value)?)?)
}

pub fn load_scenario(json: &str) -> Result<Scenario, MigrationError> {
    scenario_from_value(serde_json::from_str(json)?)
}

/// Loads a JSON array of scenario documents, each migrated on its own.
pub fn load_scenarios(json: &str) -> Result<Vec<Scenario>, MigrationError> {
    let docs: Vec<Value> = serde_json::from_str(json)?;
    docs.into_iter().map(scenario_from_value).collect()
}

pub fn load_profile(json: &str) -> Result<Profile, MigrationError> {
    profile_from_value(serde_json::from_str(json)?)
}
