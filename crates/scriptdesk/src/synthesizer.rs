//! Turns a resource analysis document into persisted resources.
//!
//! Expected shape:
//!
//! ```json
//! {
//!   "resources_by_type": {"prop": ["mask", "rope"], "sound": ["alarm"]},
//!   "scene_distribution": {"mask": {"first_appearance": 2}}
//! }
//! ```
//!
//! Anything else in the document is ignored. Missing or mistyped keys yield
//! no candidates rather than an error.

use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::db::resource_repo::{self, NewResource, ResourceRow};
use crate::db::{Database, DatabaseError};
use crate::resources::{ResourcePriority, ResourceStatus};

/// One (type, name) pair found in the analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: String,
    pub name: String,
    pub scene_number: Option<u32>,
}

fn scene_distribution(analysis: &Value) -> Option<&Map<String, Value>> {
    analysis.get("scene_distribution").and_then(Value::as_object)
}

fn first_appearance(distribution: Option<&Map<String, Value>>, name: &str) -> Option<u32> {
    distribution?
        .get(name)?
        .get("first_appearance")?
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
}

/// Extracts every (type, name) pair in document order. Non-string and
/// empty names are skipped.
pub fn candidates(analysis: &Value) -> Vec<Candidate> {
    let Some(by_type) = analysis.get("resources_by_type").and_then(Value::as_object) else {
        return Vec::new();
    };
    let distribution = scene_distribution(analysis);

    by_type
        .iter()
        .filter_map(|(kind, names)| names.as_array().map(|names| (kind, names)))
        .flat_map(|(kind, names)| {
            names
                .iter()
                .filter_map(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(move |name| Candidate {
                    kind: kind.clone(),
                    name: name.to_string(),
                    scene_number: first_appearance(distribution, name),
                })
        })
        .collect()
}

/// Creates a pending, medium-priority resource for every candidate that has
/// no (script_id, name, type) match yet. Existing resources are never
/// modified. Returns only the rows created by this call; all of them or
/// none are stored.
pub fn synthesize(
    db: &Database,
    script_id: i64,
    resource_analysis: &Value,
) -> Result<Vec<ResourceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let created = synthesize_on(&tx, script_id, resource_analysis)?;
        tx.commit()?;
        Ok(created)
    })
}

/// [`synthesize`] inside a transaction owned by the caller.
pub(crate) fn synthesize_on(
    conn: &Connection,
    script_id: i64,
    resource_analysis: &Value,
) -> Result<Vec<ResourceRow>, DatabaseError> {
    let mut created = Vec::new();
    for candidate in candidates(resource_analysis) {
        let new = NewResource {
            script_id,
            scene_number: candidate.scene_number,
            name: candidate.name,
            kind: candidate.kind,
            status: ResourceStatus::Pending,
            priority: ResourcePriority::Medium,
            ..Default::default()
        };
        if let Some(row) = resource_repo::insert_if_absent_on(conn, &new)? {
            created.push(row);
        }
    }

    if !created.is_empty() {
        log::info!(
            "Synthesized {} resources for script {}",
            created.len(),
            script_id
        );
    }
    Ok(created)
}

/// Updates `scene_number` of existing resources from a newer analysis.
/// Resources the analysis does not mention are left alone. Returns the
/// number of rows changed.
pub fn refresh_scene_numbers(
    db: &Database,
    script_id: i64,
    resource_analysis: &Value,
) -> Result<usize, DatabaseError> {
    let Some(distribution) = scene_distribution(resource_analysis) else {
        return Ok(0);
    };

    let mut updated = 0;
    for resource in resource_repo::list_for_script(db, script_id)? {
        let Some(scene_number) = first_appearance(Some(distribution), &resource.name) else {
            continue;
        };
        if resource.scene_number != Some(scene_number)
            && resource_repo::update_scene_number(db, resource.id, Some(scene_number))?
        {
            updated += 1;
        }
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::script_repo::{self, NewScript};
    use serde_json::json;

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let script = script_repo::insert(
            &db,
            &NewScript {
                project_id: None,
                title: "Heist".to_string(),
                filename: "heist.txt".to_string(),
                file_path: "/heist.txt".to_string(),
                mime_type: None,
            },
        )
        .unwrap();
        (db, script.id)
    }

    fn heist_analysis() -> Value {
        json!({
            "resources_by_type": {"prop": ["mask", "rope"], "sound": ["alarm"]},
            "scene_distribution": {"mask": {"first_appearance": 1}, "alarm": {"first_appearance": 2}}
        })
    }

    #[test]
    fn test_candidates_carry_scene_numbers() {
        let found = candidates(&heist_analysis());
        assert_eq!(found.len(), 3);
        let mask = found.iter().find(|c| c.name == "mask").unwrap();
        assert_eq!(mask.kind, "prop");
        assert_eq!(mask.scene_number, Some(1));
        let rope = found.iter().find(|c| c.name == "rope").unwrap();
        assert_eq!(rope.scene_number, None);
    }

    #[test]
    fn test_malformed_documents_yield_nothing() {
        assert!(candidates(&json!(null)).is_empty());
        assert!(candidates(&json!({"resources_by_type": ["mask"]})).is_empty());
        assert!(candidates(&json!({"resources_by_type": {"prop": "mask"}})).is_empty());

        let mixed = json!({"resources_by_type": {"prop": ["mask", 3, "", null]}});
        assert_eq!(candidates(&mixed).len(), 1);
    }

    #[test]
    fn test_bad_first_appearance_is_null() {
        let analysis = json!({
            "resources_by_type": {"prop": ["a", "b", "c"]},
            "scene_distribution": {
                "a": {"first_appearance": -1},
                "b": {"first_appearance": "two"},
                "c": 4
            }
        });
        assert!(candidates(&analysis).iter().all(|c| c.scene_number.is_none()));
    }

    #[test]
    fn test_synthesize_creates_pending_medium() {
        let (db, script_id) = setup();
        let created = synthesize(&db, script_id, &heist_analysis()).unwrap();

        assert_eq!(created.len(), 3);
        for row in &created {
            assert_eq!(row.status, ResourceStatus::Pending);
            assert_eq!(row.priority, ResourcePriority::Medium);
            assert_eq!(row.script_id, script_id);
        }
        let alarm = created.iter().find(|r| r.name == "alarm").unwrap();
        assert_eq!(alarm.kind, "sound");
        assert_eq!(alarm.scene_number, Some(2));
    }

    #[test]
    fn test_synthesize_is_idempotent() {
        let (db, script_id) = setup();
        synthesize(&db, script_id, &heist_analysis()).unwrap();
        let second = synthesize(&db, script_id, &heist_analysis()).unwrap();

        assert!(second.is_empty());
        assert_eq!(resource_repo::list_for_script(&db, script_id).unwrap().len(), 3);
    }

    #[test]
    fn test_synthesize_does_not_touch_existing() {
        let (db, script_id) = setup();
        let existing = resource_repo::insert(
            &db,
            &NewResource {
                script_id,
                name: "mask".to_string(),
                kind: "prop".to_string(),
                status: ResourceStatus::Ready,
                priority: ResourcePriority::Urgent,
                ..Default::default()
            },
        )
        .unwrap();

        let created = synthesize(&db, script_id, &heist_analysis()).unwrap();
        assert_eq!(created.len(), 2);

        let still = resource_repo::find_by_id(&db, existing.id).unwrap().unwrap();
        assert_eq!(still, existing);
    }

    #[test]
    fn test_same_name_different_type_is_distinct() {
        let (db, script_id) = setup();
        let analysis = json!({"resources_by_type": {"prop": ["radio"], "sound": ["radio"]}});
        assert_eq!(synthesize(&db, script_id, &analysis).unwrap().len(), 2);
    }

    #[test]
    fn test_refresh_scene_numbers() {
        let (db, script_id) = setup();
        synthesize(&db, script_id, &heist_analysis()).unwrap();

        let newer = json!({
            "scene_distribution": {"mask": {"first_appearance": 5}, "alarm": {"first_appearance": 2}}
        });
        assert_eq!(refresh_scene_numbers(&db, script_id, &newer).unwrap(), 1);

        let rows = resource_repo::list_for_script(&db, script_id).unwrap();
        let mask = rows.iter().find(|r| r.name == "mask").unwrap();
        let rope = rows.iter().find(|r| r.name == "rope").unwrap();
        assert_eq!(mask.scene_number, Some(5));
        assert_eq!(rope.scene_number, None);
    }
}
