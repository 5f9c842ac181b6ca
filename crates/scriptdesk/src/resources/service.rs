//! Resource CRUD with validation and change notifications.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use super::{ResourcePriority, ResourceStatus};
use crate::db::resource_repo::{self, NewResource, ResourceFilter, ResourceRow};
use crate::db::{now_timestamp, script_repo, Database};
use crate::error::{Result, ScriptDeskError, ValidationError};
use crate::notify::{topics, NotificationHub, NotificationKind, ResourceAction};

/// One page of a filtered listing plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct ResourcePage {
    pub items: Vec<ResourceRow>,
    pub total: u64,
}

// Distinguishes an absent key (`None`) from an explicit `null` (`Some(None)`).
pub(crate) fn explicit<'de, T, D>(
    deserializer: D,
) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update. `None` leaves a field unchanged; for nullable fields
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResourcePatch {
    #[serde(default, deserialize_with = "explicit")]
    pub scene_number: Option<Option<u32>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "explicit")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<ResourceStatus>,
    #[serde(default)]
    pub priority: Option<ResourcePriority>,
    #[serde(default, deserialize_with = "explicit")]
    pub estimated_budget: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit")]
    pub actual_budget: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit")]
    pub responsible_person: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit")]
    pub needed_by: Option<Option<String>>,
}

impl ResourcePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(self, row: &mut ResourceRow) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }
        set(&mut row.scene_number, self.scene_number);
        set(&mut row.name, self.name);
        set(&mut row.kind, self.kind);
        set(&mut row.description, self.description);
        set(&mut row.status, self.status);
        set(&mut row.priority, self.priority);
        set(&mut row.estimated_budget, self.estimated_budget);
        set(&mut row.actual_budget, self.actual_budget);
        set(&mut row.responsible_person, self.responsible_person);
        set(&mut row.notes, self.notes);
        set(&mut row.needed_by, self.needed_by);
    }
}

/// Checks a `YYYY-MM-DD` date field.
pub(crate) fn check_date(
    field: &'static str,
    value: Option<&str>,
) -> std::result::Result<(), ValidationError> {
    match value {
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field,
                reason: format!("'{}' is not a YYYY-MM-DD date: {}", value, e),
            }),
        None => Ok(()),
    }
}

fn check_budget(field: &'static str, value: Option<f64>) -> std::result::Result<(), ValidationError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ValidationError::InvalidField {
            field,
            reason: format!("{} is not a non-negative amount", v),
        }),
        _ => Ok(()),
    }
}

fn check_fields(
    name: &str,
    kind: &str,
    estimated_budget: Option<f64>,
    actual_budget: Option<f64>,
    needed_by: Option<&str>,
) -> std::result::Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyField { field: "name" });
    }
    if kind.trim().is_empty() {
        return Err(ValidationError::EmptyField { field: "type" });
    }
    check_budget("estimated_budget", estimated_budget)?;
    check_budget("actual_budget", actual_budget)?;
    check_date("needed_by", needed_by)
}

/// Request-time resource operations. Errors are returned to the caller,
/// never recorded on rows.
#[derive(Clone)]
pub struct ResourceService {
    db: Database,
    hub: NotificationHub,
}

impl ResourceService {
    pub fn new(db: Database, hub: NotificationHub) -> Self {
        Self { db, hub }
    }

    pub fn list(&self, filter: &ResourceFilter) -> Result<ResourcePage> {
        let (items, total) = resource_repo::query(&self.db, filter)?;
        Ok(ResourcePage { items, total })
    }

    pub fn get(&self, id: i64) -> Result<ResourceRow> {
        resource_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| ScriptDeskError::not_found("resource", id))
    }

    pub fn create(&self, new: NewResource) -> Result<ResourceRow> {
        let new = NewResource {
            name: new.name.trim().to_string(),
            kind: new.kind.trim().to_string(),
            ..new
        };
        check_fields(
            &new.name,
            &new.kind,
            new.estimated_budget,
            new.actual_budget,
            new.needed_by.as_deref(),
        )?;
        if script_repo::find_by_id(&self.db, new.script_id)?.is_none() {
            return Err(ScriptDeskError::not_found("script", new.script_id));
        }

        let row = resource_repo::insert(&self.db, &new)?;
        log::info!(
            "Created resource {} '{}' ({}) for script {}",
            row.id,
            row.name,
            row.kind,
            row.script_id
        );
        self.notify(&row, ResourceAction::Created);
        Ok(row)
    }

    pub fn update(&self, id: i64, patch: ResourcePatch) -> Result<ResourceRow> {
        let mut row = self.get(id)?;
        if patch.is_empty() {
            return Ok(row);
        }

        patch.apply(&mut row);
        row.name = row.name.trim().to_string();
        row.kind = row.kind.trim().to_string();
        check_fields(
            &row.name,
            &row.kind,
            row.estimated_budget,
            row.actual_budget,
            row.needed_by.as_deref(),
        )?;
        row.updated_at = now_timestamp();

        if !resource_repo::update(&self.db, &row)? {
            return Err(ScriptDeskError::not_found("resource", id));
        }
        log::debug!("Updated resource {}", id);
        self.notify(&row, ResourceAction::Updated);
        Ok(row)
    }

    pub fn set_status(&self, id: i64, status: ResourceStatus) -> Result<ResourceRow> {
        if !resource_repo::update_status(&self.db, id, status)? {
            return Err(ScriptDeskError::not_found("resource", id));
        }
        let row = self.get(id)?;
        log::debug!("Resource {} is now {}", id, status);
        self.notify(&row, ResourceAction::Updated);
        Ok(row)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let row = self.get(id)?;
        if !resource_repo::delete(&self.db, id)? {
            return Err(ScriptDeskError::not_found("resource", id));
        }
        log::info!("Deleted resource {} '{}'", id, row.name);
        self.notify(&row, ResourceAction::Deleted);
        Ok(())
    }

    fn notify(&self, row: &ResourceRow, action: ResourceAction) {
        self.hub.publish_to(
            &[topics::SCRIPTS.to_string(), topics::script(row.script_id)],
            NotificationKind::ResourceUpdate {
                script_id: row.script_id,
                resource_id: Some(row.id),
                action,
                count: 1,
                message: format!("Resource '{}' {}", row.name, action.as_str()),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::script_repo::NewScript;
    use serde_json::json;

    fn setup() -> (ResourceService, i64) {
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
        let hub = NotificationHub::new(16);
        hub.start();
        (ResourceService::new(db, hub), script.id)
    }

    fn mask(script_id: i64) -> NewResource {
        NewResource {
            script_id,
            name: "mask".to_string(),
            kind: "prop".to_string(),
            estimated_budget: Some(40.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get() {
        let (service, script_id) = setup();
        let created = service.create(mask(script_id)).unwrap();
        assert_eq!(created.status, ResourceStatus::Pending);
        assert_eq!(created.priority, ResourcePriority::Medium);
        assert_eq!(service.get(created.id).unwrap(), created);
    }

    #[test]
    fn test_create_trims_and_rejects_empty_names() {
        let (service, script_id) = setup();
        let created = service
            .create(NewResource {
                name: "  rope ".to_string(),
                ..mask(script_id)
            })
            .unwrap();
        assert_eq!(created.name, "rope");

        let err = service
            .create(NewResource {
                name: "   ".to_string(),
                ..mask(script_id)
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ScriptDeskError::Validation(ValidationError::EmptyField { field: "name" })
        ));
    }

    #[test]
    fn test_create_rejects_bad_date_and_budget() {
        let (service, script_id) = setup();
        let err = service
            .create(NewResource {
                needed_by: Some("next tuesday".to_string()),
                ..mask(script_id)
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ScriptDeskError::Validation(ValidationError::InvalidField { field: "needed_by", .. })
        ));

        let err = service
            .create(NewResource {
                actual_budget: Some(-1.0),
                ..mask(script_id)
            })
            .unwrap_err();
        assert!(matches!(err, ScriptDeskError::Validation(_)));
    }

    #[test]
    fn test_create_for_missing_script_is_not_found() {
        let (service, _) = setup();
        let err = service.create(mask(999)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_update_is_partial() {
        let (service, script_id) = setup();
        let created = service
            .create(NewResource {
                notes: Some("black".to_string()),
                ..mask(script_id)
            })
            .unwrap();

        let patch: ResourcePatch =
            serde_json::from_value(json!({"actual_budget": 55.5, "notes": null})).unwrap();
        let updated = service.update(created.id, patch).unwrap();

        assert_eq!(updated.actual_budget, Some(55.5));
        assert_eq!(updated.notes, None);
        assert_eq!(updated.name, "mask");
        assert_eq!(updated.estimated_budget, Some(40.0));
        assert_eq!(service.get(created.id).unwrap(), updated);
    }

    #[test]
    fn test_patch_distinguishes_missing_from_null() {
        let patch: ResourcePatch = serde_json::from_value(json!({"description": null})).unwrap();
        assert_eq!(patch.description, Some(None));
        assert_eq!(patch.notes, None);
        assert!(!patch.is_empty());
        assert!(serde_json::from_value::<ResourcePatch>(json!({}))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_update_validates_result() {
        let (service, script_id) = setup();
        let created = service.create(mask(script_id)).unwrap();
        let patch = ResourcePatch {
            kind: Some(String::new()),
            ..Default::default()
        };
        assert!(service.update(created.id, patch).is_err());
        assert_eq!(service.get(created.id).unwrap().kind, "prop");
    }

    #[test]
    fn test_set_status_and_delete() {
        let (service, script_id) = setup();
        let created = service.create(mask(script_id)).unwrap();

        let ready = service.set_status(created.id, ResourceStatus::Ready).unwrap();
        assert_eq!(ready.status, ResourceStatus::Ready);

        service.delete(created.id).unwrap();
        assert!(service.get(created.id).unwrap_err().is_not_found());
        assert!(service.delete(created.id).unwrap_err().is_not_found());
        assert!(service
            .set_status(created.id, ResourceStatus::Completed)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_list_filters_and_counts() {
        let (service, script_id) = setup();
        service.create(mask(script_id)).unwrap();
        service
            .create(NewResource {
                name: "alarm".to_string(),
                kind: "sound".to_string(),
                priority: ResourcePriority::High,
                ..mask(script_id)
            })
            .unwrap();

        let page = service
            .list(&ResourceFilter {
                script_id: Some(script_id),
                kind: Some("sound".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "alarm");

        let page = service
            .list(&ResourceFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let (service, script_id) = setup();
        let mut rx = service.hub.subscribe(&topics::script(script_id));

        let created = service.create(mask(script_id)).unwrap();
        let got = rx.recv().await.unwrap();
        match got.kind {
            NotificationKind::ResourceUpdate {
                resource_id,
                action,
                ..
            } => {
                assert_eq!(resource_id, Some(created.id));
                assert_eq!(action, ResourceAction::Created);
            }
            other => panic!("unexpected notification: {:?}", other),
        }
    }
}
