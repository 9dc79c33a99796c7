use nada_core::{AppError, AppResult};
use serde_json::{Map, Value, json};

/// Revisioned permission graph as returned by Metabase.
///
/// The graph is written back whole, carrying the revision it was read at so
/// Metabase rejects concurrent edits.
pub(super) struct PermissionGraph(Value);

impl PermissionGraph {
    pub(super) fn new(value: Value) -> Self {
        Self(value)
    }

    /// Sets the access of one group on one database or collection.
    pub(super) fn set(&mut self, group_id: i64, object_id: i64, access: Value) -> AppResult<()> {
        let groups = self
            .0
            .get_mut("groups")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| AppError::Io("metabase permission graph has no groups".to_owned()))?;

        let group = groups
            .entry(group_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(group) = group.as_object_mut() else {
            return Err(AppError::Io(format!(
                "metabase permission graph entry of group {group_id} is not an object"
            )));
        };
        group.insert(object_id.to_string(), access);

        Ok(())
    }

    pub(super) fn as_value(&self) -> &Value {
        &self.0
    }
}

pub(super) fn database_data_access() -> Value {
    json!({ "data": { "native": "write", "schemas": "all" } })
}

pub(super) fn database_no_access() -> Value {
    json!({ "data": { "native": "none", "schemas": "none" } })
}

pub(super) fn collection_write_access() -> Value {
    json!("write")
}

pub(super) fn collection_no_access() -> Value {
    json!("none")
}
