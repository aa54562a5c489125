use super::TypeConfig;
use crate::core::{Row, Value};
use crate::entity::Dto;

impl TypeConfig {
    /// Flattens an entity into the row written to the store.
    pub fn to_row(&self, dto: &Dto) -> Row {
        let mut row: Row = dto.properties().clone();
        if let Some(key) = dto.primary_key() {
            row.insert(self.primary_key.clone(), key.clone());
        }
        for link in &self.parents {
            if let Some(key) = dto.foreign_key(&link.parent_type) {
                row.insert(link.column.clone(), key.clone());
            }
        }
        if self.audited {
            if let Some(audit_id) = dto.audit_id() {
                row.insert(self.audit_column.clone(), Value::from(audit_id));
            }
        }
        row
    }

    /// Maps a stored row back into a clean entity.
    pub fn from_row(&self, mut row: Row) -> Dto {
        let mut dto = Dto::criteria(self.name.clone());
        if let Some(key) = row.remove(&self.primary_key) {
            if !key.is_null() {
                dto.set_primary_key(key);
            }
        }
        for link in &self.parents {
            if let Some(key) = row.remove(&link.column) {
                if !key.is_null() {
                    dto.set_foreign_key(link.parent_type.clone(), key);
                }
            }
        }
        if self.audited {
            if let Some(Value::Text(audit_id)) = row.remove(&self.audit_column) {
                dto.set_audit_id(audit_id);
            }
        }
        for (column, value) in row {
            dto.set_untracked(column, value);
        }
        dto
    }
}
