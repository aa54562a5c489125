// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Each Change records enough to reverse one row write. Rows are addressed by
// the stable id the store assigned them, so undoing newest-first restores
// the table exactly even when other transactions wrote in between.
//
// ============================================================================

use crate::core::Row;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    InsertRow {
        table: String,
        row_id: u64,
    },

    UpdateRow {
        table: String,
        row_id: u64,
        old_row: Row,
    },

    DeleteRow {
        table: String,
        row_id: u64,
        old_row: Row,
    },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn row_id(&self) -> u64 {
        match self {
            Change::InsertRow { row_id, .. }
            | Change::UpdateRow { row_id, .. }
            | Change::DeleteRow { row_id, .. } => *row_id,
        }
    }
}
