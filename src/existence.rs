//! Existence checker: decides whether a target table still needs loading.

use serde::Serialize;

use crate::error::WarehouseError;
use crate::naming::TargetTableName;
use crate::warehouse::Warehouse;

/// State of a target table before processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "rows", rename_all = "snake_case")]
pub enum TableState {
    Absent,
    ExistsEmpty,
    ExistsWithData(u64),
}

impl TableState {
    /// Only a table holding rows is skipped.
    pub fn needs_load(self) -> bool {
        !matches!(self, Self::ExistsWithData(_))
    }
}

/// Probe metadata, then count rows. Read-only.
pub async fn table_exists_and_has_data<W: Warehouse>(
    warehouse: &W,
    target: &TargetTableName,
) -> Result<TableState, WarehouseError> {
    if !warehouse.table_exists(target).await? {
        return Ok(TableState::Absent);
    }
    let rows = warehouse
        .query_count(&format!("SELECT COUNT(*) FROM {}", target.quoted()))
        .await?;
    tracing::debug!(table = %target, rows, "table exists");
    Ok(match rows {
        0 => TableState::ExistsEmpty,
        n => TableState::ExistsWithData(n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::target_table_name;
    use crate::warehouse::{CellValue, InsertTarget, SqlxWarehouse};

    #[tokio::test]
    async fn test_states() {
        let wh = SqlxWarehouse::connect("sqlite::memory:").await.unwrap();
        let target = target_table_name("school", "order");

        assert_eq!(table_exists_and_has_data(&wh, &target).await.unwrap(), TableState::Absent);

        wh.execute("CREATE TABLE \"SCHOOL_TABLE_ORDER\" (\"id\" INTEGER)").await.unwrap();
        let state = table_exists_and_has_data(&wh, &target).await.unwrap();
        assert_eq!(state, TableState::ExistsEmpty);
        assert!(state.needs_load());

        let insert = InsertTarget::quoted(&target, &["id".to_string()]);
        wh.bulk_load(&insert, &[vec![CellValue::Int(1)], vec![CellValue::Int(2)]])
            .await
            .unwrap();
        let state = table_exists_and_has_data(&wh, &target).await.unwrap();
        assert_eq!(state, TableState::ExistsWithData(2));
        assert!(!state.needs_load());
    }
}
