use crate::error::{LoanReportError, Result};
use crate::pivot::{WideKey, WideRow, WideTable};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

fn index_rows(table: &WideTable, position: usize) -> Result<HashMap<WideKey, &WideRow>> {
    let mut index = HashMap::with_capacity(table.rows.len());
    for row in &table.rows {
        if index.insert(row.key, row).is_some() {
            return Err(LoanReportError::Join(format!(
                "table #{} has more than one row for key {}",
                position, row.key
            )));
        }
    }
    Ok(index)
}

/// Left-joins `tables` on (time bucket, grade). The first table is primary:
/// the result has exactly its rows, in its order. Other tables contribute
/// their columns; their rows without a primary match are dropped.
pub fn left_join(tables: &[WideTable]) -> Result<WideTable> {
    let (primary, others) = tables
        .split_first()
        .ok_or_else(|| LoanReportError::Join("no tables to join".to_string()))?;

    index_rows(primary, 0)?;

    let mut seen: HashSet<&str> = HashSet::new();
    for (position, table) in tables.iter().enumerate() {
        for column in &table.columns {
            if !seen.insert(column.as_str()) {
                return Err(LoanReportError::Join(format!(
                    "column '{}' from table #{} already exists",
                    column, position
                )));
            }
        }
    }

    let primary_keys: HashSet<WideKey> = primary.rows.iter().map(|r| r.key).collect();
    let mut rows: Vec<WideRow> = primary.rows.clone();
    let mut columns = primary.columns.clone();

    for (offset, table) in others.iter().enumerate() {
        let position = offset + 1;
        let index = index_rows(table, position)?;
        let empty = vec![None; table.columns.len()];

        for row in rows.iter_mut() {
            let cells = index.get(&row.key).map(|r| &r.cells).unwrap_or(&empty);
            row.cells.extend(cells.iter().copied());
        }

        let dropped = table
            .rows
            .iter()
            .filter(|r| !primary_keys.contains(&r.key))
            .count();
        if dropped > 0 {
            warn!(
                "Dropped {} rows from table #{} with no matching key in the primary table",
                dropped, position
            );
        }

        columns.extend(table.columns.iter().cloned());
    }

    debug!(
        "Joined {} tables into {} rows x {} columns",
        tables.len(),
        rows.len(),
        columns.len()
    );

    Ok(WideTable { columns, rows })
}
