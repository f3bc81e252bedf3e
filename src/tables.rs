use serde::Serialize;

use crate::types::ExtractedField;

/// Repeating row group detected on a document (e.g. invoice line items).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub row_index: u32,
    /// Field index per column; `None` where the row has no such column.
    pub cells: Vec<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldLayout {
    pub tables: Vec<FieldTable>,
    /// Indices of fields that belong to no group, in list order.
    pub standalone: Vec<usize>,
}

/// Group fields by `group`, then by `row_index` (missing index counts as row 0).
/// Tables, columns and rows keep first-appearance order except rows, which are
/// sorted by index. If a row repeats a column the first field wins.
pub fn group_tables(fields: &[ExtractedField]) -> FieldLayout {
    let mut tables: Vec<FieldTable> = Vec::new();
    let mut standalone = Vec::new();

    for (index, field) in fields.iter().enumerate() {
        let Some(group) = field.group.as_deref() else {
            standalone.push(index);
            continue;
        };

        let table = match tables.iter().position(|t| t.name == group) {
            Some(pos) => &mut tables[pos],
            None => {
                tables.push(FieldTable {
                    name: group.to_string(),
                    columns: Vec::new(),
                    rows: Vec::new(),
                });
                let last = tables.len() - 1;
                &mut tables[last]
            }
        };

        let column = match table.columns.iter().position(|c| *c == field.name) {
            Some(pos) => pos,
            None => {
                table.columns.push(field.name.clone());
                table.columns.len() - 1
            }
        };

        let row_index = field.row_index.unwrap_or(0);
        let row = match table.rows.iter().position(|r| r.row_index == row_index) {
            Some(pos) => &mut table.rows[pos],
            None => {
                table.rows.push(TableRow {
                    row_index,
                    cells: Vec::new(),
                });
                let last = table.rows.len() - 1;
                &mut table.rows[last]
            }
        };
        if row.cells.len() <= column {
            row.cells.resize(column + 1, None);
        }
        if row.cells[column].is_none() {
            row.cells[column] = Some(index);
        }
    }

    for table in &mut tables {
        let width = table.columns.len();
        for row in &mut table.rows {
            row.cells.resize(width, None);
        }
        table.rows.sort_by_key(|r| r.row_index);
    }

    FieldLayout { tables, standalone }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_rows_and_columns() {
        let fields = vec![
            ExtractedField::new("number", "INV-1"),
            ExtractedField::new("item", "Bolts").in_group("lines", 1),
            ExtractedField::new("qty", "10").in_group("lines", 1),
            ExtractedField::new("item", "Nuts").in_group("lines", 0),
            ExtractedField::new("total", "12.00"),
            ExtractedField::new("price", "0.5").in_group("lines", 0),
        ];
        let layout = group_tables(&fields);

        assert_eq!(layout.standalone, vec![0, 4]);
        assert_eq!(layout.tables.len(), 1);
        let table = &layout.tables[0];
        assert_eq!(table.columns, vec!["item", "qty", "price"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].row_index, 0);
        assert_eq!(table.rows[0].cells, vec![Some(3), None, Some(5)]);
        assert_eq!(table.rows[1].cells, vec![Some(1), Some(2), None]);
    }

    #[test]
    fn duplicate_cell_keeps_first_field() {
        let fields = vec![
            ExtractedField::new("item", "a").in_group("t", 0),
            ExtractedField::new("item", "b").in_group("t", 0),
        ];
        let layout = group_tables(&fields);
        assert_eq!(layout.tables[0].rows[0].cells, vec![Some(0)]);
    }

    #[test]
    fn empty_input_gives_empty_layout() {
        let layout = group_tables(&[]);
        assert!(layout.tables.is_empty());
        assert!(layout.standalone.is_empty());
    }
}
