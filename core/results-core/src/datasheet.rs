//! Editable view of an uploaded data-driven file (one CSV/Excel sheet).
//!
//! Rows keep their load-time values next to the edited ones, which is what
//! dirty tracking compares against: editing a cell back to its original value
//! makes the row clean again. Paging is over live rows only; deleted rows
//! disappear from pages immediately but are remembered until the next save.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{ResultsError, Result};

pub type RowId = usize;
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct SheetRow {
    id: RowId,
    /// `None` for rows inserted since the last save.
    original: Option<Row>,
    current: Row,
    deleted: bool,
}

impl SheetRow {
    fn is_dirty(&self) -> bool {
        match &self.original {
            None => !self.deleted,
            Some(original) => self.deleted || *original != self.current,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavePayload {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub updated: usize,
    pub inserted: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone)]
pub struct DataSheet {
    columns: Vec<String>,
    rows: Vec<SheetRow>,
    page_size: usize,
    page: usize,
    next_id: RowId,
}

impl DataSheet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(ResultsError::InvalidPageSize);
        }

        let rows: Vec<SheetRow> = rows
            .into_iter()
            .enumerate()
            .map(|(id, mut row)| {
                for column in &columns {
                    row.entry(column.clone()).or_default();
                }
                SheetRow {
                    id,
                    original: Some(row.clone()),
                    current: row,
                    deleted: false,
                }
            })
            .collect();
        let next_id = rows.len();

        Ok(Self {
            columns,
            rows,
            page_size,
            page: 0,
            next_id,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.live_rows().count()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page(&self) -> usize {
        self.page
    }

    /// Always at least one page, even for an empty sheet.
    pub fn page_count(&self) -> usize {
        self.row_count().div_ceil(self.page_size).max(1)
    }

    /// Moves to `page`, clamped to the last page. Returns the page selected.
    pub fn set_page(&mut self, page: usize) -> usize {
        self.page = page.min(self.page_count() - 1);
        self.page
    }

    pub fn set_page_size(&mut self, page_size: usize) -> Result<()> {
        if page_size == 0 {
            return Err(ResultsError::InvalidPageSize);
        }
        self.page_size = page_size;
        self.set_page(self.page);
        Ok(())
    }

    pub fn page_rows(&self) -> Vec<(RowId, &Row)> {
        self.live_rows()
            .skip(self.page * self.page_size)
            .take(self.page_size)
            .map(|row| (row.id, &row.current))
            .collect()
    }

    pub fn row(&self, row_id: RowId) -> Option<&Row> {
        self.live_rows()
            .find(|row| row.id == row_id)
            .map(|row| &row.current)
    }

    pub fn set_cell(&mut self, row_id: RowId, column: &str, value: impl Into<String>) -> Result<()> {
        if !self.columns.iter().any(|candidate| candidate == column) {
            return Err(ResultsError::ColumnNotFound(column.to_string()));
        }
        let row = self.live_row_mut(row_id)?;
        row.current.insert(column.to_string(), value.into());
        Ok(())
    }

    /// Appends an empty row and moves to the page showing it.
    pub fn insert_row(&mut self) -> RowId {
        let id = self.next_id;
        self.next_id += 1;
        let current = self
            .columns
            .iter()
            .map(|column| (column.clone(), String::new()))
            .collect();
        self.rows.push(SheetRow {
            id,
            original: None,
            current,
            deleted: false,
        });
        self.set_page(self.page_count() - 1);
        id
    }

    pub fn delete_row(&mut self, row_id: RowId) -> Result<()> {
        let row = self.live_row_mut(row_id)?;
        row.deleted = true;
        if row.original.is_none() {
            self.rows.retain(|row| row.id != row_id);
        }
        self.set_page(self.page);
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.rows.iter().any(SheetRow::is_dirty)
    }

    pub fn dirty_row_ids(&self) -> Vec<RowId> {
        self.rows
            .iter()
            .filter(|row| row.is_dirty())
            .map(|row| row.id)
            .collect()
    }

    /// Full sheet as it should be stored: original order with edits applied,
    /// deleted rows dropped, inserted rows last.
    pub fn merge_for_save(&self) -> SavePayload {
        let mut payload = SavePayload {
            columns: self.columns.clone(),
            rows: Vec::new(),
            updated: 0,
            inserted: 0,
            deleted: 0,
        };

        for row in &self.rows {
            match (&row.original, row.deleted) {
                (Some(_), true) => payload.deleted += 1,
                (Some(original), false) => {
                    if *original != row.current {
                        payload.updated += 1;
                    }
                    payload.rows.push(row.current.clone());
                }
                (None, _) => {
                    payload.inserted += 1;
                    payload.rows.push(row.current.clone());
                }
            }
        }

        payload
    }

    /// Makes the current contents the new baseline after a successful save.
    pub fn mark_saved(&mut self) {
        self.rows.retain(|row| !row.deleted);
        for row in &mut self.rows {
            row.original = Some(row.current.clone());
        }
        self.set_page(self.page);
    }

    fn live_rows(&self) -> impl Iterator<Item = &SheetRow> {
        self.rows.iter().filter(|row| !row.deleted)
    }

    fn live_row_mut(&mut self, row_id: RowId) -> Result<&mut SheetRow> {
        self.rows
            .iter_mut()
            .find(|row| row.id == row_id && !row.deleted)
            .ok_or(ResultsError::RowNotFound(row_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user: &str, password: &str) -> Row {
        let mut row = Row::new();
        row.insert("user".to_string(), user.to_string());
        row.insert("password".to_string(), password.to_string());
        row
    }

    fn sheet(rows: usize, page_size: usize) -> DataSheet {
        let data = (0..rows)
            .map(|index| row(&format!("user{}", index), "secret"))
            .collect();
        DataSheet::new(
            vec!["user".to_string(), "password".to_string()],
            data,
            page_size,
        )
        .expect("sheet")
    }

    #[test]
    fn pagination_clamps_and_slices() {
        let mut sheet = sheet(5, 2);
        assert_eq!(sheet.page_count(), 3);
        assert_eq!(sheet.set_page(10), 2);
        let ids: Vec<RowId> = sheet.page_rows().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![4]);

        sheet.set_page_size(10).expect("page size");
        assert_eq!(sheet.page(), 0);
        assert_eq!(sheet.page_rows().len(), 5);
        assert!(matches!(
            sheet.set_page_size(0),
            Err(ResultsError::InvalidPageSize)
        ));
    }

    #[test]
    fn empty_sheet_has_one_page() {
        let sheet = sheet(0, 25);
        assert_eq!(sheet.page_count(), 1);
        assert!(sheet.page_rows().is_empty());
    }

    #[test]
    fn editing_back_to_original_cleans_row() {
        let mut sheet = sheet(3, 10);
        sheet.set_cell(1, "password", "changed").expect("edit");
        assert_eq!(sheet.dirty_row_ids(), vec![1]);

        sheet.set_cell(1, "password", "secret").expect("edit back");
        assert!(!sheet.is_dirty());
    }

    #[test]
    fn rejects_unknown_row_and_column() {
        let mut sheet = sheet(1, 10);
        assert!(matches!(
            sheet.set_cell(0, "email", "x"),
            Err(ResultsError::ColumnNotFound(_))
        ));
        assert!(matches!(
            sheet.set_cell(7, "user", "x"),
            Err(ResultsError::RowNotFound(7))
        ));
    }

    #[test]
    fn merge_applies_edits_deletes_and_inserts() {
        let mut sheet = sheet(3, 2);
        sheet.set_cell(0, "user", "admin").expect("edit");
        sheet.delete_row(1).expect("delete");
        let new_id = sheet.insert_row();
        sheet.set_cell(new_id, "user", "guest").expect("edit new");
        assert_eq!(sheet.page(), 1);

        let payload = sheet.merge_for_save();
        assert_eq!(payload.updated, 1);
        assert_eq!(payload.deleted, 1);
        assert_eq!(payload.inserted, 1);
        let users: Vec<&str> = payload
            .rows
            .iter()
            .map(|row| row["user"].as_str())
            .collect();
        assert_eq!(users, vec!["admin", "user2", "guest"]);

        sheet.mark_saved();
        assert!(!sheet.is_dirty());
        assert_eq!(sheet.row_count(), 3);
        assert_eq!(sheet.merge_for_save().rows, payload.rows);
    }

    #[test]
    fn deleting_an_inserted_row_leaves_no_trace() {
        let mut sheet = sheet(1, 10);
        let new_id = sheet.insert_row();
        sheet.delete_row(new_id).expect("delete");
        assert!(!sheet.is_dirty());
        assert!(matches!(
            sheet.delete_row(new_id),
            Err(ResultsError::RowNotFound(_))
        ));
    }

    #[test]
    fn missing_columns_are_filled() {
        let mut partial = Row::new();
        partial.insert("user".to_string(), "solo".to_string());
        let sheet = DataSheet::new(
            vec!["user".to_string(), "password".to_string()],
            vec![partial],
            5,
        )
        .expect("sheet");
        assert_eq!(sheet.row(0).and_then(|row| row.get("password")).map(String::as_str), Some(""));
        assert!(!sheet.is_dirty());
    }
}
