// A Syncropatch chip is addressed three ways:
// cell id (0..16*n_cols) -> (column, row) -> well label ("A1", "B2", ...)
// Cell ids run down a column first, so cell 0..15 is column 1, rows A..P.
use std::fmt::Display;
use std::str::FromStr;

use super::constants::N_ROWS;
use super::error::WellError;

/// WellID is the full address of one well on the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WellID {
    pub cell_id: usize,
    pub col: usize,
    pub row: usize,
}

impl WellID {
    /// Construct the address of a cell id
    pub fn new(cell_id: usize) -> Self {
        Self {
            cell_id,
            col: cell_id / N_ROWS,
            row: cell_id % N_ROWS,
        }
    }

    /// Construct the address of a (column, row) pair, both zero based
    pub fn from_col_row(col: usize, row: usize) -> Result<Self, WellError> {
        if row >= N_ROWS {
            return Err(WellError::BadRow(row));
        }
        Ok(Self::new(col * N_ROWS + row))
    }

    /// Human readable label, row letter then one-based column
    pub fn label(&self) -> String {
        format!("{}{}", (b'A' + self.row as u8) as char, self.col + 1)
    }
}

impl Display for WellID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for WellID {
    type Err = WellError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let letter = chars.next().ok_or(WellError::BadLabel(s.to_string()))?;
        if !letter.is_ascii_uppercase() {
            return Err(WellError::BadLabel(s.to_string()));
        }
        let row = (letter as u8 - b'A') as usize;
        let col: usize = chars
            .as_str()
            .parse()
            .map_err(|_| WellError::BadLabel(s.to_string()))?;
        if col == 0 {
            return Err(WellError::BadLabel(s.to_string()));
        }
        Self::from_col_row(col - 1, row)
    }
}

/// All cell ids of the measured columns, in order
pub fn cell_ids_of_columns(columns: impl IntoIterator<Item = usize>) -> Vec<usize> {
    columns
        .into_iter()
        .flat_map(|col| (col * N_ROWS)..((col + 1) * N_ROWS))
        .collect()
}
