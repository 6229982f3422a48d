// The user metadata is a small INI file written by hand next to the raw data. It follows
// the python configparser dialect, so keys are case insensitive, `=` and `:` both
// separate keys from values, and `#`/`;` start comment lines. Section names are case
// sensitive. Indented lines continue the value of the previous key.
//
// Sections used:
// [Experiment] exp_description, IC_id, EC_id, SE_id, comment, temperature, ncell_lines
// [Cells]      cell_suspension_medium, culture_medium, induction_time, induction_medium
// [CL<N>]      chip_cols ("min-max", one based), vial_id, species, host_cell, passage,
//              cell_countpml, ion_channel
// [Stimulus]   <protocol name> = <type>,<id>,<sweeps>
use fxhash::FxHashMap;
use std::path::Path;

use super::error::UserMetadataError;

pub const EXPERIMENT_SECTION: &str = "Experiment";
pub const CELLS_SECTION: &str = "Cells";
pub const STIMULUS_SECTION: &str = "Stimulus";
const CELL_LINE_PREFIX: &str = "CL";

/// A single section of the INI file
#[derive(Debug, Clone, Default)]
pub struct Section {
    values: FxHashMap<String, String>,
}

impl Section {
    /// Case insensitive lookup of a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(|v| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}

/// The parsed user metadata of an experiment
#[derive(Debug, Clone, Default)]
pub struct UserMetadata {
    sections: FxHashMap<String, Section>,
}

impl UserMetadata {
    /// Read the user metadata file.
    ///
    /// A missing file is an error the conversion cannot recover from: cells can not
    /// be described without it.
    pub fn read(path: &Path) -> Result<Self, UserMetadataError> {
        if !path.is_file() {
            return Err(UserMetadataError::MissingFile(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse the INI contents
    pub fn parse(contents: &str) -> Result<Self, UserMetadataError> {
        let mut metadata = UserMetadata::default();
        let mut current_section: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (number, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            // Continuation of a multi-line value
            if raw_line.starts_with(|c: char| c.is_whitespace()) {
                if let (Some(section), Some(key)) = (&current_section, &last_key) {
                    if let Some(value) = metadata
                        .sections
                        .get_mut(section)
                        .and_then(|s| s.values.get_mut(key))
                    {
                        value.push('\n');
                        value.push_str(line);
                        continue;
                    }
                }
                return Err(UserMetadataError::BadLine(number + 1));
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..(line.len() - 1)].trim().to_string();
                metadata.sections.entry(name.clone()).or_default();
                current_section = Some(name);
                last_key = None;
                continue;
            }

            let split_at = line
                .find(|c: char| c == '=' || c == ':')
                .ok_or(UserMetadataError::BadLine(number + 1))?;
            let section = current_section
                .as_ref()
                .ok_or(UserMetadataError::BadLine(number + 1))?;
            let key = line[..split_at].trim().to_lowercase();
            let value = line[(split_at + 1)..].trim().to_string();
            if let Some(s) = metadata.sections.get_mut(section) {
                s.values.insert(key.clone(), value);
            }
            last_key = Some(key);
        }
        Ok(metadata)
    }

    pub fn section(&self, name: &str) -> Result<&Section, UserMetadataError> {
        self.sections
            .get(name)
            .ok_or(UserMetadataError::MissingSection(name.to_string()))
    }

    /// Get a required value
    pub fn get(&self, section: &str, key: &str) -> Result<&str, UserMetadataError> {
        self.section(section)?
            .get(key)
            .ok_or(UserMetadataError::MissingKey {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    /// Get an optional value, empty if absent
    pub fn get_or_empty(&self, section: &str, key: &str) -> String {
        self.get_or(section, key, "")
    }

    pub fn get_or(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or(default).to_string()
    }

    /// Find the cell line section covering a zero based chip column.
    ///
    /// Each CL<N> section claims a one based, inclusive range of columns in chip_cols.
    pub fn cell_line_for_column(&self, col: usize) -> Result<String, UserMetadataError> {
        let n_cell_lines: usize = self.get(EXPERIMENT_SECTION, "ncell_lines")?.parse()?;
        let chip_col = col + 1;
        for line in 1..=n_cell_lines {
            let section_name = format!("{CELL_LINE_PREFIX}{line}");
            let (min, max) = parse_column_range(self.get(&section_name, "chip_cols")?)?;
            if chip_col >= min && chip_col <= max {
                return Ok(section_name);
            }
        }
        Err(UserMetadataError::CellLineNotFound(chip_col))
    }
}

/// Parse a "min-max" column range
pub fn parse_column_range(range: &str) -> Result<(usize, usize), UserMetadataError> {
    let entries: Vec<&str> = range.split('-').map(|s| s.trim()).collect();
    if entries.len() != 2 {
        return Err(UserMetadataError::BadColumnRange(range.to_string()));
    }
    let min: usize = entries[0].parse()?;
    let max: usize = entries[1].parse()?;
    if min > max {
        return Err(UserMetadataError::BadColumnRange(range.to_string()));
    }
    Ok((min, max))
}
