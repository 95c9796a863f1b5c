//! CSV datasets
//!
//! A dataset needs a `text` column. Every other column is a label field,
//! named after its (normalized) header.

use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use tracing::debug;

use irx_core::{FieldMap, FieldName, IrxError, Result};

pub const TEXT_COLUMN: &str = "text";

/// Texts with their label maps, row-aligned
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub texts: Vec<String>,
    pub labels: Vec<FieldMap>,
    pub label_columns: Vec<FieldName>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

pub fn load(path: &Path) -> Result<Dataset> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", path.display()))?;
    let dataset = read(file)?;
    debug!(
        path = %path.display(),
        rows = dataset.len(),
        labels = dataset.label_columns.len(),
        "Loaded dataset"
    );
    Ok(dataset)
}

pub fn read<R: Read>(reader: R) -> Result<Dataset> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(reader);

    let headers = reader.headers().map_err(anyhow::Error::from)?.clone();
    let text_index = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(TEXT_COLUMN))
        .ok_or_else(|| IrxError::MissingColumn(TEXT_COLUMN.to_string()))?;

    let columns: Vec<(usize, FieldName)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != text_index && !h.is_empty())
        .map(|(i, h)| (i, FieldName::new(h)))
        .collect();

    let mut dataset = Dataset {
        label_columns: columns.iter().map(|(_, f)| f.clone()).collect(),
        ..Dataset::default()
    };

    for record in reader.records() {
        let record = record.map_err(anyhow::Error::from)?;
        let text = record.get(text_index).unwrap_or_default().to_string();
        let labels = columns
            .iter()
            .map(|(i, field)| {
                let value = record.get(*i).unwrap_or_default().trim().to_string();
                (field.clone(), value)
            })
            .collect();

        dataset.texts.push(text);
        dataset.labels.push(labels);
    }

    Ok(dataset)
}
