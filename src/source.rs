//! CSV record source built on Polars
//!
//! Schema inference is disabled: every column is read as text and handed to
//! the normalizer untyped, so a malformed cell rejects its row instead of
//! failing the whole load.

use crate::schema::{RawRow, RawValue};
use polars::prelude::*;
use std::path::Path;
use tracing::info;

/// Load a headered CSV file into raw rows.
pub fn read_csv_rows(path: impl AsRef<Path>) -> crate::Result<Vec<RawRow>> {
    let path = path.as_ref();
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()?
        .collect()?;

    info!(path = %path.display(), rows = df.height(), columns = df.width(), "csv loaded");
    dataframe_rows(&df)
}

/// Convert every row of a DataFrame into a [`RawRow`].
pub fn dataframe_rows(df: &DataFrame) -> crate::Result<Vec<RawRow>> {
    let mut rows = vec![RawRow::new(); df.height()];

    for series in df.get_columns() {
        let name = series.name().to_string();
        let as_text = series.cast(&DataType::String)?;
        for (row, value) in rows.iter_mut().zip(as_text.str()?.into_iter()) {
            let cell = match value {
                Some(text) => RawValue::Text(text.to_string()),
                None => RawValue::Null,
            };
            row.insert(&name, cell);
        }
    }

    Ok(rows)
}
