//! Flat export of the current grid view.

use crate::filter::RowFilter;
use crate::Grid;
use enrich_core::{EnrichResult, ExportConfig, GridError, Row};

fn export_failed(reason: impl std::fmt::Display) -> GridError {
    GridError::ExportFailed {
        reason: reason.to_string(),
    }
}

/// Serialize the grid as a delimited table: one header of column names in
/// display order, then one record per visible row in display order. Cells
/// that are not `ready` export as empty fields.
pub fn export_csv(grid: &Grid, filter: Option<&RowFilter>, config: &ExportConfig) -> EnrichResult<String> {
    if !config.delimiter.is_ascii() {
        return Err(export_failed(format!("delimiter {:?} is not ASCII", config.delimiter)).into());
    }
    let delimiter = config.delimiter as u8;

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(csv::QuoteStyle::Necessary);
    let mut writer = builder.from_writer(Vec::new());

    let header: Vec<&str> = grid.columns().iter().map(|c| c.name.as_str()).collect();
    writer.write_record(&header).map_err(export_failed)?;

    let rows: Vec<&Row> = match filter {
        Some(filter) => grid.filter(filter),
        None => grid.rows(),
    };
    for row in rows {
        let record: Vec<String> = grid
            .columns()
            .iter()
            .map(|column| {
                grid.ready_value(row.row_id, column.column_id)
                    .map(|value| value.display())
                    .unwrap_or_default()
            })
            .collect();
        writer.write_record(&record).map_err(export_failed)?;
    }

    let bytes = writer.into_inner().map_err(export_failed)?;
    Ok(String::from_utf8(bytes).map_err(export_failed)?)
}
