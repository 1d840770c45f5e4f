//! CSV export of the filtered fact set
//!
//! The export always covers the full post-filter set (the same one the totals
//! are computed over), numbered with a 1-based `item` column.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::constants;
use crate::records::{FactField, NormalizedRecord};

/// Column of the export: display label plus the record key it reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportHeader {
    pub label: String,
    pub key: String,
}

impl ExportHeader {
    pub fn new(label: &str, key: &str) -> Self {
        Self {
            label: label.to_string(),
            key: key.to_string(),
        }
    }
}

/// Columns of the sales tables, in display order
pub fn fact_headers() -> Vec<ExportHeader> {
    vec![
        ExportHeader::new("#", ITEM_KEY),
        ExportHeader::new("Cod", FactField::Code.key()),
        ExportHeader::new("Fecha", FactField::CreatedAt.key()),
        ExportHeader::new("Cliente", FactField::Client.key()),
        ExportHeader::new("Vendedor", FactField::User.key()),
        ExportHeader::new("Tipo de pago", FactField::PaymentType.key()),
        ExportHeader::new("Forma de pago", FactField::WayToPay.key()),
        ExportHeader::new("Total", FactField::Subtotal.key()),
        ExportHeader::new("Estado", FactField::Status.key()),
    ]
}

const ITEM_KEY: &str = "item";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportColumn {
    Item,
    Field(FactField),
}

impl FromStr for ExportColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ITEM_KEY {
            return Ok(ExportColumn::Item);
        }
        s.parse().map(ExportColumn::Field)
    }
}

/// A record with its position in the export
#[derive(Debug, Clone, Copy)]
pub struct ExportRow<'a> {
    /// 1-based
    pub item: usize,
    pub record: &'a NormalizedRecord,
}

impl ExportRow<'_> {
    fn cell(&self, column: ExportColumn) -> String {
        match column {
            ExportColumn::Item => self.item.to_string(),
            ExportColumn::Field(field) => self.record.value(field).to_string(),
        }
    }
}

/// Number the filtered records for export
pub fn export_rows(filtered: &[NormalizedRecord]) -> Vec<ExportRow<'_>> {
    filtered
        .iter()
        .enumerate()
        .map(|(i, record)| ExportRow { item: i + 1, record })
        .collect()
}

/// Write the filtered set as semicolon-delimited CSV
pub fn write_csv<W: Write>(
    writer: W,
    filtered: &[NormalizedRecord],
    headers: &[ExportHeader],
) -> Result<()> {
    let columns = headers
        .iter()
        .map(|h| h.key.parse::<ExportColumn>().map_err(|e| anyhow::anyhow!(e)))
        .collect::<Result<Vec<_>>>()
        .context("Invalid export header")?;

    let mut wtr = WriterBuilder::new()
        .delimiter(constants::CSV_DELIMITER)
        .from_writer(writer);

    wtr.write_record(headers.iter().map(|h| h.label.as_str()))?;
    for row in export_rows(filtered) {
        wtr.write_record(columns.iter().map(|&column| row.cell(column)))?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write the export to `path`
pub fn write_csv_file(
    path: &Path,
    filtered: &[NormalizedRecord],
    headers: &[ExportHeader],
) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_csv(file, filtered, headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::normalize_records;
    use crate::records::tests::raw_fact;

    fn to_string(filtered: &[NormalizedRecord], headers: &[ExportHeader]) -> String {
        let mut buf = Vec::new();
        write_csv(&mut buf, filtered, headers).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_rows_are_numbered_from_one() {
        let recs = normalize_records(&[
            raw_fact("a", "X", 1.0, 0.0),
            raw_fact("b", "X", 2.0, 0.0),
        ])
        .unwrap();

        let rows = export_rows(&recs);
        let items: Vec<_> = rows.iter().map(|r| (r.item, r.record.id.as_str())).collect();
        assert_eq!(items, [(1, "a"), (2, "b")]);
    }

    #[test]
    fn test_csv_layout() {
        let recs = normalize_records(&[
            raw_fact("a", "X", 100.0, 10.0),
            raw_fact("b", "X", 45.5, 0.0),
        ])
        .unwrap();

        let csv = to_string(&recs, &fact_headers());
        let lines: Vec<_> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "#;Cod;Fecha;Cliente;Vendedor;Tipo de pago;Forma de pago;Total;Estado"
        );
        assert_eq!(
            lines[1],
            "1;F-a;2024-03-01T10:00:00.000Z;Ana Quispe;Luis Rojas;CONTADO;EFECTIVO;90;ACTIVO"
        );
        assert!(lines[2].starts_with("2;F-b;"));
        assert!(lines[2].contains(";45.5;"));
    }

    #[test]
    fn test_custom_headers_and_quoting() {
        let mut raw = raw_fact("a", "X", 5.0, 0.0);
        raw.client.as_mut().unwrap().name = "Ana; Maria".to_string();
        let recs = normalize_records(&[raw]).unwrap();

        let headers = vec![
            ExportHeader::new("N", "item"),
            ExportHeader::new("Cliente", "client"),
            ExportHeader::new("Descuento", "discount"),
        ];
        let csv = to_string(&recs, &headers);
        assert_eq!(csv, "N;Cliente;Descuento\n1;\"Ana; Maria Quispe\";0\n");
    }

    #[test]
    fn test_unknown_header_key_is_rejected() {
        let mut buf = Vec::new();
        let result = write_csv(&mut buf, &[], &[ExportHeader::new("Precio", "price")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_set_writes_header_only() {
        let csv = to_string(&[], &fact_headers());
        assert_eq!(csv.lines().count(), 1);
    }
}
