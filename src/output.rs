use std::fmt::Display;
use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;

use crate::metadata::{MetadataTable, SAMPLE_ID_COLUMN};
use crate::table::SparseTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Tsv,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    generated_at: String,
    result: &'a T,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        Self::write(&mut stdout, value)
    }

    pub fn write<W: Write, T: Serialize>(out: &mut W, value: &T) -> io::Result<()> {
        let envelope = Envelope {
            generated_at: chrono::Utc::now().to_rfc3339(),
            result: value,
        };
        let json = serde_json::to_string_pretty(&envelope).map_err(io::Error::other)?;
        out.write_all(json.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TsvOutput;

impl TsvOutput {
    /// Dense rendering, one line per observation, one column per physical sample.
    pub fn write_table<W: Write>(out: &mut W, table: &SparseTable) -> io::Result<()> {
        write!(out, "#OTU ID")?;
        for sample in table.sample_ids() {
            write!(out, "\t{sample}")?;
        }
        writeln!(out)?;
        for (row, observation) in table.observation_ids().iter().enumerate() {
            write!(out, "{observation}")?;
            for value in table.dense_row(row) {
                write!(out, "\t{value}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Missing values render as empty cells.
    pub fn write_metadata<W: Write>(out: &mut W, table: &MetadataTable) -> io::Result<()> {
        write!(out, "{SAMPLE_ID_COLUMN}")?;
        for column in &table.columns {
            write!(out, "\t{column}")?;
        }
        writeln!(out)?;
        for row in &table.rows {
            write!(out, "{}", row.sample_id)?;
            for column in &table.columns {
                write!(out, "\t{}", row.value(column).unwrap_or_default())?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    pub fn write_pairs<W, K, V, I>(out: &mut W, pairs: I) -> io::Result<()>
    where
        W: Write,
        K: Display,
        V: Display,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in pairs {
            writeln!(out, "{key}\t{value}")?;
        }
        Ok(())
    }

    pub fn write_lines<W, T, I>(out: &mut W, lines: I) -> io::Result<()>
    where
        W: Write,
        T: Display,
        I: IntoIterator<Item = T>,
    {
        for line in lines {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}
