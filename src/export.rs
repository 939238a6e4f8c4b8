// 💾 Exporter - CSV, gzip CSV or Parquet, chosen by the output file suffix

use crate::error::IbsgError;
use crate::fetch::part_path;
use crate::schema::{Cell, ColumnType, Tabular};
use anyhow::{Context, Result};
use arrow_array::builder::{Float64Builder, Int64Builder, StringBuilder};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Rows buffered per Parquet record batch
const PARQUET_BATCH_ROWS: usize = 65_536;

// ============================================================================
// RECORD SINK
// ============================================================================

/// Destination for records produced one at a time
pub trait RecordSink<T> {
    fn write_record(&mut self, record: &T) -> Result<()>;

    fn flush_records(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Clone> RecordSink<T> for Vec<T> {
    fn write_record(&mut self, record: &T) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

// ============================================================================
// OUTPUT FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    CsvGz,
    Parquet,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::CsvGz, OutputFormat::Csv, OutputFormat::Parquet];

    /// Pick the format from the file name; anything unknown is rejected up front
    pub fn from_path(path: &Path) -> Result<Self, IbsgError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".csv.gz") {
            Ok(OutputFormat::CsvGz)
        } else if name.ends_with(".csv") {
            Ok(OutputFormat::Csv)
        } else if name.ends_with(".parquet") {
            Ok(OutputFormat::Parquet)
        } else {
            let suffix = match name.rfind('.') {
                Some(i) => name[i..].to_string(),
                None => name,
            };
            Err(IbsgError::UnsupportedOutputFormat(suffix))
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            OutputFormat::Csv => ".csv",
            OutputFormat::CsvGz => ".csv.gz",
            OutputFormat::Parquet => ".parquet",
        }
    }

    /// Replace whatever suffix `path` has with this format's suffix
    pub fn apply_to(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.split('.').next().unwrap_or_default();
        path.with_file_name(format!("{}{}", stem, self.suffix()))
    }
}

// ============================================================================
// CSV
// ============================================================================

enum Output {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Plain(w) => w.write(buf),
            Output::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Plain(w) => w.flush(),
            Output::Gzip(w) => w.flush(),
        }
    }
}

impl Output {
    fn finish(self) -> io::Result<()> {
        match self {
            Output::Plain(mut w) => w.flush(),
            Output::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// Streams serde records to a CSV (optionally gzip) file with a header row
pub struct CsvSink {
    writer: csv::Writer<Output>,
    rows: usize,
}

impl CsvSink {
    pub fn create(path: &Path, gzip: bool) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let buffered = BufWriter::new(file);
        let output = if gzip {
            Output::Gzip(GzEncoder::new(buffered, GzCompression::default()))
        } else {
            Output::Plain(buffered)
        };
        Ok(CsvSink {
            writer: csv::Writer::from_writer(output),
            rows: 0,
        })
    }

    pub fn finish(self) -> Result<usize> {
        let output = self
            .writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e.error()))?;
        output.finish().context("Failed to finish CSV output")?;
        Ok(self.rows)
    }
}

impl<T: Serialize> RecordSink<T> for CsvSink {
    fn write_record(&mut self, record: &T) -> Result<()> {
        self.writer.serialize(record).context("Failed to write CSV row")?;
        self.rows += 1;
        Ok(())
    }

    fn flush_records(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// ============================================================================
// PARQUET
// ============================================================================

enum ColumnBuilder {
    Text(StringBuilder),
    Real(Float64Builder),
    Integer(Int64Builder),
}

impl ColumnBuilder {
    fn new(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Text => ColumnBuilder::Text(StringBuilder::new()),
            ColumnType::Real => ColumnBuilder::Real(Float64Builder::new()),
            ColumnType::Integer => ColumnBuilder::Integer(Int64Builder::new()),
        }
    }

    fn append(&mut self, cell: Cell<'_>) -> Result<()> {
        match (self, cell) {
            (ColumnBuilder::Text(b), Cell::Text(v)) => b.append_option(v),
            (ColumnBuilder::Real(b), Cell::Real(v)) => b.append_option(v),
            (ColumnBuilder::Integer(b), Cell::Integer(v)) => b.append_option(v),
            (_, cell) => anyhow::bail!("cell {:?} does not match its declared column type", cell),
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Text(b) => Arc::new(b.finish()),
            ColumnBuilder::Real(b) => Arc::new(b.finish()),
            ColumnBuilder::Integer(b) => Arc::new(b.finish()),
        }
    }
}

/// Arrow schema for a record type
pub fn schema_for<T: Tabular>() -> SchemaRef {
    let fields: Vec<Field> = T::columns()
        .iter()
        .map(|c| {
            let data_type = match c.column_type {
                ColumnType::Text => DataType::Utf8,
                ColumnType::Real => DataType::Float64,
                ColumnType::Integer => DataType::Int64,
            };
            Field::new(c.name, data_type, c.nullable)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Buffers records column-wise and writes them as Parquet row groups
pub struct ParquetSink<T> {
    writer: ArrowWriter<File>,
    schema: SchemaRef,
    builders: Vec<ColumnBuilder>,
    buffered: usize,
    rows: usize,
    _record: PhantomData<T>,
}

impl<T: Tabular> ParquetSink<T> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let schema = schema_for::<T>();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .with_context(|| format!("Failed to open parquet writer {:?}", path))?;

        Ok(ParquetSink {
            writer,
            schema,
            builders: T::columns().iter().map(|c| ColumnBuilder::new(c.column_type)).collect(),
            buffered: 0,
            rows: 0,
            _record: PhantomData,
        })
    }

    fn write_batch(&mut self) -> Result<()> {
        if self.buffered == 0 {
            return Ok(());
        }
        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)
            .context("Failed to assemble record batch")?;
        self.writer.write(&batch).context("Failed to write record batch")?;
        self.buffered = 0;
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize> {
        self.write_batch()?;
        self.writer.close().context("Failed to close parquet writer")?;
        Ok(self.rows)
    }
}

impl<T: Tabular> RecordSink<T> for ParquetSink<T> {
    fn write_record(&mut self, record: &T) -> Result<()> {
        for (builder, cell) in self.builders.iter_mut().zip(record.cells()) {
            builder.append(cell)?;
        }
        self.buffered += 1;
        self.rows += 1;
        if self.buffered >= PARQUET_BATCH_ROWS {
            self.write_batch()?;
        }
        Ok(())
    }

    fn flush_records(&mut self) -> Result<()> {
        self.write_batch()
    }
}

// ============================================================================
// TABLE SINK
// ============================================================================

enum TableWriter<T> {
    Csv(CsvSink, PhantomData<T>),
    Parquet(ParquetSink<T>),
}

/// Output file sink for any supported format.
/// Rows go to `<path>.part`; `finish` moves it over `path`, `discard` removes it.
pub struct TableSink<T> {
    writer: TableWriter<T>,
    path: PathBuf,
    part: PathBuf,
}

impl<T: Tabular + Serialize> TableSink<T> {
    pub fn create(path: &Path) -> Result<Self> {
        let format = OutputFormat::from_path(path)?;
        let part = part_path(path);
        let writer = match format {
            OutputFormat::Csv => TableWriter::Csv(CsvSink::create(&part, false)?, PhantomData),
            OutputFormat::CsvGz => TableWriter::Csv(CsvSink::create(&part, true)?, PhantomData),
            OutputFormat::Parquet => TableWriter::Parquet(ParquetSink::create(&part)?),
        };
        Ok(TableSink {
            writer,
            path: path.to_path_buf(),
            part,
        })
    }

    /// Flush and close the file, then put it in place; returns the number of rows written
    pub fn finish(self) -> Result<usize> {
        let TableSink { writer, path, part } = self;
        let closed = match writer {
            TableWriter::Csv(sink, _) => sink.finish(),
            TableWriter::Parquet(sink) => sink.finish(),
        };
        let rows = match closed {
            Ok(rows) => rows,
            Err(e) => {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
        };
        fs::rename(&part, &path).with_context(|| format!("Failed to move {:?} to {:?}", part, path))?;
        Ok(rows)
    }

    /// Drop what was written so far; an existing file at the output path is left alone
    pub fn discard(self) {
        let TableSink { writer, part, .. } = self;
        drop(writer);
        if fs::remove_file(&part).is_ok() {
            warn!(part = %part.display(), "partial output removed");
        }
    }
}

impl<T: Tabular + Serialize> RecordSink<T> for TableSink<T> {
    fn write_record(&mut self, record: &T) -> Result<()> {
        match &mut self.writer {
            TableWriter::Csv(sink, _) => sink.write_record(record),
            TableWriter::Parquet(sink) => sink.write_record(record),
        }
    }

    fn flush_records(&mut self) -> Result<()> {
        match &mut self.writer {
            TableWriter::Csv(sink, _) => RecordSink::<T>::flush_records(sink),
            TableWriter::Parquet(sink) => sink.flush_records(),
        }
    }
}

/// Write a whole table to `path` in the format its suffix names
pub fn write_table<T: Tabular + Serialize>(records: &[T], path: &Path) -> Result<usize> {
    let mut sink = TableSink::create(path)?;
    for record in records {
        if let Err(e) = sink.write_record(record) {
            sink.discard();
            return Err(e);
        }
    }
    let rows = sink.finish()?;
    info!(rows, path = %path.display(), "table written");
    Ok(rows)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{BerRecord, CensusBuilding, MergedBuilding};
    use flate2::read::GzDecoder;
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use std::io::Read;

    fn sample() -> Vec<BerRecord> {
        vec![
            BerRecord {
                county_name: "Dublin 11".to_string(),
                ground_floor_area: Some(120.0),
                year_of_construction: Some(1975),
                ..BerRecord::default()
            },
            BerRecord {
                county_name: "Co. Cork".to_string(),
                ..BerRecord::default()
            },
        ]
    }

    #[test]
    fn test_format_from_suffix() {
        assert_eq!(OutputFormat::from_path(Path::new("out.csv")).unwrap(), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_path(Path::new("out.csv.gz")).unwrap(), OutputFormat::CsvGz);
        assert_eq!(OutputFormat::from_path(Path::new("OUT.PARQUET")).unwrap(), OutputFormat::Parquet);
    }

    #[test]
    fn test_unsupported_suffix_is_named() {
        let err = OutputFormat::from_path(Path::new("stock.xlsx")).unwrap_err();
        assert!(matches!(err, IbsgError::UnsupportedOutputFormat(ref s) if s == ".xlsx"));
        assert!(err.to_string().contains(".xlsx"));

        let err = write_table(&sample(), Path::new("/tmp/ibsg-never-written.json")).unwrap_err();
        assert!(err.to_string().contains(".json"));
    }

    #[test]
    fn test_apply_suffix() {
        let path = OutputFormat::Parquet.apply_to(Path::new("/data/stock.csv.gz"));
        assert_eq!(path, Path::new("/data/stock.parquet"));
    }

    #[test]
    fn test_write_plain_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bers.csv");

        let rows = write_table(&sample(), &path).unwrap();
        assert_eq!(rows, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("CountyName,SmallArea,"));
        assert!(lines[1].starts_with("Dublin 11,"));
    }

    #[test]
    fn test_write_gzip_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bers.csv.gz");
        write_table(&sample(), &path).unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("Co. Cork"));
    }

    #[test]
    fn test_write_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stock.parquet");

        let census = CensusBuilding {
            small_area: "267001001".to_string(),
            countyname: "DUBLIN 11".to_string(),
            period_built: "1971 - 1980".to_string(),
        };
        let merged = vec![
            MergedBuilding::new(&census, None, 0),
            MergedBuilding::new(&census, None, 0),
            MergedBuilding::new(&census, None, 0),
        ];
        assert_eq!(write_table(&merged, &path).unwrap(), 3);

        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        let meta = reader.metadata().file_metadata();
        assert_eq!(meta.num_rows(), 3);
        assert_eq!(meta.schema_descr().num_columns(), MergedBuilding::columns().len());
    }

    #[test]
    fn test_finish_moves_part_file_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bers.csv.gz");

        let mut sink = TableSink::<BerRecord>::create(&path).unwrap();
        sink.write_record(&sample()[0]).unwrap();
        assert!(!path.exists(), "Nothing at the output path until finish");
        assert!(part_path(&path).exists());

        assert_eq!(sink.finish().unwrap(), 1);
        assert!(path.exists());
        assert!(!part_path(&path).exists());
    }

    #[test]
    fn test_discard_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bers.csv");
        std::fs::write(&path, "previous run\n").unwrap();

        let mut sink = TableSink::<BerRecord>::create(&path).unwrap();
        for record in sample() {
            sink.write_record(&record).unwrap();
        }
        sink.discard();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous run\n");
        assert!(!part_path(&path).exists());
    }

    #[test]
    fn test_arrow_schema_nullability() {
        let schema = schema_for::<BerRecord>();
        let county = schema.field_with_name("CountyName").unwrap();
        assert!(!county.is_nullable());
        assert_eq!(county.data_type(), &DataType::Utf8);
        assert_eq!(
            schema.field_with_name("Year_of_Construction").unwrap().data_type(),
            &DataType::Int64
        );
    }
}
