// 🗄️ Row Store - chunked ingestion of the BER register into SQLite
// The register is large; it is parsed once and queried from the store afterwards

use crate::records::BerRecord;
use crate::schema::{column_list, create_table_sql, Tabular};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Table holding the ingested BER register
pub const BERS_TABLE: &str = "bers";

/// Rows per ingest / filter chunk
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

// ============================================================================
// SOURCE FORMAT
// ============================================================================

/// How a delimited source file is laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub delimiter: u8,
    /// Fields are Latin-1 rather than UTF-8
    pub latin1: bool,
    pub quoting: bool,
}

impl SourceFormat {
    /// The BER public search extract: tab separated, Latin-1, no quoting
    pub const BER_PUBLIC_SEARCH: SourceFormat = SourceFormat {
        delimiter: b'\t',
        latin1: true,
        quoting: false,
    };

    /// Plain comma separated UTF-8
    pub const CSV: SourceFormat = SourceFormat {
        delimiter: b',',
        latin1: false,
        quoting: true,
    };
}

/// Latin-1 maps every byte to the code point of the same value
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

// ============================================================================
// BER READER
// ============================================================================

/// Typed, chunked reader over a delimited BER file
pub struct BerReader<R: Read> {
    reader: csv::Reader<R>,
    headers: csv::StringRecord,
    format: SourceFormat,
    raw: csv::ByteRecord,
}

impl BerReader<File> {
    pub fn from_path(
        path: &Path,
        format: SourceFormat,
        mappings: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        BerReader::new(file, format, mappings)
    }
}

impl<R: Read> BerReader<R> {
    /// Wrap a reader; `mappings` renames source headers to BER column names
    pub fn new(rdr: R, format: SourceFormat, mappings: &BTreeMap<String, String>) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(format.delimiter)
            .quoting(format.quoting)
            .has_headers(true)
            .from_reader(rdr);

        let raw_headers = reader.byte_headers().context("Failed to read header row")?.clone();

        let mut headers = csv::StringRecord::new();
        for field in raw_headers.iter() {
            let name = decode_field(field, format).context("Failed to decode header row")?;
            let name = name.trim();
            match mappings.get(name) {
                Some(mapped) => headers.push_field(mapped),
                None => headers.push_field(name),
            }
        }

        Ok(BerReader {
            reader,
            headers,
            format,
            raw: csv::ByteRecord::new(),
        })
    }

    /// Next chunk of at most `size` records; empty once the input is exhausted
    pub fn next_chunk(&mut self, size: usize) -> Result<Vec<BerRecord>> {
        let mut chunk = Vec::with_capacity(size.min(DEFAULT_CHUNK_SIZE));

        while chunk.len() < size {
            let more = self
                .reader
                .read_byte_record(&mut self.raw)
                .context("Failed to parse delimited row")?;
            if !more {
                break;
            }

            let line = self.raw.position().map(|p| p.line()).unwrap_or(0);
            let mut record = csv::StringRecord::new();
            for field in self.raw.iter() {
                let value = decode_field(field, self.format)
                    .with_context(|| format!("Invalid text on line {}", line))?;
                record.push_field(value.trim());
            }

            let ber: BerRecord = record
                .deserialize(Some(&self.headers))
                .with_context(|| format!("Failed to read BER record on line {}", line))?;
            chunk.push(ber);
        }

        Ok(chunk)
    }

    /// Drain the whole input into memory
    pub fn read_all(&mut self, chunk_size: usize) -> Result<Vec<BerRecord>> {
        let mut records = Vec::new();
        loop {
            let chunk = self.next_chunk(chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            records.extend(chunk);
        }
        Ok(records)
    }
}

fn decode_field(field: &[u8], format: SourceFormat) -> Result<String> {
    if format.latin1 {
        Ok(latin1_to_string(field))
    } else {
        Ok(String::from_utf8(field.to_vec())?)
    }
}

// ============================================================================
// ROW STORE
// ============================================================================

/// What an ingest call did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestReport {
    /// The table already existed and nothing was read
    pub skipped: bool,
    pub rows: usize,
    pub chunks: usize,
}

/// Handle to an on-disk (or in-memory) SQLite store of BER rows.
///
/// The `bers` table is written once by [`RowStore::ingest`] and read-only
/// afterwards. Reusing a handle, or reopening the same path, skips the parse.
/// Two processes ingesting into the same path at once is not supported.
pub struct RowStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl RowStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open row store {:?}", path))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(RowStore {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(RowStore {
            conn: Connection::open_in_memory()?,
            path: None,
        })
    }

    /// Store file for a given source file.
    ///
    /// Named after the source's parent directory (the dated extract folder)
    /// plus a digest of the full source path, so two extracts never share a
    /// store by accident.
    pub fn path_for(source: &Path, store_dir: &Path) -> PathBuf {
        let name = source
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| BERS_TABLE.to_string());

        let digest = Sha256::digest(source.to_string_lossy().as_bytes());
        let short: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();

        store_dir.join(format!("{}-{}.db", name, short))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn has_table(&self, table: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Ingest a source file unless the store already holds the `bers` table
    pub fn ingest(
        &mut self,
        source: &Path,
        format: SourceFormat,
        mappings: &BTreeMap<String, String>,
        chunk_size: usize,
    ) -> Result<IngestReport> {
        if self.has_table(BERS_TABLE)? {
            info!(store = ?self.path, "bers table already present, skipping ingest");
            return Ok(IngestReport {
                skipped: true,
                ..IngestReport::default()
            });
        }

        let reader = BerReader::from_path(source, format, mappings)?;
        self.ingest_reader(reader, chunk_size)
            .with_context(|| format!("Failed to ingest {:?}", source))
    }

    /// Append every chunk of `reader` to a freshly created `bers` table.
    ///
    /// All chunks share one transaction: on any error the table is rolled
    /// back and the store is left as it was.
    pub fn ingest_reader<R: Read>(
        &mut self,
        mut reader: BerReader<R>,
        chunk_size: usize,
    ) -> Result<IngestReport> {
        let chunk_size = chunk_size.max(1);
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            BERS_TABLE,
            column_list::<BerRecord>(),
            vec!["?"; BerRecord::columns().len()].join(", ")
        );
        let label = self
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string());

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));

        let tx = self.conn.transaction()?;
        tx.execute(&create_table_sql::<BerRecord>(BERS_TABLE), [])?;

        let mut report = IngestReport::default();
        loop {
            let chunk = reader.next_chunk(chunk_size)?;
            if chunk.is_empty() {
                break;
            }

            {
                let mut stmt = tx.prepare_cached(&insert_sql)?;
                for record in &chunk {
                    stmt.execute(params_from_iter(record.cells()))?;
                }
            }

            report.rows += chunk.len();
            debug!(chunk = report.chunks, rows = chunk.len(), "chunk staged");
            spinner.set_message(format!("Chunk {} saved to {}", report.chunks, label));
            report.chunks += 1;
        }

        tx.commit()?;
        spinner.finish_and_clear();

        info!(rows = report.rows, chunks = report.chunks, store = %label, "ingest complete");
        Ok(report)
    }

    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", BERS_TABLE), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Drop the `bers` table so the next ingest re-reads the source
    pub fn clear(&self) -> Result<()> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS {}", BERS_TABLE), [])?;
        Ok(())
    }

    /// Iterate the stored rows in rowid order, `chunk_size` rows at a time
    pub fn chunks(&self, chunk_size: usize) -> StoreChunks<'_> {
        StoreChunks {
            store: self,
            chunk_size: chunk_size.max(1),
            last_rowid: 0,
            done: false,
        }
    }

    fn read_page(&self, after: i64, limit: usize) -> Result<Vec<(i64, BerRecord)>> {
        let ncols = BerRecord::columns().len();
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {}, rowid FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            column_list::<BerRecord>(),
            BERS_TABLE
        ))?;

        let rows = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok((row.get::<_, i64>(ncols)?, BerRecord::from_row(row)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

/// Chunked iterator over the `bers` table
pub struct StoreChunks<'a> {
    store: &'a RowStore,
    chunk_size: usize,
    last_rowid: i64,
    done: bool,
}

impl Iterator for StoreChunks<'_> {
    type Item = Result<Vec<BerRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.store.read_page(self.last_rowid, self.chunk_size) {
            Ok(page) if page.is_empty() => {
                self.done = true;
                None
            }
            Ok(page) => {
                if page.len() < self.chunk_size {
                    self.done = true;
                }
                self.last_rowid = page.last().map(|(id, _)| *id).unwrap_or(self.last_rowid);
                Some(Ok(page.into_iter().map(|(_, record)| record).collect()))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &[u8] = b"CountyName\tTypeofRating\tGroundFloorArea\tLivingAreaPercent\tYear_of_Construction\tUnused\n\
Dublin 11\tExisting    \t120.5\t25\t1975\tx\n\
Co. Galway\tProvisional    \t\t30\t2001\ty\n\
Co. Cork\tNew Dwelling\t999\t10\t\tz\n";

    fn no_mappings() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_reader_yields_typed_chunks() {
        let mut reader =
            BerReader::new(Cursor::new(SAMPLE), SourceFormat::BER_PUBLIC_SEARCH, &no_mappings())
                .unwrap();

        let first = reader.next_chunk(2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].county_name, "Dublin 11");
        assert_eq!(first[0].type_of_rating.as_deref(), Some("Existing"));
        assert_eq!(first[0].ground_floor_area, Some(120.5));
        assert_eq!(first[0].year_of_construction, Some(1975));
        assert_eq!(first[1].ground_floor_area, None);

        let second = reader.next_chunk(2).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].year_of_construction, None);

        assert!(reader.next_chunk(2).unwrap().is_empty());
    }

    #[test]
    fn test_reader_decodes_latin1() {
        let data = b"CountyName\tDwellingTypeDescr\nCo. D\xfan na nGall\tM\xe9id-terrace house\n";
        let mut reader =
            BerReader::new(Cursor::new(&data[..]), SourceFormat::BER_PUBLIC_SEARCH, &no_mappings())
                .unwrap();

        let records = reader.read_all(10).unwrap();
        assert_eq!(records[0].county_name, "Co. Dún na nGall");
        assert_eq!(records[0].dwelling_type.as_deref(), Some("Méid-terrace house"));
    }

    #[test]
    fn test_reader_keeps_quote_characters_literally() {
        let data = b"CountyName\tDwellingTypeDescr\tGroundFloorArea\nCo. \"Cork\t\"Semi\"-detached house\t95\nCo. Mayo\tApartment\"\t60\n";
        let mut reader =
            BerReader::new(Cursor::new(&data[..]), SourceFormat::BER_PUBLIC_SEARCH, &no_mappings())
                .unwrap();

        let records = reader.read_all(10).unwrap();
        assert_eq!(records.len(), 2, "An unbalanced quote must not swallow the next row");
        assert_eq!(records[0].county_name, "Co. \"Cork");
        assert_eq!(records[0].dwelling_type.as_deref(), Some("\"Semi\"-detached house"));
        assert_eq!(records[0].ground_floor_area, Some(95.0));
        assert_eq!(records[1].dwelling_type.as_deref(), Some("Apartment\""));
    }

    #[test]
    fn test_reader_applies_column_mappings() {
        let data = b"countyname,cso_small_area,ground_floor_area\nCo. Cork,047001001,88\n";
        let mut mappings = BTreeMap::new();
        mappings.insert("countyname".to_string(), "CountyName".to_string());
        mappings.insert("cso_small_area".to_string(), "SmallArea".to_string());
        mappings.insert("ground_floor_area".to_string(), "GroundFloorArea".to_string());

        let mut reader = BerReader::new(Cursor::new(&data[..]), SourceFormat::CSV, &mappings).unwrap();
        let records = reader.read_all(10).unwrap();

        assert_eq!(records[0].small_area.as_deref(), Some("047001001"));
        assert_eq!(records[0].ground_floor_area, Some(88.0));
    }

    #[test]
    fn test_type_coercion_failure_is_fatal() {
        let data = b"CountyName\tGroundFloorArea\nCo. Cork\tbig\n";
        let mut reader =
            BerReader::new(Cursor::new(&data[..]), SourceFormat::BER_PUBLIC_SEARCH, &no_mappings())
                .unwrap();

        let err = reader.next_chunk(10).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_ingest_in_chunks_then_read_back() {
        let mut store = RowStore::open_in_memory().unwrap();
        let reader =
            BerReader::new(Cursor::new(SAMPLE), SourceFormat::BER_PUBLIC_SEARCH, &no_mappings())
                .unwrap();

        let report = store.ingest_reader(reader, 2).unwrap();
        assert_eq!(report.rows, 3);
        assert_eq!(report.chunks, 2);
        assert_eq!(store.count().unwrap(), 3);

        let chunks: Vec<Vec<BerRecord>> = store.chunks(2).collect::<Result<_>>().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0][0].county_name, "Dublin 11");
        assert_eq!(chunks[1][0].county_name, "Co. Cork");
        assert_eq!(chunks[1][0].ground_floor_area, Some(999.0));
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("BERPublicsearch.csv");
        std::fs::write(&source, SAMPLE).unwrap();
        let db = RowStore::path_for(&source, dir.path());

        let mut store = RowStore::open(&db).unwrap();
        let first = store
            .ingest(&source, SourceFormat::BER_PUBLIC_SEARCH, &no_mappings(), 100)
            .unwrap();
        assert!(!first.skipped);
        assert_eq!(first.rows, 3);
        drop(store);

        let mut reopened = RowStore::open(&db).unwrap();
        let second = reopened
            .ingest(&source, SourceFormat::BER_PUBLIC_SEARCH, &no_mappings(), 100)
            .unwrap();
        assert!(second.skipped);
        assert_eq!(reopened.count().unwrap(), 3, "Second ingest must not append rows");
    }

    #[test]
    fn test_failed_ingest_leaves_no_table() {
        let data = b"CountyName\tGroundFloorArea\nCo. Cork\t10\nCo. Mayo\t20\nCo. Sligo\tlots\n";
        let mut store = RowStore::open_in_memory().unwrap();
        let reader =
            BerReader::new(Cursor::new(&data[..]), SourceFormat::BER_PUBLIC_SEARCH, &no_mappings())
                .unwrap();

        // First chunk parses fine, the second one fails
        assert!(store.ingest_reader(reader, 2).is_err());
        assert!(!store.has_table(BERS_TABLE).unwrap());
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RowStore::open_in_memory().unwrap();
        let result = store.ingest(
            &dir.path().join("missing.csv"),
            SourceFormat::BER_PUBLIC_SEARCH,
            &no_mappings(),
            100,
        );
        assert!(result.is_err());
        assert!(!store.has_table(BERS_TABLE).unwrap());
    }

    #[test]
    fn test_path_for_uses_parent_directory_name() {
        let store_dir = Path::new("/tmp");
        let a = RowStore::path_for(Path::new("/data/BERPublicsearch-01-02-2024/x.csv"), store_dir);
        let b = RowStore::path_for(Path::new("/other/BERPublicsearch-01-02-2024/x.csv"), store_dir);

        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("BERPublicsearch-01-02-2024-"));
        assert!(name.ends_with(".db"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_clear_drops_table() {
        let mut store = RowStore::open_in_memory().unwrap();
        let reader =
            BerReader::new(Cursor::new(SAMPLE), SourceFormat::BER_PUBLIC_SEARCH, &no_mappings())
                .unwrap();
        store.ingest_reader(reader, 10).unwrap();
        store.clear().unwrap();
        assert!(!store.has_table(BERS_TABLE).unwrap());
    }
}
