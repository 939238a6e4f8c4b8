// 🏗️ Building Stock Pipeline
// fetch → extract → ingest → filter → (census fill) → export

use crate::archive::{extract_payload, first_entry, read_entry, BER_PAYLOAD};
use crate::census::{load_census_buildings, replace_not_stated_period_built_with_mode};
use crate::config::{Bounds, Config, DatasetSource};
use crate::export::{write_table, OutputFormat, RecordSink, TableSink};
use crate::fetch::Fetcher;
use crate::filter::{filter_by_substrings, FilterSet, NamedFilter, SubstringMatcher};
use crate::merge::{fill_census_with_bers, Aggregation, Granularity};
use crate::records::BerRecord;
use crate::store::{BerReader, IngestReport, RowStore, SourceFormat};
use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// SELECTIONS
// ============================================================================

/// Everything a user chooses before generating a building stock
#[derive(Debug, Clone, PartialEq)]
pub struct Selections {
    pub granularity: Granularity,
    /// Postcode / county labels to keep; all of them means no filtering
    pub countyname: Vec<String>,
    pub filters: Vec<NamedFilter>,
    /// Bounds keyed by BER column name
    pub bounds: BTreeMap<String, Bounds>,
    pub census: bool,
    pub aggregation: Aggregation,
    /// Local small-area extract to use instead of the configured one
    pub small_area_bers: Option<PathBuf>,
    pub output: PathBuf,
}

impl Selections {
    /// Every county, every filter, the configured bounds, no census merge
    pub fn from_config(config: &Config) -> Self {
        Selections {
            granularity: Granularity::default(),
            countyname: config.countyname.clone(),
            filters: NamedFilter::ALL.to_vec(),
            bounds: config.bounds.clone(),
            census: false,
            aggregation: Aggregation::default(),
            small_area_bers: None,
            output: default_output(config, false),
        }
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        Ok(OutputFormat::from_path(&self.output)?)
    }

    /// Check bounds of the selected filters only
    pub fn validate(&self) -> Result<()> {
        for filter in &self.filters {
            if let Some(attribute) = filter.attribute() {
                if let Some(bounds) = self.bounds.get(attribute.column()) {
                    bounds.validate(filter.label())?;
                }
            }
        }
        Ok(())
    }
}

/// Configured output file name for a BER-only or census-filled run
pub fn default_output(config: &Config, census: bool) -> PathBuf {
    if census {
        PathBuf::from(&config.census_buildings.output)
    } else {
        PathBuf::from(&config.postcode_bers.output)
    }
}

// ============================================================================
// WORKSPACE
// ============================================================================

/// Where downloads and row stores live, and the date used to name downloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub data_dir: PathBuf,
    pub store_dir: PathBuf,
    pub date: NaiveDate,
}

impl Workspace {
    pub fn new(data_dir: &Path) -> Self {
        Workspace {
            data_dir: data_dir.to_path_buf(),
            store_dir: data_dir.join("stores"),
            date: Local::now().date_naive(),
        }
    }

    pub fn with_store_dir(mut self, store_dir: &Path) -> Self {
        self.store_dir = store_dir.to_path_buf();
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    /// `BERPublicsearch.zip` becomes `BERPublicsearch-19-10-2026`
    pub fn dated_stem(&self, source: &DatasetSource) -> String {
        format!("{}-{}", file_stem(&source.filename), self.date.format("%d-%m-%Y"))
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.store_dir] {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {:?}", dir))?;
        }
        Ok(())
    }
}

fn file_stem(filename: &str) -> &str {
    filename.split('.').next().unwrap_or(filename)
}

// ============================================================================
// DATASETS
// ============================================================================

/// Download (when needed) and extract today's BER register; returns the CSV path
pub fn fetch_postcode_bers(config: &Config, workspace: &Workspace, fetcher: &Fetcher) -> Result<PathBuf> {
    workspace.ensure_dirs()?;
    let stem = workspace.dated_stem(&config.postcode_bers);
    let extract_dir = workspace.data_dir.join(&stem);
    let csv_path = extract_dir.join(BER_PAYLOAD).with_extension("csv");
    if csv_path.exists() {
        info!(path = %csv_path.display(), "using extracted BER register");
        return Ok(csv_path);
    }

    let archive = workspace.data_dir.join(format!("{}.zip", stem));
    let downloaded = !archive.exists();
    if downloaded {
        info!(archive = %archive.display(), "BER register not downloaded yet");
        fetcher.post_form(&config.download, &archive)?;
    }
    extract_payload(&archive, &extract_dir, BER_PAYLOAD).map_err(|e| {
        // A body that is not the register (an error page, say) must not be reused tomorrow
        if downloaded {
            warn!(archive = %archive.display(), "downloaded archive unusable, removing it");
            let _ = fs::remove_file(&archive);
        }
        e
    })
}

/// Fetch and ingest the BER register into its row store
pub fn ingest_postcode_bers(
    config: &Config,
    workspace: &Workspace,
    fetcher: &Fetcher,
) -> Result<(RowStore, IngestReport)> {
    let source = fetch_postcode_bers(config, workspace, fetcher)?;
    let mut store = RowStore::open(&RowStore::path_for(&source, &workspace.store_dir))?;
    let report = store.ingest(
        &source,
        SourceFormat::BER_PUBLIC_SEARCH,
        &BTreeMap::new(),
        config.chunk_size,
    )?;
    Ok((store, report))
}

/// Use `local` if given, else the configured file, downloading it when a URL is known
fn locate_source(
    source: &DatasetSource,
    local: Option<&Path>,
    workspace: &Workspace,
    fetcher: &Fetcher,
) -> Result<PathBuf> {
    if let Some(path) = local {
        if !path.exists() {
            bail!("{:?} does not exist", path);
        }
        return Ok(path.to_path_buf());
    }

    let path = workspace.data_dir.join(&source.filename);
    if path.exists() {
        return Ok(path);
    }
    if !source.has_url() {
        bail!(
            "{:?} not found and no download URL is configured; place the file there or set its url",
            path
        );
    }
    workspace.ensure_dirs()?;
    info!(url = %source.url, path = %path.display(), "source file missing, downloading");
    fetcher.get(&source.url, &path)?;
    Ok(path)
}

/// Read the zipped small-area BER extract, renaming its columns
pub fn load_small_area_bers(
    config: &Config,
    workspace: &Workspace,
    local: Option<&Path>,
    fetcher: &Fetcher,
) -> Result<Vec<BerRecord>> {
    let archive = locate_source(&config.small_area_bers, local, workspace, fetcher)?;
    let entry = first_entry(&archive)?;

    let bers = read_entry(&archive, &entry, |payload| {
        BerReader::new(payload, SourceFormat::CSV, &config.small_area_column_mappings)?
            .read_all(config.chunk_size)
    })
    .with_context(|| format!("Failed to read small area BERs from {:?} in {:?}", entry, archive))?;
    info!(rows = bers.len(), archive = %archive.display(), "small area BERs loaded");
    Ok(bers)
}

// ============================================================================
// GENERATE
// ============================================================================

/// What a run produced
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateReport {
    pub output: PathBuf,
    pub rows: usize,
    /// BER records surviving the range filters
    pub bers_kept: usize,
    pub ingest: Option<IngestReport>,
}

/// Forward only records whose county matches
struct CountySink<'a, S> {
    inner: S,
    matcher: &'a SubstringMatcher,
}

impl<S: RecordSink<BerRecord>> RecordSink<BerRecord> for CountySink<'_, S> {
    fn write_record(&mut self, record: &BerRecord) -> Result<()> {
        if self.matcher.matches(&record.county_name) {
            self.inner.write_record(record)?;
        }
        Ok(())
    }

    fn flush_records(&mut self) -> Result<()> {
        self.inner.flush_records()
    }
}

/// Produce the building stock file described by `selections`
pub fn generate_building_stock(
    config: &Config,
    workspace: &Workspace,
    selections: &Selections,
    fetcher: &Fetcher,
) -> Result<GenerateReport> {
    // Fail on a bad output name before any download
    let format = selections.output_format()?;
    selections.validate()?;
    let filters = FilterSet::new(&selections.filters, &selections.bounds);
    info!(
        format = ?format,
        granularity = %selections.granularity,
        rules = filters.rules().count(),
        census = selections.census,
        "generating building stock"
    );

    let mut ingest = None;
    let bers = match selections.granularity {
        Granularity::Postcode => {
            let (store, report) = ingest_postcode_bers(config, workspace, fetcher)?;
            ingest = Some(report);

            if !selections.census {
                // Straight from the store to the output file
                let matcher = SubstringMatcher::new(&selections.countyname, &config.countyname);
                let mut sink = CountySink {
                    inner: TableSink::<BerRecord>::create(&selections.output)?,
                    matcher: &matcher,
                };
                let filtered = match filters.apply_to_store(&store, config.chunk_size, &mut sink) {
                    Ok(filtered) => filtered,
                    Err(e) => {
                        sink.inner.discard();
                        return Err(e);
                    }
                };
                let rows = sink.inner.finish()?;
                info!(rows, path = %selections.output.display(), "table written");
                return Ok(GenerateReport {
                    output: selections.output.clone(),
                    rows,
                    bers_kept: filtered.kept,
                    ingest,
                });
            }

            let mut kept = Vec::new();
            filters.apply_to_store(&store, config.chunk_size, &mut kept)?;
            kept
        }
        Granularity::SmallArea => {
            let bers = load_small_area_bers(
                config,
                workspace,
                selections.small_area_bers.as_deref(),
                fetcher,
            )?;
            filters.apply(bers)
        }
    };
    let bers_kept = bers.len();

    let rows = if selections.census {
        let path = locate_source(&config.census_buildings, None, workspace, fetcher)?;
        let buildings = load_census_buildings(&path)?;
        let buildings = filter_by_substrings(
            buildings,
            |b| b.countyname.as_str(),
            &selections.countyname,
            &config.countyname,
        );
        let buildings =
            replace_not_stated_period_built_with_mode(buildings, &config.placeholder_period_built);
        let merged = fill_census_with_bers(buildings, &bers, selections.granularity, selections.aggregation);
        write_table(&merged, &selections.output)?
    } else {
        let bers = filter_by_substrings(
            bers,
            |b| b.county_name.as_str(),
            &selections.countyname,
            &config.countyname,
        );
        write_table(&bers, &selections.output)?
    };

    Ok(GenerateReport {
        output: selections.output.clone(),
        rows,
        bers_kept,
        ingest,
    })
}

// ============================================================================
// TESTS
// ============================================================================
