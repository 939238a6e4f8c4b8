// Irish Building Stock Generator - Core Library
// Exposes all modules for use in the CLI, the interactive form, and tests

pub mod error;
pub mod config;
pub mod schema;    // Column declarations shared by SQLite and Parquet
pub mod records;
pub mod fetch;
pub mod archive;
pub mod store;     // SQLite row store + chunked ingest
pub mod filter;
pub mod census;
pub mod merge;
pub mod export;
pub mod pipeline;

// Re-export commonly used types
pub use error::IbsgError;
pub use config::{Bounds, Config, DatasetSource, DownloadForm};
pub use records::{BerAttribute, BerRecord, CensusBuilding, MergedBuilding};
pub use fetch::Fetcher;
pub use archive::{extract_payload, unzip, BER_PAYLOAD};
pub use store::{BerReader, IngestReport, RowStore, SourceFormat};
pub use filter::{filter_by_substrings, FilterSet, NamedFilter, Rule, SubstringMatcher};
pub use census::{load_census_buildings, replace_not_stated_period_built_with_mode};
pub use merge::{fill_census_with_bers, Aggregation, Granularity};
pub use export::{write_table, OutputFormat, RecordSink, TableSink};
pub use pipeline::{
    default_output, fetch_postcode_bers, generate_building_stock, ingest_postcode_bers,
    GenerateReport, Selections, Workspace,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
