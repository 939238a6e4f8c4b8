// 🏘️ Census building stock - loading and period-built cleaning

use crate::records::CensusBuilding;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Read census buildings from a CSV file (gzip-compressed when it ends in `.gz`)
pub fn load_census_buildings(path: &Path) -> Result<Vec<CensusBuilding>> {
    let file = File::open(path).with_context(|| format!("Failed to open census file {:?}", path))?;
    let is_gzip = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    let buildings = if is_gzip {
        read_census_buildings(GzDecoder::new(file))
    } else {
        read_census_buildings(file)
    }
    .with_context(|| format!("Failed to read census file {:?}", path))?;

    info!(rows = buildings.len(), path = %path.display(), "census buildings loaded");
    Ok(buildings)
}

pub fn read_census_buildings<R: Read>(rdr: R) -> Result<Vec<CensusBuilding>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(rdr);

    let mut buildings = Vec::new();
    for result in reader.deserialize() {
        let building: CensusBuilding = result.context("Failed to deserialize census building")?;
        buildings.push(building);
    }
    Ok(buildings)
}

/// Most frequent period built, ignoring the placeholder.
/// Ties go to the value seen first, so the answer only depends on input order.
pub fn period_built_mode(buildings: &[CensusBuilding], placeholder: &str) -> Option<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, building) in buildings.iter().enumerate() {
        let value = building.period_built.as_str();
        if value == placeholder {
            continue;
        }
        counts.entry(value).or_insert((0, position)).0 += 1;
    }

    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(value, _)| value.to_string())
}

/// Replace every `placeholder` period built with the table's mode.
///
/// When no building has a real period built there is nothing to replace
/// with, and the table comes back unchanged.
pub fn replace_not_stated_period_built_with_mode(
    buildings: Vec<CensusBuilding>,
    placeholder: &str,
) -> Vec<CensusBuilding> {
    let Some(mode) = period_built_mode(&buildings, placeholder) else {
        warn!(placeholder, "no stated period built to use as a mode");
        return buildings;
    };

    let mut replaced = 0usize;
    let cleaned: Vec<CensusBuilding> = buildings
        .into_iter()
        .map(|building| {
            if building.period_built == placeholder {
                replaced += 1;
                CensusBuilding {
                    period_built: mode.clone(),
                    ..building
                }
            } else {
                building
            }
        })
        .collect();

    info!(replaced, mode = %mode, "placeholder period built replaced");
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const NOT_STATED: &str = "not stated";

    fn building(small_area: &str, period_built: &str) -> CensusBuilding {
        CensusBuilding {
            small_area: small_area.to_string(),
            countyname: "DUBLIN 11".to_string(),
            period_built: period_built.to_string(),
        }
    }

    #[test]
    fn test_mode_replaces_placeholder() {
        let buildings = vec![
            building("A", "1971 - 1980"),
            building("A", NOT_STATED),
            building("B", "2001 - 2010"),
            building("B", "1971 - 1980"),
            building("C", NOT_STATED),
        ];

        let mode = period_built_mode(&buildings, NOT_STATED);
        assert_eq!(mode.as_deref(), Some("1971 - 1980"));

        let cleaned = replace_not_stated_period_built_with_mode(buildings.clone(), NOT_STATED);
        assert_eq!(cleaned.len(), buildings.len());
        assert!(cleaned.iter().all(|b| b.period_built != NOT_STATED));
        assert_eq!(cleaned[1].period_built, "1971 - 1980");
        assert_eq!(cleaned[4].period_built, "1971 - 1980");
        assert_eq!(cleaned[2].period_built, "2001 - 2010", "Stated values are untouched");
    }

    #[test]
    fn test_mode_tie_goes_to_first_seen() {
        let buildings = vec![
            building("A", "2001 - 2010"),
            building("B", "before 1919"),
            building("C", "before 1919"),
            building("D", "2001 - 2010"),
        ];
        assert_eq!(period_built_mode(&buildings, NOT_STATED).as_deref(), Some("2001 - 2010"));

        let reversed: Vec<CensusBuilding> = buildings.into_iter().rev().collect();
        assert_eq!(period_built_mode(&reversed, NOT_STATED).as_deref(), Some("2001 - 2010"));
    }

    #[test]
    fn test_placeholder_is_never_the_mode() {
        let buildings = vec![
            building("A", NOT_STATED),
            building("B", NOT_STATED),
            building("C", "1946 - 1960"),
        ];
        assert_eq!(period_built_mode(&buildings, NOT_STATED).as_deref(), Some("1946 - 1960"));
    }

    #[test]
    fn test_all_placeholders_left_unchanged() {
        let buildings = vec![building("A", NOT_STATED), building("B", NOT_STATED)];
        let cleaned = replace_not_stated_period_built_with_mode(buildings.clone(), NOT_STATED);
        assert_eq!(cleaned, buildings);
    }

    #[test]
    fn test_read_census_csv() {
        let data = "small_area,countyname,period_built\n267001001, DUBLIN 11 ,1971 - 1980\n047001001,CO. CORK,not stated\n";
        let buildings = read_census_buildings(Cursor::new(data)).unwrap();
        assert_eq!(buildings.len(), 2);
        assert_eq!(buildings[0].countyname, "DUBLIN 11");
        assert_eq!(buildings[1].period_built, NOT_STATED);
    }

    #[test]
    fn test_load_gzip_census() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("census.csv.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        encoder
            .write_all(b"small_area,countyname,period_built\n267001001,DUBLIN 11,1971 - 1980\n")
            .unwrap();
        encoder.finish().unwrap();

        let buildings = load_census_buildings(&path).unwrap();
        assert_eq!(buildings, vec![building("267001001", "1971 - 1980")]);
    }
}
