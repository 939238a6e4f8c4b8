// 🔗 Merge/Fill Engine
// Collapse BER records per geographic key and left-join them onto census buildings

use crate::records::{BerAttributes, BerRecord, CensusBuilding, MergedBuilding};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

// ============================================================================
// GRANULARITY
// ============================================================================

/// Geographic key used to correlate BER and census records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// Postcode / county label ("Dublin 11", "Co. Cork")
    #[default]
    Postcode,
    /// CSO small area identifier
    SmallArea,
}

impl Granularity {
    pub fn ber_key<'a>(&self, record: &'a BerRecord) -> Option<&'a str> {
        match self {
            Granularity::Postcode => Some(record.county_name.as_str()),
            Granularity::SmallArea => record.small_area.as_deref(),
        }
    }

    pub fn census_key<'a>(&self, building: &'a CensusBuilding) -> &'a str {
        match self {
            Granularity::Postcode => &building.countyname,
            Granularity::SmallArea => &building.small_area,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Granularity::Postcode => "postcode",
            Granularity::SmallArea => "small_area",
        }
    }

    pub fn toggle(&self) -> Self {
        match self {
            Granularity::Postcode => Granularity::SmallArea,
            Granularity::SmallArea => Granularity::Postcode,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "postcode" | "postcodes" => Ok(Granularity::Postcode),
            "small_area" | "small_areas" => Ok(Granularity::SmallArea),
            other => Err(format!("unknown granularity {:?} (expected postcode or small_area)", other)),
        }
    }
}

/// Keys match after trimming and upper-casing ("Dublin 11" == "DUBLIN 11")
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_uppercase()
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// How several BER records sharing a key become one representative row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    /// Numeric attributes averaged over non-null values, text attributes by mode
    #[default]
    Mean,
    /// The first record seen for the key
    First,
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Aggregation::Mean),
            "first" => Ok(Aggregation::First),
            other => Err(format!("unknown aggregation {:?} (expected mean or first)", other)),
        }
    }
}

/// One representative attribute set per key, with the number of records behind it
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedBers {
    pub attributes: BerAttributes,
    pub count: usize,
}

fn mean<F>(records: &[&BerRecord], value: F) -> Option<f64>
where
    F: Fn(&BerRecord) -> Option<f64>,
{
    let (sum, n) = records
        .iter()
        .filter_map(|r| value(*r))
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

fn most_common<F>(records: &[&BerRecord], value: F) -> Option<String>
where
    F: Fn(&BerRecord) -> Option<&str>,
{
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for v in records.iter().filter_map(|r| value(*r)) {
        match counts.iter_mut().find(|(seen, _)| *seen == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((v, 1)),
        }
    }
    // Earlier entries win ties
    let mut best: Option<(&str, usize)> = None;
    for (v, n) in counts {
        if best.map(|(_, b)| n > b).unwrap_or(true) {
            best = Some((v, n));
        }
    }
    best.map(|(v, _)| v.to_string())
}

fn summarize(records: &[&BerRecord], aggregation: Aggregation) -> BerAttributes {
    match aggregation {
        Aggregation::First => records
            .first()
            .map(|r| BerAttributes::of(r))
            .unwrap_or_default(),
        Aggregation::Mean => BerAttributes {
            energy_rating: most_common(records, |r| r.energy_rating.as_deref()),
            dwelling_type: most_common(records, |r| r.dwelling_type.as_deref()),
            ber_rating: mean(records, |r| r.ber_rating),
            year_of_construction: mean(records, |r| r.year_of_construction.map(|y| y as f64))
                .map(|y| y.round() as i64),
            ground_floor_area: mean(records, |r| r.ground_floor_area),
            living_area_percent: mean(records, |r| r.living_area_percent),
            hs_main_system_efficiency: mean(records, |r| r.hs_main_system_efficiency),
            wh_main_system_eff: mean(records, |r| r.wh_main_system_eff),
            hs_eff_adj_factor: mean(records, |r| r.hs_eff_adj_factor),
            wh_eff_adj_factor: mean(records, |r| r.wh_eff_adj_factor),
            declared_loss_factor: mean(records, |r| r.declared_loss_factor),
            thermal_bridging_factor: mean(records, |r| r.thermal_bridging_factor),
        },
    }
}

/// Group BER records by normalized key and collapse each group
pub fn aggregate_bers(
    bers: &[BerRecord],
    granularity: Granularity,
    aggregation: Aggregation,
) -> HashMap<String, KeyedBers> {
    let mut groups: HashMap<String, Vec<&BerRecord>> = HashMap::new();
    for record in bers {
        if let Some(key) = granularity.ber_key(record) {
            let key = normalize_key(key);
            if key.is_empty() {
                continue;
            }
            groups.entry(key).or_default().push(record);
        }
    }

    groups
        .into_iter()
        .map(|(key, records)| {
            let keyed = KeyedBers {
                attributes: summarize(&records, aggregation),
                count: records.len(),
            };
            (key, keyed)
        })
        .collect()
}

/// Left-join aggregated BER attributes onto census buildings.
///
/// Exactly one output row per input building, in input order; buildings
/// whose key has no BER records keep empty BER attributes.
pub fn fill_census_with_bers(
    buildings: Vec<CensusBuilding>,
    bers: &[BerRecord],
    granularity: Granularity,
    aggregation: Aggregation,
) -> Vec<MergedBuilding> {
    let keyed = aggregate_bers(bers, granularity, aggregation);

    let merged: Vec<MergedBuilding> = buildings
        .iter()
        .map(|building| {
            let key = normalize_key(granularity.census_key(building));
            match keyed.get(&key) {
                Some(k) => MergedBuilding::new(building, Some(&k.attributes), k.count),
                None => MergedBuilding::new(building, None, 0),
            }
        })
        .collect();

    let matched = merged.iter().filter(|m| m.has_ber()).count();
    info!(
        buildings = merged.len(),
        matched,
        keys = keyed.len(),
        granularity = %granularity,
        "census filled with BERs"
    );
    merged
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ber(county: &str, small_area: Option<&str>, area: Option<f64>, rating: &str) -> BerRecord {
        BerRecord {
            county_name: county.to_string(),
            small_area: small_area.map(|s| s.to_string()),
            energy_rating: Some(rating.to_string()),
            ground_floor_area: area,
            ..BerRecord::default()
        }
    }

    fn building(small_area: &str, county: &str) -> CensusBuilding {
        CensusBuilding {
            small_area: small_area.to_string(),
            countyname: county.to_string(),
            period_built: "1971 - 1980".to_string(),
        }
    }

    #[test]
    fn test_cardinality_preserved_with_empty_bers() {
        let census = vec![building("A", "DUBLIN 11"), building("B", "CO. CORK")];
        let merged = fill_census_with_bers(census.clone(), &[], Granularity::Postcode, Aggregation::Mean);

        assert_eq!(merged.len(), census.len());
        assert!(merged.iter().all(|m| !m.has_ber() && m.ground_floor_area.is_none()));
    }

    #[test]
    fn test_cardinality_preserved_with_fan_out() {
        // Many BERs per key and many census rows per key
        let census = vec![
            building("A", "DUBLIN 11"),
            building("B", "DUBLIN 11"),
            building("C", "CO. MAYO"),
        ];
        let bers = vec![
            ber("Dublin 11", None, Some(100.0), "C1"),
            ber("Dublin 11", None, Some(200.0), "C1"),
            ber("Dublin 11", None, Some(60.0), "B2"),
            ber("Co. Cork", None, Some(80.0), "A1"),
        ];

        let merged = fill_census_with_bers(census, &bers, Granularity::Postcode, Aggregation::Mean);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].ber_count, 3);
        assert_eq!(merged[0].ground_floor_area, Some(120.0));
        assert_eq!(merged[0].energy_rating.as_deref(), Some("C1"));
        assert_eq!(merged[1], MergedBuilding { small_area: "B".to_string(), ..merged[0].clone() });
        assert!(!merged[2].has_ber(), "Mayo has no BERs");
    }

    #[test]
    fn test_small_area_granularity() {
        let census = vec![building("267001001", "DUBLIN 11"), building("267001002", "DUBLIN 11")];
        let bers = vec![
            ber("Dublin 11", Some("267001002"), Some(90.0), "D1"),
            ber("Dublin 11", None, Some(500.0), "G"),
        ];

        let merged = fill_census_with_bers(census, &bers, Granularity::SmallArea, Aggregation::Mean);
        assert!(!merged[0].has_ber());
        assert_eq!(merged[1].ber_count, 1);
        assert_eq!(merged[1].ground_floor_area, Some(90.0));
    }

    #[test]
    fn test_first_aggregation() {
        let bers = vec![
            ber("Co. Cork", None, None, "B3"),
            ber("Co. Cork", None, Some(75.0), "A2"),
        ];
        let keyed = aggregate_bers(&bers, Granularity::Postcode, Aggregation::First);
        let cork = &keyed["CO. CORK"];
        assert_eq!(cork.count, 2);
        assert_eq!(cork.attributes.energy_rating.as_deref(), Some("B3"));
        assert_eq!(cork.attributes.ground_floor_area, None);

        let keyed = aggregate_bers(&bers, Granularity::Postcode, Aggregation::Mean);
        assert_eq!(keyed["CO. CORK"].attributes.ground_floor_area, Some(75.0));
    }

    #[test]
    fn test_mean_rounds_year() {
        let mut a = BerRecord::default();
        a.county_name = "Co. Clare".to_string();
        a.year_of_construction = Some(1970);
        let mut b = a.clone();
        b.year_of_construction = Some(1975);

        let keyed = aggregate_bers(&[a, b], Granularity::Postcode, Aggregation::Mean);
        assert_eq!(keyed["CO. CLARE"].attributes.year_of_construction, Some(1973));
    }

    #[test]
    fn test_parse_options() {
        assert_eq!("small-area".parse::<Granularity>().unwrap(), Granularity::SmallArea);
        assert_eq!("Postcode".parse::<Granularity>().unwrap(), Granularity::Postcode);
        assert!("county".parse::<Granularity>().is_err());
        assert_eq!("first".parse::<Aggregation>().unwrap(), Aggregation::First);
    }
}
