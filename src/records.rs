// 🏠 Records - strongly typed rows for each dataset
// BER survey rows, census building rows, and the merged building stock

use crate::schema::{Cell, Column, Tabular};
use serde::{Deserialize, Serialize};

// ============================================================================
// BER RECORD
// ============================================================================

/// One Building Energy Rating as published by the national BER register.
/// Immutable once ingested; numeric attributes may be absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BerRecord {
    /// Postcode granularity key ("Dublin 11", "Co. Galway", ...)
    #[serde(rename = "CountyName")]
    pub county_name: String,

    /// Small area granularity key, only present in small-area extracts
    #[serde(rename = "SmallArea", default)]
    pub small_area: Option<String>,

    #[serde(rename = "TypeofRating", default)]
    pub type_of_rating: Option<String>,

    #[serde(rename = "EnergyRating", default)]
    pub energy_rating: Option<String>,

    #[serde(rename = "BerRating", default)]
    pub ber_rating: Option<f64>,

    #[serde(rename = "DwellingTypeDescr", default)]
    pub dwelling_type: Option<String>,

    #[serde(rename = "Year_of_Construction", default)]
    pub year_of_construction: Option<i64>,

    #[serde(rename = "GroundFloorArea", default)]
    pub ground_floor_area: Option<f64>,

    #[serde(rename = "LivingAreaPercent", default)]
    pub living_area_percent: Option<f64>,

    #[serde(rename = "HSMainSystemEfficiency", default)]
    pub hs_main_system_efficiency: Option<f64>,

    #[serde(rename = "WHMainSystemEff", default)]
    pub wh_main_system_eff: Option<f64>,

    #[serde(rename = "HSEffAdjFactor", default)]
    pub hs_eff_adj_factor: Option<f64>,

    #[serde(rename = "WHEffAdjFactor", default)]
    pub wh_eff_adj_factor: Option<f64>,

    #[serde(rename = "DeclaredLossFactor", default)]
    pub declared_loss_factor: Option<f64>,

    #[serde(rename = "ThermalBridgingFactor", default)]
    pub thermal_bridging_factor: Option<f64>,
}

const BER_COLUMNS: &[Column] = &[
    Column::text("CountyName"),
    Column::opt_text("SmallArea"),
    Column::opt_text("TypeofRating"),
    Column::opt_text("EnergyRating"),
    Column::real("BerRating"),
    Column::opt_text("DwellingTypeDescr"),
    Column::integer("Year_of_Construction"),
    Column::real("GroundFloorArea"),
    Column::real("LivingAreaPercent"),
    Column::real("HSMainSystemEfficiency"),
    Column::real("WHMainSystemEff"),
    Column::real("HSEffAdjFactor"),
    Column::real("WHEffAdjFactor"),
    Column::real("DeclaredLossFactor"),
    Column::real("ThermalBridgingFactor"),
];

impl Tabular for BerRecord {
    fn columns() -> &'static [Column] {
        BER_COLUMNS
    }

    fn cells(&self) -> Vec<Cell<'_>> {
        vec![
            Cell::Text(Some(&self.county_name)),
            Cell::Text(self.small_area.as_deref()),
            Cell::Text(self.type_of_rating.as_deref()),
            Cell::Text(self.energy_rating.as_deref()),
            Cell::Real(self.ber_rating),
            Cell::Text(self.dwelling_type.as_deref()),
            Cell::Integer(self.year_of_construction),
            Cell::Real(self.ground_floor_area),
            Cell::Real(self.living_area_percent),
            Cell::Real(self.hs_main_system_efficiency),
            Cell::Real(self.wh_main_system_eff),
            Cell::Real(self.hs_eff_adj_factor),
            Cell::Real(self.wh_eff_adj_factor),
            Cell::Real(self.declared_loss_factor),
            Cell::Real(self.thermal_bridging_factor),
        ]
    }
}

impl BerRecord {
    /// Build a record from a row selected with `schema::column_list::<BerRecord>()`
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(BerRecord {
            county_name: row.get(0)?,
            small_area: row.get(1)?,
            type_of_rating: row.get(2)?,
            energy_rating: row.get(3)?,
            ber_rating: row.get(4)?,
            dwelling_type: row.get(5)?,
            year_of_construction: row.get(6)?,
            ground_floor_area: row.get(7)?,
            living_area_percent: row.get(8)?,
            hs_main_system_efficiency: row.get(9)?,
            wh_main_system_eff: row.get(10)?,
            hs_eff_adj_factor: row.get(11)?,
            wh_eff_adj_factor: row.get(12)?,
            declared_loss_factor: row.get(13)?,
            thermal_bridging_factor: row.get(14)?,
        })
    }

    /// Value of a numeric attribute
    pub fn attribute(&self, attribute: BerAttribute) -> Option<f64> {
        match attribute {
            BerAttribute::BerRating => self.ber_rating,
            BerAttribute::YearOfConstruction => self.year_of_construction.map(|y| y as f64),
            BerAttribute::GroundFloorArea => self.ground_floor_area,
            BerAttribute::LivingAreaPercent => self.living_area_percent,
            BerAttribute::HsMainSystemEfficiency => self.hs_main_system_efficiency,
            BerAttribute::WhMainSystemEff => self.wh_main_system_eff,
            BerAttribute::HsEffAdjFactor => self.hs_eff_adj_factor,
            BerAttribute::WhEffAdjFactor => self.wh_eff_adj_factor,
            BerAttribute::DeclaredLossFactor => self.declared_loss_factor,
            BerAttribute::ThermalBridgingFactor => self.thermal_bridging_factor,
        }
    }

    /// True when the rating is a provisional one ("Provisional    " in the register)
    pub fn is_provisional(&self) -> bool {
        self.type_of_rating
            .as_deref()
            .map(|t| t.trim().eq_ignore_ascii_case("provisional"))
            .unwrap_or(false)
    }
}

// ============================================================================
// NUMERIC ATTRIBUTES
// ============================================================================

/// Numeric BER attributes that range rules and aggregations work on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BerAttribute {
    BerRating,
    YearOfConstruction,
    GroundFloorArea,
    LivingAreaPercent,
    HsMainSystemEfficiency,
    WhMainSystemEff,
    HsEffAdjFactor,
    WhEffAdjFactor,
    DeclaredLossFactor,
    ThermalBridgingFactor,
}

impl BerAttribute {
    pub const ALL: [BerAttribute; 10] = [
        BerAttribute::BerRating,
        BerAttribute::YearOfConstruction,
        BerAttribute::GroundFloorArea,
        BerAttribute::LivingAreaPercent,
        BerAttribute::HsMainSystemEfficiency,
        BerAttribute::WhMainSystemEff,
        BerAttribute::HsEffAdjFactor,
        BerAttribute::WhEffAdjFactor,
        BerAttribute::DeclaredLossFactor,
        BerAttribute::ThermalBridgingFactor,
    ];

    /// Column name in the BER register
    pub fn column(&self) -> &'static str {
        match self {
            BerAttribute::BerRating => "BerRating",
            BerAttribute::YearOfConstruction => "Year_of_Construction",
            BerAttribute::GroundFloorArea => "GroundFloorArea",
            BerAttribute::LivingAreaPercent => "LivingAreaPercent",
            BerAttribute::HsMainSystemEfficiency => "HSMainSystemEfficiency",
            BerAttribute::WhMainSystemEff => "WHMainSystemEff",
            BerAttribute::HsEffAdjFactor => "HSEffAdjFactor",
            BerAttribute::WhEffAdjFactor => "WHEffAdjFactor",
            BerAttribute::DeclaredLossFactor => "DeclaredLossFactor",
            BerAttribute::ThermalBridgingFactor => "ThermalBridgingFactor",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.column() == column)
    }
}

// ============================================================================
// CENSUS BUILDING
// ============================================================================

/// One building from the census building-stock extract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensusBuilding {
    pub small_area: String,
    pub countyname: String,
    pub period_built: String,
}

const CENSUS_COLUMNS: &[Column] = &[
    Column::text("small_area"),
    Column::text("countyname"),
    Column::text("period_built"),
];

impl Tabular for CensusBuilding {
    fn columns() -> &'static [Column] {
        CENSUS_COLUMNS
    }

    fn cells(&self) -> Vec<Cell<'_>> {
        vec![
            Cell::Text(Some(&self.small_area)),
            Cell::Text(Some(&self.countyname)),
            Cell::Text(Some(&self.period_built)),
        ]
    }
}

// ============================================================================
// MERGED BUILDING
// ============================================================================

/// Representative BER attributes for one granularity key
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BerAttributes {
    pub energy_rating: Option<String>,
    pub dwelling_type: Option<String>,
    pub ber_rating: Option<f64>,
    pub year_of_construction: Option<i64>,
    pub ground_floor_area: Option<f64>,
    pub living_area_percent: Option<f64>,
    pub hs_main_system_efficiency: Option<f64>,
    pub wh_main_system_eff: Option<f64>,
    pub hs_eff_adj_factor: Option<f64>,
    pub wh_eff_adj_factor: Option<f64>,
    pub declared_loss_factor: Option<f64>,
    pub thermal_bridging_factor: Option<f64>,
}

impl BerAttributes {
    /// Attributes of a single record, unaggregated
    pub fn of(record: &BerRecord) -> Self {
        BerAttributes {
            energy_rating: record.energy_rating.clone(),
            dwelling_type: record.dwelling_type.clone(),
            ber_rating: record.ber_rating,
            year_of_construction: record.year_of_construction,
            ground_floor_area: record.ground_floor_area,
            living_area_percent: record.living_area_percent,
            hs_main_system_efficiency: record.hs_main_system_efficiency,
            wh_main_system_eff: record.wh_main_system_eff,
            hs_eff_adj_factor: record.hs_eff_adj_factor,
            wh_eff_adj_factor: record.wh_eff_adj_factor,
            declared_loss_factor: record.declared_loss_factor,
            thermal_bridging_factor: record.thermal_bridging_factor,
        }
    }
}

/// A census building, enriched with BER attributes when its key matched.
/// `ber_count` is the number of BER records behind the attributes (0 = no match).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedBuilding {
    pub small_area: String,
    pub countyname: String,
    pub period_built: String,
    pub ber_count: i64,
    #[serde(rename = "EnergyRating")]
    pub energy_rating: Option<String>,
    #[serde(rename = "DwellingTypeDescr")]
    pub dwelling_type: Option<String>,
    #[serde(rename = "BerRating")]
    pub ber_rating: Option<f64>,
    #[serde(rename = "Year_of_Construction")]
    pub year_of_construction: Option<i64>,
    #[serde(rename = "GroundFloorArea")]
    pub ground_floor_area: Option<f64>,
    #[serde(rename = "LivingAreaPercent")]
    pub living_area_percent: Option<f64>,
    #[serde(rename = "HSMainSystemEfficiency")]
    pub hs_main_system_efficiency: Option<f64>,
    #[serde(rename = "WHMainSystemEff")]
    pub wh_main_system_eff: Option<f64>,
    #[serde(rename = "HSEffAdjFactor")]
    pub hs_eff_adj_factor: Option<f64>,
    #[serde(rename = "WHEffAdjFactor")]
    pub wh_eff_adj_factor: Option<f64>,
    #[serde(rename = "DeclaredLossFactor")]
    pub declared_loss_factor: Option<f64>,
    #[serde(rename = "ThermalBridgingFactor")]
    pub thermal_bridging_factor: Option<f64>,
}

impl MergedBuilding {
    pub fn new(building: &CensusBuilding, ber: Option<&BerAttributes>, ber_count: usize) -> Self {
        let empty = BerAttributes::default();
        let ber = ber.unwrap_or(&empty);
        MergedBuilding {
            small_area: building.small_area.clone(),
            countyname: building.countyname.clone(),
            period_built: building.period_built.clone(),
            ber_count: ber_count as i64,
            energy_rating: ber.energy_rating.clone(),
            dwelling_type: ber.dwelling_type.clone(),
            ber_rating: ber.ber_rating,
            year_of_construction: ber.year_of_construction,
            ground_floor_area: ber.ground_floor_area,
            living_area_percent: ber.living_area_percent,
            hs_main_system_efficiency: ber.hs_main_system_efficiency,
            wh_main_system_eff: ber.wh_main_system_eff,
            hs_eff_adj_factor: ber.hs_eff_adj_factor,
            wh_eff_adj_factor: ber.wh_eff_adj_factor,
            declared_loss_factor: ber.declared_loss_factor,
            thermal_bridging_factor: ber.thermal_bridging_factor,
        }
    }

    pub fn has_ber(&self) -> bool {
        self.ber_count > 0
    }
}

const MERGED_COLUMNS: &[Column] = &[
    Column::text("small_area"),
    Column::text("countyname"),
    Column::text("period_built"),
    Column { name: "ber_count", column_type: crate::schema::ColumnType::Integer, nullable: false },
    Column::opt_text("EnergyRating"),
    Column::opt_text("DwellingTypeDescr"),
    Column::real("BerRating"),
    Column::integer("Year_of_Construction"),
    Column::real("GroundFloorArea"),
    Column::real("LivingAreaPercent"),
    Column::real("HSMainSystemEfficiency"),
    Column::real("WHMainSystemEff"),
    Column::real("HSEffAdjFactor"),
    Column::real("WHEffAdjFactor"),
    Column::real("DeclaredLossFactor"),
    Column::real("ThermalBridgingFactor"),
];

impl Tabular for MergedBuilding {
    fn columns() -> &'static [Column] {
        MERGED_COLUMNS
    }

    fn cells(&self) -> Vec<Cell<'_>> {
        vec![
            Cell::Text(Some(&self.small_area)),
            Cell::Text(Some(&self.countyname)),
            Cell::Text(Some(&self.period_built)),
            Cell::Integer(Some(self.ber_count)),
            Cell::Text(self.energy_rating.as_deref()),
            Cell::Text(self.dwelling_type.as_deref()),
            Cell::Real(self.ber_rating),
            Cell::Integer(self.year_of_construction),
            Cell::Real(self.ground_floor_area),
            Cell::Real(self.living_area_percent),
            Cell::Real(self.hs_main_system_efficiency),
            Cell::Real(self.wh_main_system_eff),
            Cell::Real(self.hs_eff_adj_factor),
            Cell::Real(self.wh_eff_adj_factor),
            Cell::Real(self.declared_loss_factor),
            Cell::Real(self.thermal_bridging_factor),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_match_columns() {
        let ber = BerRecord::default();
        assert_eq!(ber.cells().len(), BerRecord::columns().len());

        let census = CensusBuilding {
            small_area: "267001001".to_string(),
            countyname: "DUBLIN 11".to_string(),
            period_built: "1971 - 1980".to_string(),
        };
        assert_eq!(census.cells().len(), CensusBuilding::columns().len());

        let merged = MergedBuilding::new(&census, None, 0);
        assert_eq!(merged.cells().len(), MergedBuilding::columns().len());
        assert!(!merged.has_ber());
    }

    #[test]
    fn test_attribute_lookup_by_column() {
        for attribute in BerAttribute::ALL {
            assert_eq!(BerAttribute::from_column(attribute.column()), Some(attribute));
        }
        assert_eq!(BerAttribute::from_column("CountyName"), None);
    }

    #[test]
    fn test_is_provisional() {
        let mut ber = BerRecord::default();
        assert!(!ber.is_provisional());

        ber.type_of_rating = Some("Provisional    ".to_string());
        assert!(ber.is_provisional());

        ber.type_of_rating = Some("Existing".to_string());
        assert!(!ber.is_provisional());
    }

    #[test]
    fn test_csv_header_follows_column_names() {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.serialize(BerRecord::default()).unwrap();
        let data = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
        let header = data.lines().next().unwrap();

        let expected: Vec<&str> = BerRecord::columns().iter().map(|c| c.name).collect();
        assert_eq!(header, expected.join(","));
    }
}
