// 🔎 Filter Engine - Rules as Data
// Named range filters over BER records plus the county/postcode substring filter

use crate::config::Bounds;
use crate::error::IbsgError;
use crate::export::RecordSink;
use crate::records::{BerAttribute, BerRecord};
use crate::store::RowStore;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

// ============================================================================
// RULES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThan,
    LessThan,
}

/// `attribute > bound` or `attribute < bound`; strict, so equality fails
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeRule {
    pub attribute: BerAttribute,
    pub comparison: Comparison,
    pub bound: f64,
}

impl RangeRule {
    pub fn greater_than(attribute: BerAttribute, bound: f64) -> Self {
        RangeRule { attribute, comparison: Comparison::GreaterThan, bound }
    }

    pub fn less_than(attribute: BerAttribute, bound: f64) -> Self {
        RangeRule { attribute, comparison: Comparison::LessThan, bound }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    Range(RangeRule),
    NotProvisional,
}

/// Something that accepts or rejects a single item
pub trait Predicate<T> {
    fn test(&self, item: &T) -> bool;
}

impl Predicate<BerRecord> for RangeRule {
    fn test(&self, record: &BerRecord) -> bool {
        // Missing values never satisfy a bound
        match record.attribute(self.attribute) {
            Some(value) => match self.comparison {
                Comparison::GreaterThan => value > self.bound,
                Comparison::LessThan => value < self.bound,
            },
            None => false,
        }
    }
}

impl Predicate<BerRecord> for Rule {
    fn test(&self, record: &BerRecord) -> bool {
        match self {
            Rule::Range(rule) => rule.test(record),
            Rule::NotProvisional => !record.is_provisional(),
        }
    }
}

/// Conjunction of predicates; an empty conjunction accepts everything
#[derive(Debug, Clone, PartialEq)]
pub struct AllOf<P> {
    predicates: Vec<P>,
}

impl<P> AllOf<P> {
    pub fn new(predicates: Vec<P>) -> Self {
        AllOf { predicates }
    }

    pub fn iter(&self) -> impl Iterator<Item = &P> {
        self.predicates.iter()
    }
}

impl<T, P: Predicate<T>> Predicate<T> for AllOf<P> {
    fn test(&self, item: &T) -> bool {
        self.predicates.iter().all(|p| p.test(item))
    }
}

// ============================================================================
// NAMED FILTERS
// ============================================================================

/// The filters a user can switch on or off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamedFilter {
    NotProvisional,
    GroundFloorArea,
    LivingAreaPercent,
    HsMainSystemEfficiency,
    WhMainSystemEff,
    HsEffAdjFactor,
    WhEffAdjFactor,
    DeclaredLossFactor,
    ThermalBridgingFactor,
}

impl NamedFilter {
    pub const ALL: [NamedFilter; 9] = [
        NamedFilter::NotProvisional,
        NamedFilter::GroundFloorArea,
        NamedFilter::LivingAreaPercent,
        NamedFilter::HsMainSystemEfficiency,
        NamedFilter::WhMainSystemEff,
        NamedFilter::HsEffAdjFactor,
        NamedFilter::WhEffAdjFactor,
        NamedFilter::DeclaredLossFactor,
        NamedFilter::ThermalBridgingFactor,
    ];

    /// Display label ("lb" = lower bound, "ub" = upper bound)
    pub fn label(&self) -> &'static str {
        match self {
            NamedFilter::NotProvisional => "Is not provisional",
            NamedFilter::GroundFloorArea => "lb < GroundFloorArea < ub",
            NamedFilter::LivingAreaPercent => "lb < LivingAreaPercent < ub",
            NamedFilter::HsMainSystemEfficiency => "lb < HSMainSystemEfficiency < ub",
            NamedFilter::WhMainSystemEff => "lb < WHMainSystemEff < ub",
            NamedFilter::HsEffAdjFactor => "HSEffAdjFactor > lb",
            NamedFilter::WhEffAdjFactor => "WHEffAdjFactor > lb",
            NamedFilter::DeclaredLossFactor => "DeclaredLossFactor < ub",
            NamedFilter::ThermalBridgingFactor => "lb < ThermalBridgingFactor < ub",
        }
    }

    /// The BER attribute a range filter bounds; `None` for categorical filters
    pub fn attribute(&self) -> Option<BerAttribute> {
        match self {
            NamedFilter::NotProvisional => None,
            NamedFilter::GroundFloorArea => Some(BerAttribute::GroundFloorArea),
            NamedFilter::LivingAreaPercent => Some(BerAttribute::LivingAreaPercent),
            NamedFilter::HsMainSystemEfficiency => Some(BerAttribute::HsMainSystemEfficiency),
            NamedFilter::WhMainSystemEff => Some(BerAttribute::WhMainSystemEff),
            NamedFilter::HsEffAdjFactor => Some(BerAttribute::HsEffAdjFactor),
            NamedFilter::WhEffAdjFactor => Some(BerAttribute::WhEffAdjFactor),
            NamedFilter::DeclaredLossFactor => Some(BerAttribute::DeclaredLossFactor),
            NamedFilter::ThermalBridgingFactor => Some(BerAttribute::ThermalBridgingFactor),
        }
    }

    /// Accepts the display label or the bare column name ("GroundFloorArea")
    pub fn parse(name: &str) -> Result<Self, IbsgError> {
        let name = name.trim();
        NamedFilter::ALL
            .iter()
            .copied()
            .find(|f| {
                f.label().eq_ignore_ascii_case(name)
                    || f.attribute()
                        .map(|a| a.column().eq_ignore_ascii_case(name))
                        .unwrap_or(false)
            })
            .or_else(|| {
                name.eq_ignore_ascii_case("NotProvisional").then_some(NamedFilter::NotProvisional)
            })
            .ok_or_else(|| IbsgError::UnknownFilter(name.to_string()))
    }

    /// Expand into rules: one per bound that is present
    pub fn rules(&self, bounds: Bounds) -> Vec<Rule> {
        let Some(attribute) = self.attribute() else {
            return vec![Rule::NotProvisional];
        };

        let mut rules = Vec::with_capacity(2);
        if let Some(lb) = bounds.lb {
            rules.push(Rule::Range(RangeRule::greater_than(attribute, lb)));
        }
        if let Some(ub) = bounds.ub {
            rules.push(Rule::Range(RangeRule::less_than(attribute, ub)));
        }
        rules
    }
}

// ============================================================================
// FILTER SET
// ============================================================================

/// The active rules for one run
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSet {
    predicate: AllOf<Rule>,
}

impl FilterSet {
    /// Rules for the selected filters only; unselected attributes stay unconstrained.
    /// `bounds` is keyed by BER column name, as in the config file.
    pub fn new(selected: &[NamedFilter], bounds: &BTreeMap<String, Bounds>) -> Self {
        let selected: BTreeSet<NamedFilter> = selected.iter().copied().collect();
        let rules = selected
            .iter()
            .flat_map(|f| {
                let b = f
                    .attribute()
                    .and_then(|a| bounds.get(a.column()).copied())
                    .unwrap_or_default();
                f.rules(b)
            })
            .collect();
        FilterSet { predicate: AllOf::new(rules) }
    }

    pub fn from_rules(rules: Vec<Rule>) -> Self {
        FilterSet { predicate: AllOf::new(rules) }
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.predicate.iter()
    }

    pub fn matches(&self, record: &BerRecord) -> bool {
        self.predicate.test(record)
    }

    /// Records satisfying every rule, in input order
    pub fn apply(&self, records: Vec<BerRecord>) -> Vec<BerRecord> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }

    /// Evaluate against the row store chunk by chunk, writing matches to `sink`
    pub fn apply_to_store<S: RecordSink<BerRecord>>(
        &self,
        store: &RowStore,
        chunk_size: usize,
        sink: &mut S,
    ) -> Result<FilterReport> {
        let mut report = FilterReport::default();
        for (i, chunk) in store.chunks(chunk_size).enumerate() {
            let chunk = chunk?;
            report.scanned += chunk.len();
            for record in chunk.iter().filter(|r| self.matches(r)) {
                sink.write_record(record)?;
                report.kept += 1;
            }
            info!(chunk = i, kept = report.kept, scanned = report.scanned, "filtered chunk");
        }
        sink.flush_records()?;
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterReport {
    pub scanned: usize,
    pub kept: usize,
}

// ============================================================================
// SUBSTRING FILTER
// ============================================================================

/// Case-insensitive "contains any of" test for county / postcode labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstringMatcher {
    needles: Vec<String>,
    passthrough: bool,
}

impl SubstringMatcher {
    /// Selecting the whole `universe` matches everything
    pub fn new(selected: &[String], universe: &[String]) -> Self {
        let selected_set: BTreeSet<&str> = selected.iter().map(|s| s.as_str()).collect();
        let universe_set: BTreeSet<&str> = universe.iter().map(|s| s.as_str()).collect();
        SubstringMatcher {
            needles: selected.iter().map(|s| s.to_lowercase()).collect(),
            passthrough: selected_set == universe_set,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    pub fn matches(&self, value: &str) -> bool {
        if self.passthrough {
            return true;
        }
        let value = value.to_lowercase();
        self.needles.iter().any(|n| value.contains(n.as_str()))
    }
}

/// Keep rows whose `column` contains any of the `selected` substrings.
///
/// Matching ignores case, so a selection of "Dublin 11" finds "DUBLIN 11".
/// Selecting the whole `universe` returns the rows untouched.
pub fn filter_by_substrings<T, F>(
    rows: Vec<T>,
    column: F,
    selected: &[String],
    universe: &[String],
) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let matcher = SubstringMatcher::new(selected, universe);
    if matcher.is_passthrough() {
        return rows;
    }
    rows.into_iter().filter(|row| matcher.matches(column(row))).collect()
}

// ============================================================================
// TESTS
// ============================================================================
