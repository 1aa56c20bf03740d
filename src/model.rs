use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Nested in-memory view: site name -> metric name -> value.
pub type Dataset = BTreeMap<String, BTreeMap<String, f64>>;

/// Numeric kind declared per metric (or per group for grouped metrics).
/// Reads coerce the stored `f64` to this kind regardless of whether the
/// backend delivered an integer-like or float-like string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricKind {
    /// Integer-semantic running totals (people educated, attendees).
    Count,
    /// Integer percentages in 0..=100.
    Percent,
    /// Fractional values carried at two decimals (LDL-c buckets).
    Ratio,
}

/// An ordered set of metrics constrained to sum to a fixed target.
#[derive(Clone, Copy, Debug)]
pub struct GroupSpec {
    pub name: &'static str,
    pub members: &'static [&'static str],
    pub target: f64,
    /// Decimal places kept by normalization.
    pub precision: u32,
    pub kind: MetricKind,
}

pub const DEMOGRAPHICS_GROUP: GroupSpec = GroupSpec {
    name: "demographics",
    members: &["demo_black", "demo_hispanic", "demo_white", "demo_other"],
    target: 100.0,
    precision: 1,
    kind: MetricKind::Percent,
};

pub const AGE_GROUP: GroupSpec = GroupSpec {
    name: "age",
    members: &["age_55_plus", "age_35_54", "age_18_34"],
    target: 100.0,
    precision: 1,
    kind: MetricKind::Percent,
};

pub const LDLC_GROUP: GroupSpec = GroupSpec {
    name: "ldlc",
    members: &[
        "ldlc_0_54",
        "ldlc_55_70",
        "ldlc_70_99",
        "ldlc_100_139",
        "ldlc_140_189",
        "ldlc_190_plus",
    ],
    target: 100.0,
    precision: 2,
    kind: MetricKind::Ratio,
};

pub const GROUPS: [&GroupSpec; 3] = [&DEMOGRAPHICS_GROUP, &AGE_GROUP, &LDLC_GROUP];

const COUNT_METRICS: &[&str] = &[
    "hcp_educated",
    "hcp_family",
    "hcp_internal",
    "hcp_general",
    "attendees_educated",
];

/// Built-in per-site default table, used when a site has no persisted data
/// at all (and as the fallback when the backend cannot be reached).
pub const DEFAULT_DATA: &[(&str, f64)] = &[
    ("hcp_educated", 28.0),
    ("hcp_family", 19.0),
    ("hcp_internal", 18.0),
    ("hcp_general", 28.0),
    ("hcp_md_do", 75.0),
    ("hcp_np_pa", 25.0),
    ("confidence_diagnosing", 85.0),
    ("confidence_treating", 78.0),
    ("confidence_managing", 82.0),
    ("intent_to_test", 90.0),
    ("attendees_educated", 98.0),
    ("demo_black", 55.0),
    ("demo_hispanic", 25.0),
    ("demo_white", 17.0),
    ("demo_other", 3.0),
    ("age_55_plus", 45.0),
    ("age_35_54", 28.0),
    ("age_18_34", 27.0),
    ("gender_male", 75.0),
    ("aware_ldlc", 88.0),
    ("understand_risk", 84.0),
    ("intent_test", 91.0),
    ("intent_followup", 79.0),
    ("ldlc_0_54", 0.54),
    ("ldlc_55_70", 0.70),
    ("ldlc_70_99", 0.99),
    ("ldlc_100_139", 1.39),
    ("ldlc_140_189", 1.89),
    ("ldlc_190_plus", 1.90),
];

pub fn group(name: &str) -> Option<&'static GroupSpec> {
    GROUPS.iter().copied().find(|spec| spec.name == name)
}

pub fn group_containing(metric: &str) -> Option<&'static GroupSpec> {
    GROUPS
        .iter()
        .copied()
        .find(|spec| spec.members.contains(&metric))
}

/// Declared kind for a metric name. Grouped metrics take their group's
/// kind; the remaining vocabulary splits into counts and percentages.
/// Metrics outside the vocabulary read as counts.
pub fn metric_kind(metric: &str) -> MetricKind {
    if let Some(spec) = group_containing(metric) {
        return spec.kind;
    }
    if COUNT_METRICS.contains(&metric) {
        return MetricKind::Count;
    }
    if DEFAULT_DATA.iter().any(|(name, _)| *name == metric) {
        return MetricKind::Percent;
    }
    MetricKind::Count
}

pub fn default_metrics() -> BTreeMap<String, f64> {
    DEFAULT_DATA
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}

/// A value rendered to its declared kind.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn coerce(kind: MetricKind, raw: f64) -> Self {
        match kind {
            MetricKind::Count | MetricKind::Percent => Self::Int(raw.round() as i64),
            MetricKind::Ratio => Self::Float(round_to(raw, 2)),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:.2}"),
        }
    }
}

/// Tolerant numeric parse for raw backend strings: integer-like and
/// float-like forms are both accepted.
pub fn parse_raw(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
}

/// Render a value for persistence. Integral values keep the compact
/// integer form the original table used; fractional values (normalized
/// group members, LDL-c buckets) keep their shortest float form.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10_f64.powi(precision as i32);
    (value * factor).round() / factor
}
