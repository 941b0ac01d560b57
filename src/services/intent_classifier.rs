//! Intent Classifier
//!
//! Maps an in-scope DATA utterance to a canonical query intent via ordered
//! regex sets, and extracts time windows, Top-N values and clarification
//! hints. Purely lexical; no oracle calls.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{CanonicalIntent, IntentClassification, TimeWindow, TimeWindowKind};

static FREQUENCY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bmost common\b",
        r"\btop \d+\b",
        r"\bhighest number\b",
        r"\bmost frequent\b",
        r"\bmost often\b",
        r"\bnumber of\b",
        r"\bcount of\b",
        r"\bhow many\b",
        r"\bfrequency\b",
        r"\bvolume\b",
    ])
});

static TREND_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\btrend\b",
        r"\bover time\b",
        r"\bmonthly\b",
        r"\byearly\b",
        r"\bquarterly\b",
        r"\bincrease\b",
        r"\bdecrease\b",
        r"\bchange\b",
        r"\bpattern\b",
        r"\bevolution\b",
    ])
});

static COST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bcost\b",
        r"\bprice\b",
        r"\bexpense\b",
        r"\bexpensive\b",
        r"\bcheap\b",
        r"\baffordable\b",
        r"\bfinancial\b",
        r"\bamount\b",
        r"\btotal cost\b",
        r"\baverage cost\b",
        r"\bper diagnosis\b",
    ])
});

static SERVICE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bservice\b",
        r"\bservices\b",
        r"\btreatment\b",
        r"\bprocedure\b",
        r"\bused for\b",
        r"\bperformed\b",
        r"\bprovided\b",
        r"\butilization\b",
    ])
});

static LAST_N_DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\blast (\d+) days?\b").unwrap());
static LAST_N_MONTHS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\blast (\d+) months?\b").unwrap());
static MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{4})\b",
    )
    .unwrap()
});
static TOP_N: Lazy<Regex> = Lazy::new(|| Regex::new(r"\btop (\d+)\b").unwrap());
static BARE_TOP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\btop\b").unwrap());
static SUPERLATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bmost common\b|\bhighest\b|\bthe most\b").unwrap());
static AGGREGATE_QUALIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(total|average|avg|sum)\b").unwrap());
static CASES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bcases\b").unwrap());
static CLAIMS_OR_ENCOUNTERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(claims|encounters)\b").unwrap());

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|p| p.is_match(text))
}

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

/// Lexical classifier for canonical query intents
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Canonical intent, checked most-specific first:
    /// service utilization, cost, trend, frequency. Diagnosis wording
    /// defaults to frequency; anything else is UNKNOWN.
    pub fn classify(&self, query: &str) -> CanonicalIntent {
        let lower = query.to_lowercase();

        if any_match(&SERVICE_PATTERNS, &lower) {
            return CanonicalIntent::ServiceUtilization;
        }
        if any_match(&COST_PATTERNS, &lower) {
            return CanonicalIntent::CostFinancial;
        }
        if any_match(&TREND_PATTERNS, &lower) {
            return CanonicalIntent::TrendTimeSeries;
        }
        if any_match(&FREQUENCY_PATTERNS, &lower) {
            return CanonicalIntent::FrequencyVolume;
        }

        if lower.contains("diagnosis") || lower.contains("disease") {
            return CanonicalIntent::FrequencyVolume;
        }

        CanonicalIntent::Unknown
    }

    /// Named and relative time ranges. "recent" resolves to 90 days but
    /// is flagged for clarification.
    pub fn extract_time_window(&self, query: &str) -> Option<TimeWindow> {
        let lower = query.to_lowercase();

        if lower.contains("last year") {
            return Some(TimeWindow {
                kind: TimeWindowKind::LastYear,
                sql_fragment: "YEAR(c.created_at) = YEAR(CURRENT_DATE) - 1".to_string(),
                needs_clarification: false,
            });
        }

        if lower.contains("this year") {
            return Some(TimeWindow {
                kind: TimeWindowKind::ThisYear,
                sql_fragment: "YEAR(c.created_at) = YEAR(CURRENT_DATE)".to_string(),
                needs_clarification: false,
            });
        }

        if lower.contains("recent") {
            return Some(TimeWindow {
                kind: TimeWindowKind::Recent,
                sql_fragment: "c.created_at >= DATE_SUB(CURDATE(), INTERVAL 90 DAY)".to_string(),
                needs_clarification: true,
            });
        }

        if let Some(caps) = LAST_N_DAYS.captures(&lower) {
            let days: u32 = caps[1].parse().ok()?;
            return Some(TimeWindow {
                kind: TimeWindowKind::LastNDays,
                sql_fragment: format!(
                    "c.created_at >= DATE_SUB(CURDATE(), INTERVAL {} DAY)",
                    days
                ),
                needs_clarification: false,
            });
        }

        if let Some(caps) = LAST_N_MONTHS.captures(&lower) {
            let months: u32 = caps[1].parse().ok()?;
            return Some(TimeWindow {
                kind: TimeWindowKind::LastNMonths,
                sql_fragment: format!(
                    "c.created_at >= DATE_SUB(CURDATE(), INTERVAL {} MONTH)",
                    months
                ),
                needs_clarification: false,
            });
        }

        if let Some(caps) = MONTH_YEAR.captures(&lower) {
            let month_name = &caps[1];
            let year: u32 = caps[2].parse().ok()?;
            let month = MONTHS
                .iter()
                .find(|(name, _)| *name == month_name)
                .map(|(_, num)| *num)?;
            return Some(TimeWindow {
                kind: TimeWindowKind::SpecificMonth,
                sql_fragment: format!(
                    "YEAR(c.created_at) = {} AND MONTH(c.created_at) = {}",
                    year, month
                ),
                needs_clarification: false,
            });
        }

        None
    }

    /// Explicit `top N`; an implicit superlative defaults to 1
    pub fn extract_top_n(&self, query: &str) -> Option<u32> {
        let lower = query.to_lowercase();

        if let Some(caps) = TOP_N.captures(&lower) {
            return caps[1].parse().ok();
        }

        if SUPERLATIVE.is_match(&lower) {
            return Some(1);
        }

        None
    }

    /// Ambiguity checks that should bounce the question back to the user
    pub fn needs_clarification(&self, query: &str, intent: CanonicalIntent) -> Option<String> {
        let lower = query.to_lowercase();

        if intent == CanonicalIntent::CostFinancial
            && lower.contains("cost")
            && !AGGREGATE_QUALIFIER.is_match(&lower)
        {
            return Some("Do you want the total cost or average cost per diagnosis?".to_string());
        }

        if lower.contains("recent") {
            return Some(
                "What timeframe do you mean by 'recent'? (e.g., last 30 days, last 3 months)"
                    .to_string(),
            );
        }

        if intent == CanonicalIntent::FrequencyVolume
            && BARE_TOP.is_match(&lower)
            && !TOP_N.is_match(&lower)
        {
            return Some("How many top results do you want? (e.g., top 10, top 5)".to_string());
        }

        if CASES.is_match(&lower) && !CLAIMS_OR_ENCOUNTERS.is_match(&lower) {
            return Some(
                "Do you mean clinical cases (encounters) or administrative claims?".to_string(),
            );
        }

        None
    }

    /// Full classification in one pass
    pub fn classify_full(&self, query: &str) -> IntentClassification {
        let canonical = self.classify(query);
        IntentClassification {
            canonical,
            time_window: self.extract_time_window(query),
            top_n: self.extract_top_n(query),
            clarification: self.needs_clarification(query, canonical),
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new()
    }

    #[test]
    fn test_classify_ordering_service_first() {
        assert_eq!(
            classifier().classify("most common treatment by cost"),
            CanonicalIntent::ServiceUtilization
        );
        assert_eq!(
            classifier().classify("average cost per diagnosis"),
            CanonicalIntent::CostFinancial
        );
        assert_eq!(
            classifier().classify("monthly claim volume trend"),
            CanonicalIntent::TrendTimeSeries
        );
        assert_eq!(
            classifier().classify("how many claims were filed"),
            CanonicalIntent::FrequencyVolume
        );
    }

    #[test]
    fn test_diagnosis_defaults_to_frequency() {
        assert_eq!(
            classifier().classify("show diagnosis breakdown"),
            CanonicalIntent::FrequencyVolume
        );
    }

    #[test]
    fn test_unknown() {
        assert_eq!(classifier().classify("show claims list"), CanonicalIntent::Unknown);
    }

    #[test]
    fn test_time_window_named_ranges() {
        let tw = classifier().extract_time_window("claims last year").unwrap();
        assert_eq!(tw.kind, TimeWindowKind::LastYear);
        assert_eq!(tw.sql_fragment, "YEAR(c.created_at) = YEAR(CURRENT_DATE) - 1");

        let tw = classifier().extract_time_window("claims this year").unwrap();
        assert_eq!(tw.kind, TimeWindowKind::ThisYear);
    }

    #[test]
    fn test_time_window_relative() {
        let tw = classifier().extract_time_window("claims in the last 30 days").unwrap();
        assert_eq!(tw.kind, TimeWindowKind::LastNDays);
        assert!(tw.sql_fragment.contains("INTERVAL 30 DAY"));

        let tw = classifier().extract_time_window("claims over the last 6 months").unwrap();
        assert_eq!(tw.kind, TimeWindowKind::LastNMonths);
        assert!(tw.sql_fragment.contains("INTERVAL 6 MONTH"));
    }

    #[test]
    fn test_time_window_month_year() {
        let tw = classifier().extract_time_window("claims in March 2024").unwrap();
        assert_eq!(tw.kind, TimeWindowKind::SpecificMonth);
        assert_eq!(tw.sql_fragment, "YEAR(c.created_at) = 2024 AND MONTH(c.created_at) = 3");
    }

    #[test]
    fn test_recent_flags_clarification() {
        let tw = classifier().extract_time_window("recent claims").unwrap();
        assert_eq!(tw.kind, TimeWindowKind::Recent);
        assert!(tw.needs_clarification);
        assert!(classifier()
            .needs_clarification("recent claims", CanonicalIntent::FrequencyVolume)
            .is_some());
    }

    #[test]
    fn test_top_n_extraction() {
        assert_eq!(classifier().extract_top_n("top 5 diagnoses"), Some(5));
        assert_eq!(classifier().extract_top_n("most common disease"), Some(1));
        assert_eq!(classifier().extract_top_n("highest claim count"), Some(1));
        assert_eq!(
            classifier().extract_top_n("which disease has the most claims in Kogi state"),
            Some(1)
        );
        assert_eq!(classifier().extract_top_n("list all claims"), None);
    }

    #[test]
    fn test_cost_ambiguity() {
        let hint = classifier()
            .needs_clarification("cost of malaria claims", CanonicalIntent::CostFinancial);
        assert!(hint.unwrap().contains("total cost or average cost"));

        assert!(classifier()
            .needs_clarification("total cost of malaria claims", CanonicalIntent::CostFinancial)
            .is_none());
    }

    #[test]
    fn test_bare_top_ambiguity() {
        let hint = classifier()
            .needs_clarification("top diagnoses", CanonicalIntent::FrequencyVolume)
            .unwrap();
        assert!(hint.contains("How many top results"));
    }

    #[test]
    fn test_cases_vs_claims_ambiguity() {
        let hint = classifier()
            .needs_clarification("malaria cases in Kano", CanonicalIntent::FrequencyVolume)
            .unwrap();
        assert!(hint.contains("clinical cases"));

        assert!(classifier()
            .needs_clarification("malaria claims in Kano", CanonicalIntent::FrequencyVolume)
            .is_none());
    }
}
