//! Domain Router (Schema-Aware)
//!
//! Maps DATA utterances to a supported analytical domain or rejects them
//! as out-of-scope. Routing is schema-aware first (tables detected via the
//! catalogue's keyword index), keyword-based second, so valid healthcare
//! questions are never falsely rejected.

use std::sync::Arc;

use crate::models::{Domain, DomainDecision};
use crate::services::schema_catalog::SchemaCatalog;

/// Healthcare keywords grouped by category; permissive on purpose
const HEALTHCARE_KEYWORDS: &[(&str, &[&str])] = &[
    ("claims", &["claim", "claims", "clinical claim", "medical claim"]),
    (
        "diagnosis",
        &["diagnosis", "diagnoses", "disease", "diseases", "illness", "condition", "conditions",
            "malaria", "typhoid"],
    ),
    ("services", &["service", "services", "treatment", "treatments", "procedure", "procedures"]),
    (
        "cost",
        &["cost", "costs", "price", "prices", "expense", "expenses", "financial", "revenue",
            "amount", "total cost"],
    ),
    (
        "provider",
        &["provider", "providers", "facility", "facilities", "hospital", "hospitals", "clinic",
            "clinics"],
    ),
    (
        "performance",
        &["performance", "activity", "operational", "utilization", "volume", "capacity"],
    ),
    (
        "geography",
        &["state", "states", "lga", "lgas", "zone", "zones", "location", "region", "kogi",
            "zamfara", "kano", "kaduna", "fct", "abuja", "adamawa", "sokoto", "rivers", "osun",
            "lagos"],
    ),
    (
        "time",
        &["month", "months", "year", "years", "quarter", "quarterly", "monthly", "yearly",
            "trend", "trends", "over time", "this month", "this year", "last month", "last year"],
    ),
    (
        "analytics",
        &["count", "total", "number", "how many", "show", "list", "top", "bottom", "highest",
            "lowest", "most", "least", "breakdown", "break down", "by", "grouped by"],
    ),
];

/// Explicitly excluded topics: HR, payroll, credentials, account data
const OUT_OF_SCOPE_KEYWORDS: &[&str] = &[
    "password",
    "passwords",
    "credential",
    "credentials",
    "login",
    "logins",
    "payroll",
    "salary",
    "salaries",
    "wage",
    "wages",
    "employee",
    "employees",
    "hr",
    "human resources",
    "admin user",
    "user account",
    "user accounts",
    "permission",
    "permissions",
    "role assignment",
    "wallet balance",
    "rating",
    "ratings",
];

const SCOPE_MESSAGE: &str = "This question is outside the supported analysis scope. Supported \
domains: Clinical Claims & Diagnosis, Providers & Facilities Performance.";

const CLARIFY_MESSAGE: &str = "This question requires clarification. Please specify what \
healthcare data you'd like to analyze (e.g., claims, diagnoses, providers, facilities).";

/// Schema-aware router for DATA utterances
pub struct DomainRouter {
    catalog: Arc<SchemaCatalog>,
}

impl DomainRouter {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    /// Route a question to a domain or reject it.
    ///
    /// Order: out-of-scope keywords first (unless the question is in a
    /// healthcare context), then schema detection, then keyword fallback
    /// with provider-class keywords winning ties.
    pub fn route(&self, question: &str) -> DomainDecision {
        let lower = question.to_lowercase();

        // Credential/HR/payroll wording rejects unless the question also
        // names clinical data; "provider credentials" alone stays out.
        if OUT_OF_SCOPE_KEYWORDS.iter().any(|kw| lower.contains(kw))
            && !has_clinical_data_keywords(&lower)
        {
            return DomainDecision::Rejected { reason: SCOPE_MESSAGE.to_string() };
        }

        let snapshot = self.catalog.snapshot();
        let (domain, detected_tables) = snapshot.domain_for_question(question);
        if let Some(domain) = domain {
            return DomainDecision::Routed { domain, detected_tables };
        }

        if has_healthcare_keywords(&lower) {
            let domain = if has_category(&lower, "provider") {
                Domain::ProvidersFacilities
            } else {
                // Claims keywords or neither: default to clinical claims
                Domain::ClinicalClaimsDiagnosis
            };
            return DomainDecision::Routed { domain, detected_tables };
        }

        if has_category(&lower, "analytics") {
            return DomainDecision::Routed {
                domain: Domain::ClinicalClaimsDiagnosis,
                detected_tables,
            };
        }

        DomainDecision::Rejected { reason: CLARIFY_MESSAGE.to_string() }
    }
}

fn has_healthcare_keywords(lower: &str) -> bool {
    HEALTHCARE_KEYWORDS
        .iter()
        .any(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
}

/// Categories that carry actual clinical data, used to exempt questions
/// from the out-of-scope check. Provider/geography/analytics wording alone
/// does not exempt: "provider credentials" is still credentials.
fn has_clinical_data_keywords(lower: &str) -> bool {
    ["claims", "diagnosis", "services", "cost"]
        .iter()
        .any(|category| has_category(lower, category))
}

fn has_category(lower: &str, category: &str) -> bool {
    HEALTHCARE_KEYWORDS
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::schema_catalog::SchemaSnapshot;

    fn router() -> DomainRouter {
        DomainRouter::new(Arc::new(SchemaCatalog::new(SchemaSnapshot::default_mappings())))
    }

    #[test]
    fn test_out_of_scope_rejected() {
        for question in
            ["show me provider credentials", "list employee salaries", "show me login credentials"]
        {
            match router().route(question) {
                DomainDecision::Rejected { reason } => {
                    assert!(reason.contains("outside the supported analysis scope"))
                },
                other => panic!("expected rejection for {:?}, got {:?}", question, other),
            }
        }
    }

    #[test]
    fn test_clinical_wording_exempts_from_scope_check() {
        // Mentions credentials but asks about claims data
        let decision = router().route("claims filed by providers with expired credentials");
        assert!(matches!(decision, DomainDecision::Routed { .. }));
    }

    #[test]
    fn test_claims_routed_to_clinical() {
        match router().route("top 5 diagnoses by claim count") {
            DomainDecision::Routed { domain, detected_tables } => {
                assert_eq!(domain, Domain::ClinicalClaimsDiagnosis);
                assert!(detected_tables.contains("claims"));
            },
            other => panic!("expected routed, got {:?}", other),
        }
    }

    #[test]
    fn test_providers_routed_to_facilities() {
        match router().route("which hospital has the highest activity") {
            DomainDecision::Routed { domain, .. } => {
                assert_eq!(domain, Domain::ProvidersFacilities)
            },
            other => panic!("expected routed, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_analytics_defaults_to_clinical() {
        match router().route("show me the totals") {
            DomainDecision::Routed { domain, .. } => {
                assert_eq!(domain, Domain::ClinicalClaimsDiagnosis)
            },
            other => panic!("expected routed, got {:?}", other),
        }
    }

    #[test]
    fn test_unclear_question_asks_for_clarification() {
        match router().route("tell me something interesting") {
            DomainDecision::Rejected { reason } => {
                assert!(reason.contains("requires clarification"))
            },
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
