//! Per-step validation gates.
//!
//! Each step has exactly one gate function. The same gate backs both the
//! reactive can-advance flag (to disable navigation proactively) and the
//! authoritative click-time check (to block advancement and surface
//! messages), so the two can never fall out of sync.

use std::collections::BTreeMap;

pub type FieldValues = BTreeMap<String, String>;
pub type ErrorMap = BTreeMap<String, String>;

/// Well-known field keys shared between gates, submission and callers.
pub mod fields {
    pub const APPLICATION_NAME: &str = "application_name";
    pub const APP_ID: &str = "app_id";
    pub const CURRENT_USER: &str = "current_user";
    pub const CURRENT_USER_EMAIL: &str = "current_user_email";
    pub const TARGET_CLUSTER: &str = "target_cluster";
    pub const DATA_ORIGIN_DOMAIN: &str = "data_origin_domain";
    pub const ENGAGEMENT_REQUEST_NUMBER: &str = "engagement_request_number";
    pub const DATA_INGESTION_PER_DAY_MB: &str = "data_ingestion_per_day_mb";
    pub const DATA_RETENTION_DAYS: &str = "data_retention_days";
    pub const GLOBAL_INDEX_FLAG: &str = "global_index_flag";
    pub const INDEX_NAME_PROPOSED: &str = "index_name_proposed";
    pub const NAME_VALIDATION_STATUS: &str = "name_validation_status";
    pub const INDEX_CONFIG_STANZA: &str = "index_config_stanza";
    pub const AUTHORIZE_CONFIG: &str = "authorize_config";
    pub const ACCESS_MAPPING_ENABLED: &str = "access_mapping_enabled";
    pub const ACCESS_MAPPING_CONFIG: &str = "access_mapping_config";
}

/// Value the asynchronous name check writes once a proposed record name
/// has been confirmed unused.
pub const NAME_STATUS_AVAILABLE: &str = "available";

pub trait StepGate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pure predicate over the field map; the returned error map is the
    /// step's entire validation verdict. Empty map means the step passes.
    fn validate(&self, fields: &FieldValues) -> ErrorMap;
}

fn field<'a>(fields: &'a FieldValues, key: &str) -> &'a str {
    fields.get(key).map(String::as_str).unwrap_or_default()
}

fn is_blank(fields: &FieldValues, key: &str) -> bool {
    field(fields, key).trim().is_empty()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

fn require(errors: &mut ErrorMap, fields: &FieldValues, key: &str, message: &str) {
    if is_blank(fields, key) {
        errors.insert(key.to_string(), message.to_string());
    }
}

struct ApplicationDetails;

impl StepGate for ApplicationDetails {
    fn name(&self) -> &'static str {
        "application-details"
    }

    fn validate(&self, values: &FieldValues) -> ErrorMap {
        let mut errors = ErrorMap::new();
        require(
            &mut errors,
            values,
            fields::APP_ID,
            "Application ID is required. Please select from the dropdown.",
        );
        require(
            &mut errors,
            values,
            fields::CURRENT_USER,
            "Failed to resolve the current user. Please refresh the page.",
        );
        require(
            &mut errors,
            values,
            fields::APPLICATION_NAME,
            "Application name is required.",
        );
        errors
    }
}

struct RecordDetails;

impl StepGate for RecordDetails {
    fn name(&self) -> &'static str {
        "record-details"
    }

    fn validate(&self, values: &FieldValues) -> ErrorMap {
        let mut errors = ErrorMap::new();
        require(
            &mut errors,
            values,
            fields::TARGET_CLUSTER,
            "Please select the target index cluster.",
        );
        require(
            &mut errors,
            values,
            fields::DATA_ORIGIN_DOMAIN,
            "Please select the origin data domain.",
        );
        require(
            &mut errors,
            values,
            fields::ENGAGEMENT_REQUEST_NUMBER,
            "Engagement request number is mandatory.",
        );
        require(
            &mut errors,
            values,
            fields::DATA_INGESTION_PER_DAY_MB,
            "Please specify data ingestion per day (MB).",
        );
        require(
            &mut errors,
            values,
            fields::DATA_RETENTION_DAYS,
            "Please specify data retention (days).",
        );
        require(
            &mut errors,
            values,
            fields::GLOBAL_INDEX_FLAG,
            "Please specify whether this is a global index.",
        );
        errors
    }
}

/// Gate over state an earlier interaction resolved asynchronously: the
/// uniqueness check writes its verdict into the field map, and the gate
/// only reads it. This is why click-time validation is always re-run even
/// when the derived flag already agreed.
struct NameValidation;

impl StepGate for NameValidation {
    fn name(&self) -> &'static str {
        "name-validation"
    }

    fn validate(&self, values: &FieldValues) -> ErrorMap {
        let mut errors = ErrorMap::new();
        if is_blank(values, fields::INDEX_NAME_PROPOSED) {
            errors.insert(
                fields::INDEX_NAME_PROPOSED.to_string(),
                "No record name has been generated yet.".to_string(),
            );
        }
        if field(values, fields::NAME_VALIDATION_STATUS) != NAME_STATUS_AVAILABLE {
            errors.insert(
                fields::NAME_VALIDATION_STATUS.to_string(),
                "The proposed name has not been confirmed available.".to_string(),
            );
        }
        errors
    }
}

struct ConfigGeneration;

impl StepGate for ConfigGeneration {
    fn name(&self) -> &'static str {
        "config-generation"
    }

    fn validate(&self, values: &FieldValues) -> ErrorMap {
        let mut errors = ErrorMap::new();
        require(
            &mut errors,
            values,
            fields::INDEX_CONFIG_STANZA,
            "Generate the index configuration stanza before continuing.",
        );
        require(
            &mut errors,
            values,
            fields::AUTHORIZE_CONFIG,
            "Generate the role authorization configuration before continuing.",
        );
        errors
    }
}

/// Conditional gate: mapping config is only required when mapping is
/// enabled at all.
struct AccessMapping;

impl StepGate for AccessMapping {
    fn name(&self) -> &'static str {
        "access-mapping"
    }

    fn validate(&self, values: &FieldValues) -> ErrorMap {
        let mut errors = ErrorMap::new();
        if is_truthy(field(values, fields::ACCESS_MAPPING_ENABLED)) {
            require(
                &mut errors,
                values,
                fields::ACCESS_MAPPING_CONFIG,
                "Generate the access mapping configuration before continuing.",
            );
        }
        errors
    }
}

/// Review step carries no extra gate; submission is the act.
struct Review;

impl StepGate for Review {
    fn name(&self) -> &'static str {
        "review-and-submit"
    }

    fn validate(&self, _values: &FieldValues) -> ErrorMap {
        ErrorMap::new()
    }
}

/// The catalog entry wizard's step sequence, in order.
pub fn catalog_steps() -> Vec<Box<dyn StepGate>> {
    vec![
        Box::new(ApplicationDetails),
        Box::new(RecordDetails),
        Box::new(NameValidation),
        Box::new(ConfigGeneration),
        Box::new(AccessMapping),
        Box::new(Review),
    ]
}
