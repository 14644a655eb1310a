//! Function naming and function specs.
//!
//! Names come in two shapes:
//! - full resource names: `projects/{project}/locations/{region}/functions/{id}`
//! - bare ids: `group-sub-fn`
//!
//! Everything that groups or filters functions works on the id (the last `/`
//! segment), so both shapes behave the same.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_REGION: &str = "us-central1";

/// Spec key of HTTPS-triggered functions.
pub const HTTPS_TRIGGER: &str = "httpsTrigger";

/// Role granted to everyone on new HTTPS functions.
pub const INVOKER_ROLE: &str = "roles/cloudfunctions.invoker";

/// The function id: last `/` segment of a name.
pub fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Region segment of a full resource name.
pub fn region(name: &str) -> Option<&str> {
    let segments: Vec<&str> = name.split('/').collect();
    match segments.as_slice() {
        ["projects", _, "locations", region, "functions", _] => Some(region),
        _ => None,
    }
}

/// Human label: `id(region)` for full names, the id otherwise.
pub fn label(name: &str) -> String {
    match region(name) {
        Some(region) => format!("{}({region})", short_name(name)),
        None => short_name(name).to_string(),
    }
}

pub fn resource_name(project: &str, region: &str, id: &str) -> String {
    format!("projects/{project}/locations/{region}/functions/{id}")
}

/// A function this deploy wants to exist.
///
/// `spec` is passed through to the backend untouched (entry point, runtime,
/// trigger, memory, timeout, environment, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredFunction {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub spec: serde_json::Map<String, serde_json::Value>,
}

impl DesiredFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            spec: serde_json::Map::new(),
        }
    }

    pub fn with_spec(mut self, key: &str, value: serde_json::Value) -> Self {
        self.spec.insert(key.to_string(), value);
        self
    }

    /// Invoked over HTTPS rather than by an event.
    pub fn is_https(&self) -> bool {
        self.spec.contains_key(HTTPS_TRIGGER)
    }
}

/// A function declared by the project source, before region expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionTrigger {
    pub name: String,

    #[serde(default)]
    pub regions: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub spec: serde_json::Map<String, serde_json::Value>,
}

/// One [`DesiredFunction`] per (trigger, region); regions default to
/// [`DEFAULT_REGION`].
pub fn expand_regions(project: &str, triggers: &[FunctionTrigger]) -> Vec<DesiredFunction> {
    let default_regions = [DEFAULT_REGION.to_string()];
    triggers
        .iter()
        .flat_map(|trigger| {
            let regions = if trigger.regions.is_empty() {
                &default_regions[..]
            } else {
                &trigger.regions[..]
            };
            regions.iter().map(move |region| DesiredFunction {
                name: resource_name(project, region, &trigger.name),
                labels: trigger.labels.clone(),
                spec: trigger.spec.clone(),
            })
        })
        .collect()
}

/// HTTPS trigger as reported by the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpsTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A function the backend already has.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingFunction {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_archive_url: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_trigger: Option<HttpsTrigger>,
}

impl ExistingFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, url: impl Into<String>) -> Self {
        self.source_archive_url = Some(url.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn trigger_url(&self) -> Option<&str> {
        self.https_trigger.as_ref()?.url.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamBinding {
    pub role: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamPolicy {
    pub version: u32,
    pub bindings: Vec<IamBinding>,
}

impl IamPolicy {
    /// Anyone may invoke the function.
    pub fn public_invoker() -> Self {
        Self {
            version: 3,
            bindings: vec![IamBinding {
                role: INVOKER_ROLE.to_string(),
                members: vec!["allUsers".to_string()],
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_uses_last_segment() {
        assert_eq!(short_name("projects/p/locations/us-east1/functions/api-v1"), "api-v1");
        assert_eq!(short_name("api-v1"), "api-v1");
    }

    #[test]
    fn label_includes_region_for_full_names() {
        assert_eq!(label("projects/p/locations/europe-west1/functions/fn"), "fn(europe-west1)");
        assert_eq!(label("fn"), "fn");
        assert_eq!(region("fn"), None);
    }

    #[test]
    fn triggers_expand_per_region() {
        let triggers: Vec<FunctionTrigger> = serde_json::from_value(serde_json::json!([
            {"name": "api", "regions": ["us-east1", "europe-west1"], "entryPoint": "api"},
            {"name": "cron", "entryPoint": "cron"}
        ]))
        .unwrap();

        let desired = expand_regions("demo", &triggers);
        let names: Vec<&str> = desired.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "projects/demo/locations/us-east1/functions/api",
                "projects/demo/locations/europe-west1/functions/api",
                "projects/demo/locations/us-central1/functions/cron",
            ]
        );
        assert_eq!(desired[0].spec["entryPoint"], "api");
        assert!(!desired[0].spec.contains_key("regions"));
    }

    #[test]
    fn existing_function_reads_wire_shape() {
        let existing: ExistingFunction = serde_json::from_value(serde_json::json!({
            "name": "projects/p/locations/us-central1/functions/fn",
            "sourceArchiveUrl": "gs://bucket/source.zip",
            "labels": {"deployment-tool": "liftoff"},
            "runtime": "nodejs20"
        }))
        .unwrap();
        assert_eq!(existing.source_archive_url.as_deref(), Some("gs://bucket/source.zip"));
        assert_eq!(existing.labels["deployment-tool"], "liftoff");
        assert_eq!(existing.trigger_url(), None);

        let http: ExistingFunction = serde_json::from_value(serde_json::json!({
            "name": "projects/p/locations/us-central1/functions/api",
            "httpsTrigger": {"url": "https://us-central1-p.cloudfunctions.net/api"}
        }))
        .unwrap();
        assert_eq!(http.trigger_url(), Some("https://us-central1-p.cloudfunctions.net/api"));
    }

    #[test]
    fn https_functions_are_detected_from_spec() {
        let api = DesiredFunction::new("api").with_spec(HTTPS_TRIGGER, serde_json::json!({}));
        let job = DesiredFunction::new("job").with_spec("eventTrigger", serde_json::json!({"eventType": "t"}));
        assert!(api.is_https());
        assert!(!job.is_https());
    }

    #[test]
    fn public_invoker_policy_wire_shape() {
        assert_eq!(
            serde_json::to_value(IamPolicy::public_invoker()).unwrap(),
            serde_json::json!({
                "version": 3,
                "bindings": [{"role": "roles/cloudfunctions.invoker", "members": ["allUsers"]}]
            })
        );
    }
}
