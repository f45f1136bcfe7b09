//! Routing policy updates
//!
//! A switch to provider P rewrites two rules per catalog provider: the
//! export rule (AS-path prepend) and the local-preference rule. P gets the
//! primary values, every other provider the backup values.

use crate::error::PolicyStoreError;
use async_trait::async_trait;
use linkpilot_core::{PolicyStoreConfig, ProviderConfig, ProviderId};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Attribute rewritten on a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleChange {
    /// Export rule: AS-path prepend count
    AsPathPrepend(u32),
    /// Import rule: local preference
    LocalPreference(u32),
}

impl RuleChange {
    /// Custom-field name on the rule
    pub fn field(&self) -> &'static str {
        match self {
            Self::AsPathPrepend(_) => "as_path_prepend_count",
            Self::LocalPreference(_) => "local_preference",
        }
    }

    /// Custom-field value.
    ///
    /// The store keeps the prepend count as an integer and the local
    /// preference as a string.
    pub fn value(&self) -> Value {
        match self {
            Self::AsPathPrepend(n) => json!(n),
            Self::LocalPreference(n) => Value::String(n.to_string()),
        }
    }

    /// Single-entry custom-field map
    pub fn as_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(self.field().to_string(), self.value());
        fields
    }
}

impl fmt::Display for RuleChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field(), self.value())
    }
}

/// One planned rule write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleUpdate {
    /// Provider the rule belongs to
    pub provider: ProviderId,
    /// Rule id in the store
    pub rule_id: u64,
    /// Attribute to set
    pub change: RuleChange,
}

/// Rule read-modify-write backend
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Overwrite `custom_fields` on rule `rule_id`, preserving everything else
    async fn update_rule(&self, rule_id: u64, custom_fields: &Map<String, Value>) -> Result<(), PolicyStoreError>;
}

/// NetBox BGP plugin client
pub struct NetBoxPolicyStore {
    base_url: String,
    token: String,
    client: Client,
}

impl NetBoxPolicyStore {
    /// Create client from store settings
    pub fn new(config: &PolicyStoreConfig) -> Result<Self, PolicyStoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    fn rule_url(&self, rule_id: u64) -> String {
        format!("{}/api/plugins/bgp/routing-policy-rule/{}/", self.base_url, rule_id)
    }

    async fn fetch_rule(&self, rule_id: u64) -> Result<Value, PolicyStoreError> {
        let url = self.rule_url(rule_id);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PolicyStoreError::Status { rule_id, status, body });
        }

        response.json().await.map_err(|e| PolicyStoreError::Malformed {
            rule_id,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl PolicyStore for NetBoxPolicyStore {
    async fn update_rule(&self, rule_id: u64, custom_fields: &Map<String, Value>) -> Result<(), PolicyStoreError> {
        let current = self.fetch_rule(rule_id).await?;
        let body = merge_rule(rule_id, &current, custom_fields)?;

        let url = self.rule_url(rule_id);
        debug!("PATCH {}", url);

        let response = self
            .client
            .patch(&url)
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PolicyStoreError::Status { rule_id, status, body });
        }

        Ok(())
    }
}

/// Build the PATCH body for a rule.
///
/// Carries the writable identity fields of the current rule and all of its
/// custom fields, with `changes` overriding matching keys.
pub fn merge_rule(rule_id: u64, current: &Value, changes: &Map<String, Value>) -> Result<Value, PolicyStoreError> {
    let malformed = |reason: &str| PolicyStoreError::Malformed {
        rule_id,
        reason: reason.to_string(),
    };

    let routing_policy = match current.get("routing_policy") {
        Some(Value::Object(nested)) => nested.get("id").cloned().ok_or_else(|| malformed("routing_policy has no id"))?,
        Some(id) if id.is_number() => id.clone(),
        _ => return Err(malformed("missing routing_policy")),
    };
    let index = current.get("index").cloned().ok_or_else(|| malformed("missing index"))?;
    let action = current.get("action").cloned().ok_or_else(|| malformed("missing action"))?;

    let mut custom_fields = match current.get("custom_fields") {
        Some(Value::Object(fields)) => fields.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => return Err(malformed("custom_fields is not an object")),
    };
    for (key, value) in changes {
        custom_fields.insert(key.clone(), value.clone());
    }

    Ok(json!({
        "routing_policy": routing_policy,
        "index": index,
        "action": action,
        "custom_fields": custom_fields,
    }))
}

/// Result of applying a switch
#[derive(Debug, Clone, Default)]
pub struct PolicyOutcome {
    /// Nothing was sent
    pub dry_run: bool,
    /// Updates written (or logged in dry run)
    pub applied: Vec<RuleUpdate>,
    /// Updates that failed, with the error
    pub failed: Vec<(RuleUpdate, String)>,
    /// Providers skipped for lack of rule ids
    pub skipped: Vec<ProviderId>,
}

impl PolicyOutcome {
    /// Whether the switch may be committed
    pub fn is_committed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Turns a provider switch into rule updates
pub struct PolicyApplier {
    store: Arc<dyn PolicyStore>,
    config: PolicyStoreConfig,
}

impl PolicyApplier {
    /// Create applier over a store
    pub fn new(store: Arc<dyn PolicyStore>, config: PolicyStoreConfig) -> Self {
        Self { store, config }
    }

    /// Whether updates are only logged
    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Rule updates making `primary` the preferred provider.
    ///
    /// Returns the updates and the providers skipped because a rule id is
    /// not configured.
    pub fn plan(&self, catalog: &[ProviderConfig], primary: &ProviderId) -> (Vec<RuleUpdate>, Vec<ProviderId>) {
        let mut updates = Vec::with_capacity(catalog.len() * 2);
        let mut skipped = Vec::new();

        for provider in catalog {
            let (Some(export_rule), Some(pref_rule)) = (provider.export_rule_id, provider.local_pref_rule_id) else {
                warn!(provider = %provider.name, "policy rules not configured, skipping");
                skipped.push(provider.name.clone());
                continue;
            };

            let (prepend, local_pref) = if &provider.name == primary {
                (self.config.primary_prepend, self.config.primary_local_pref)
            } else {
                (self.config.backup_prepend, self.config.backup_local_pref)
            };

            updates.push(RuleUpdate {
                provider: provider.name.clone(),
                rule_id: export_rule,
                change: RuleChange::AsPathPrepend(prepend),
            });
            updates.push(RuleUpdate {
                provider: provider.name.clone(),
                rule_id: pref_rule,
                change: RuleChange::LocalPreference(local_pref),
            });
        }

        (updates, skipped)
    }

    /// Apply every update for a switch to `primary`.
    ///
    /// Rules are written independently; a failure is recorded and the
    /// remaining rules are still attempted.
    pub async fn apply(&self, catalog: &[ProviderConfig], primary: &ProviderId) -> PolicyOutcome {
        let (updates, skipped) = self.plan(catalog, primary);
        let mut outcome = PolicyOutcome {
            dry_run: self.config.dry_run,
            skipped,
            ..PolicyOutcome::default()
        };

        for update in updates {
            if self.config.dry_run {
                info!(provider = %update.provider, rule = update.rule_id, "DRY RUN: would set {}", update.change);
                outcome.applied.push(update);
                continue;
            }

            match self.store.update_rule(update.rule_id, &update.change.as_fields()).await {
                Ok(()) => {
                    info!(provider = %update.provider, rule = update.rule_id, "updated rule: {}", update.change);
                    outcome.applied.push(update);
                }
                Err(e) => {
                    error!(provider = %update.provider, rule = update.rule_id, "failed to update rule: {}", e);
                    outcome.failed.push((update, e.to_string()));
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<(u64, Map<String, Value>)>>,
        fail_rule: Option<u64>,
    }

    #[async_trait]
    impl PolicyStore for RecordingStore {
        async fn update_rule(&self, rule_id: u64, fields: &Map<String, Value>) -> Result<(), PolicyStoreError> {
            if self.fail_rule == Some(rule_id) {
                return Err(PolicyStoreError::Status {
                    rule_id,
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.writes.lock().unwrap().push((rule_id, fields.clone()));
            Ok(())
        }
    }

    fn live_config(url: &str) -> PolicyStoreConfig {
        PolicyStoreConfig {
            url: url.to_string(),
            token: "secret".into(),
            dry_run: false,
            ..PolicyStoreConfig::default()
        }
    }

    fn catalog() -> Vec<ProviderConfig> {
        linkpilot_core::LinkPilotConfig::default().providers
    }

    fn rule_document() -> Value {
        json!({
            "id": 3,
            "routing_policy": {"id": 7, "name": "EXPORT"},
            "index": 10,
            "action": "permit",
            "description": "kept server side",
            "custom_fields": {"local_preference": "100", "community": "65000:1"}
        })
    }

    #[test]
    fn test_merge_overrides_only_changed_fields() {
        let body = merge_rule(3, &rule_document(), &RuleChange::LocalPreference(200).as_fields()).unwrap();
        assert_eq!(
            body,
            json!({
                "routing_policy": 7,
                "index": 10,
                "action": "permit",
                "custom_fields": {"local_preference": "200", "community": "65000:1"}
            })
        );
    }

    #[test]
    fn test_merge_rejects_incomplete_rule() {
        let err = merge_rule(3, &json!({"index": 1, "action": "permit"}), &Map::new()).unwrap_err();
        assert!(matches!(err, PolicyStoreError::Malformed { rule_id: 3, .. }));
    }

    #[test]
    fn test_plan_primary_and_backup_values() {
        let applier = PolicyApplier::new(Arc::new(RecordingStore::default()), PolicyStoreConfig::default());
        let (updates, skipped) = applier.plan(&catalog(), &ProviderId::new("UFINET"));

        assert!(skipped.is_empty());
        assert_eq!(
            updates,
            vec![
                RuleUpdate { provider: "IXA".into(), rule_id: 1, change: RuleChange::AsPathPrepend(3) },
                RuleUpdate { provider: "IXA".into(), rule_id: 3, change: RuleChange::LocalPreference(100) },
                RuleUpdate { provider: "UFINET".into(), rule_id: 2, change: RuleChange::AsPathPrepend(0) },
                RuleUpdate { provider: "UFINET".into(), rule_id: 4, change: RuleChange::LocalPreference(200) },
            ]
        );
    }

    #[test]
    fn test_plan_skips_unconfigured_provider() {
        let mut providers = catalog();
        providers[1].local_pref_rule_id = None;
        let applier = PolicyApplier::new(Arc::new(RecordingStore::default()), PolicyStoreConfig::default());
        let (updates, skipped) = applier.plan(&providers, &ProviderId::new("IXA"));
        assert_eq!(updates.len(), 2);
        assert_eq!(skipped, vec![ProviderId::new("UFINET")]);
    }

    #[test]
    fn test_dry_run_sends_nothing() {
        let store = Arc::new(RecordingStore::default());
        let applier = PolicyApplier::new(store.clone(), PolicyStoreConfig::default());
        let outcome = tokio_test::block_on(applier.apply(&catalog(), &ProviderId::new("UFINET")));

        assert!(outcome.dry_run);
        assert!(outcome.is_committed());
        assert_eq!(outcome.applied.len(), 4);
        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_rule_does_not_stop_others() {
        let store = Arc::new(RecordingStore {
            fail_rule: Some(1),
            ..RecordingStore::default()
        });
        let applier = PolicyApplier::new(store.clone(), live_config("http://unused"));
        let outcome = applier.apply(&catalog(), &ProviderId::new("UFINET")).await;

        assert!(!outcome.is_committed());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0.rule_id, 1);
        assert_eq!(outcome.applied.len(), 3);

        let writes = store.writes.lock().unwrap();
        assert_eq!(writes[0].1.get("local_preference"), Some(&json!("100")));
        assert_eq!(writes[1].1.get("as_path_prepend_count"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_netbox_read_modify_write() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/plugins/bgp/routing-policy-rule/3/"))
            .and(header("Authorization", "Token secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rule_document()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/plugins/bgp/routing-policy-rule/3/"))
            .and(header("Authorization", "Token secret"))
            .and(body_json(json!({
                "routing_policy": 7,
                "index": 10,
                "action": "permit",
                "custom_fields": {"local_preference": "200", "community": "65000:1"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3})))
            .expect(1)
            .mount(&server)
            .await;

        let store = NetBoxPolicyStore::new(&live_config(&server.uri())).unwrap();
        store
            .update_rule(3, &RuleChange::LocalPreference(200).as_fields())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_netbox_missing_rule() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/plugins/bgp/routing-policy-rule/99/"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not found."))
            .mount(&server)
            .await;

        let store = NetBoxPolicyStore::new(&live_config(&server.uri())).unwrap();
        let err = store
            .update_rule(99, &RuleChange::AsPathPrepend(3).as_fields())
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyStoreError::Status { rule_id: 99, status: 404, .. }));
    }

    #[tokio::test]
    async fn test_netbox_rejected_write() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/plugins/bgp/routing-policy-rule/1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rule_document()))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/plugins/bgp/routing-policy-rule/1/"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .mount(&server)
            .await;

        let store = NetBoxPolicyStore::new(&live_config(&server.uri())).unwrap();
        let err = store
            .update_rule(1, &RuleChange::AsPathPrepend(0).as_fields())
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyStoreError::Status { status: 400, .. }));
    }
}
