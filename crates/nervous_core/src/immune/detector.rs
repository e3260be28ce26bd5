//! Payload fingerprints and heuristic anomaly rules.

use std::collections::{BTreeSet, HashMap, HashSet};

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ImmuneConfig;
use crate::event::{Severity, WebhookEvent};

/// Longest string value kept as a fingerprint token.
const MAX_TOKEN_CHARS: usize = 48;
/// Hex characters of the payload digest kept in a signature.
const DIGEST_CHARS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyRule {
    InjectionPattern,
    OversizedPayload,
    DeepNesting,
    Burst,
    CriticalSeverity,
}

impl AnomalyRule {
    pub const ALL: [AnomalyRule; 5] = [
        AnomalyRule::InjectionPattern,
        AnomalyRule::OversizedPayload,
        AnomalyRule::DeepNesting,
        AnomalyRule::Burst,
        AnomalyRule::CriticalSeverity,
    ];

    /// Rules that judge the payload itself. Only these raise antigens and
    /// leave memory cells; the rest flag a delivery without condemning its
    /// content.
    pub fn is_intrinsic(self) -> bool {
        matches!(
            self,
            AnomalyRule::InjectionPattern | AnomalyRule::OversizedPayload | AnomalyRule::DeepNesting
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            AnomalyRule::InjectionPattern => "injection-pattern",
            AnomalyRule::OversizedPayload => "oversized-payload",
            AnomalyRule::DeepNesting => "deep-nesting",
            AnomalyRule::Burst => "burst",
            AnomalyRule::CriticalSeverity => "critical-severity",
        }
    }

    /// Antibody pattern that binds every antigen raised by this rule.
    pub fn antibody_pattern(self) -> String {
        format!("rule:{}", self.name())
    }
}

impl fmt::Display for AnomalyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a payload: an exact signature plus a token set for fuzzy
/// comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// `source/event#digest`
    pub signature: String,
    pub source_type: String,
    pub event_type: String,
    pub tokens: BTreeSet<String>,
}

impl Fingerprint {
    pub fn of(event: &WebhookEvent) -> Self {
        // serde_json keeps object keys sorted, so this serialization is canonical.
        let canonical = event.payload.to_string();
        let mut hasher = blake3::Hasher::new();
        hasher.update(event.source_type.as_bytes());
        hasher.update(&[0]);
        hasher.update(event.event_type.as_bytes());
        hasher.update(&[0]);
        hasher.update(canonical.as_bytes());
        let digest = hex::encode(hasher.finalize().as_bytes());

        let mut tokens = BTreeSet::new();
        collect_tokens(&event.payload, &mut tokens);

        Self {
            signature: format!(
                "{}/{}#{}",
                event.source_type,
                event.event_type,
                &digest[..DIGEST_CHARS]
            ),
            source_type: event.source_type.clone(),
            event_type: event.event_type.clone(),
            tokens,
        }
    }

    /// Jaccard similarity of the token sets (1.0 when both are empty).
    pub fn similarity(&self, tokens: &BTreeSet<String>) -> f64 {
        let union = self.tokens.union(tokens).count();
        if union == 0 {
            return 1.0;
        }
        self.tokens.intersection(tokens).count() as f64 / union as f64
    }
}

fn collect_tokens(value: &Value, tokens: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                tokens.insert(format!("k:{}", key));
                collect_tokens(inner, tokens);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_tokens(v, tokens)),
        Value::String(s) => {
            let token: String = s.to_lowercase().chars().take(MAX_TOKEN_CHARS).collect();
            tokens.insert(format!("s:{}", token));
        }
        // Numbers and flags vary per delivery and carry no identity.
        Value::Number(_) | Value::Bool(_) | Value::Null => {}
    }
}

/// Depth of the deepest container in `value`.
pub fn nesting_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(nesting_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(nesting_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Sources that sent more than `threshold` events in `events`.
pub fn burst_sources(events: &[WebhookEvent], threshold: usize) -> HashSet<String> {
    let mut per_source: HashMap<&str, usize> = HashMap::new();
    for event in events {
        *per_source.entry(event.source_type.as_str()).or_default() += 1;
    }
    per_source
        .into_iter()
        .filter(|(_, count)| *count > threshold)
        .map(|(source, _)| source.to_string())
        .collect()
}

/// Apply the payload rules in priority order.
pub fn classify(event: &WebhookEvent, config: &ImmuneConfig) -> Option<AnomalyRule> {
    let haystack = event.payload.to_string().to_lowercase();
    if config
        .suspicious_patterns
        .iter()
        .any(|p| haystack.contains(&p.to_lowercase()))
    {
        return Some(AnomalyRule::InjectionPattern);
    }
    if event.payload_bytes() > config.max_payload_bytes {
        return Some(AnomalyRule::OversizedPayload);
    }
    if nesting_depth(&event.payload) > config.max_nesting_depth {
        return Some(AnomalyRule::DeepNesting);
    }
    None
}

/// Rules about how an event arrived rather than what it carries.
pub fn flag(event: &WebhookEvent, bursting: &HashSet<String>) -> Option<AnomalyRule> {
    if bursting.contains(&event.source_type) {
        return Some(AnomalyRule::Burst);
    }
    if event.severity == Severity::Critical {
        return Some(AnomalyRule::CriticalSeverity);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(payload: Value) -> WebhookEvent {
        WebhookEvent::new("e", "github", "push", payload, Severity::Low)
    }

    #[test]
    fn test_signature_is_stable_across_key_order() {
        let a = Fingerprint::of(&event(json!({"a": 1, "b": "x"})));
        let b: Value = serde_json::from_str(r#"{"b":"x","a":1}"#).unwrap();
        assert_eq!(a.signature, Fingerprint::of(&event(b)).signature);
        assert!(a.signature.starts_with("github/push#"));
    }

    #[test]
    fn test_similarity_ignores_numbers() {
        let a = Fingerprint::of(&event(json!({"user": "bob", "n": 1})));
        let b = Fingerprint::of(&event(json!({"user": "bob", "n": 2})));
        assert_ne!(a.signature, b.signature);
        assert_eq!(a.similarity(&b.tokens), 1.0);
    }

    #[test]
    fn test_injection_rule() {
        let config = ImmuneConfig::default();
        let e = event(json!({"comment": "<SCRIPT>alert(1)</script>"}));
        assert_eq!(classify(&e, &config), Some(AnomalyRule::InjectionPattern));
        let clean = event(json!({"comment": "looks good"}));
        assert_eq!(classify(&clean, &config), None);
    }

    #[test]
    fn test_deep_nesting_rule() {
        let config = ImmuneConfig {
            max_nesting_depth: 3,
            ..Default::default()
        };
        let e = event(json!({"a": {"b": {"c": {"d": "x"}}}}));
        assert_eq!(nesting_depth(&e.payload), 4);
        assert_eq!(classify(&e, &config), Some(AnomalyRule::DeepNesting));
    }

    #[test]
    fn test_oversized_rule_counts_serialized_bytes() {
        let e = event(json!({"blob": "x".repeat(64)}));
        let config = ImmuneConfig {
            max_payload_bytes: e.payload_bytes() - 1,
            ..Default::default()
        };
        assert_eq!(classify(&e, &config), Some(AnomalyRule::OversizedPayload));
        let roomy = ImmuneConfig {
            max_payload_bytes: e.payload_bytes(),
            ..Default::default()
        };
        assert_eq!(classify(&e, &roomy), None);
    }

    #[test]
    fn test_severity_and_rate_are_flags_not_payload_rules() {
        let config = ImmuneConfig::default();
        let mut e = event(json!({"ref": "main"}));
        e.severity = Severity::Critical;
        assert_eq!(classify(&e, &config), None);
        assert_eq!(flag(&e, &HashSet::new()), Some(AnomalyRule::CriticalSeverity));
        let bursting: HashSet<String> = ["github".to_string()].into();
        assert_eq!(flag(&e, &bursting), Some(AnomalyRule::Burst));
        assert!(!AnomalyRule::CriticalSeverity.is_intrinsic());
        assert!(!AnomalyRule::Burst.is_intrinsic());
        assert!(AnomalyRule::InjectionPattern.is_intrinsic());
    }

    #[test]
    fn test_burst_sources() {
        let events: Vec<WebhookEvent> = (0..4).map(|_| event(json!({}))).collect();
        assert!(burst_sources(&events, 3).contains("github"));
        assert!(burst_sources(&events, 4).is_empty());
    }
}
