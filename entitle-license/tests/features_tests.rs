mod common;

use common::{snapshot, with_custom, with_override};
use entitle_license::{
    get_limit_value, has_feature, resolve_feature, FeatureOverride, FeatureSource, PlanType,
};
use proptest::prelude::*;
use serde_json::json;

// ── Plan defaults ───────────────────────────────────────────────

#[test]
fn plan_defaults_table() {
    let cases = [
        (PlanType::Start, "planning", true),
        (PlanType::Start, "forecast", false),
        (PlanType::Start, "sso", false),
        (PlanType::Pro, "forecast", true),
        (PlanType::Pro, "reports", true),
        (PlanType::Pro, "sso", false),
        (PlanType::Enterprise, "forecast", true),
        (PlanType::Enterprise, "sso", true),
        (PlanType::Enterprise, "audit_log", true),
        (PlanType::Enterprise, "does_not_exist", false),
    ];

    for (plan, key, expected) in cases {
        assert_eq!(
            has_feature(&snapshot(plan), key),
            expected,
            "{plan} / {key}"
        );
    }
}

#[test]
fn plan_default_reports_source() {
    let decision = resolve_feature(&snapshot(PlanType::Pro), "forecast");
    assert!(decision.enabled);
    assert_eq!(decision.source, FeatureSource::PlanDefault);
}

// ── Custom features ─────────────────────────────────────────────

#[test]
fn custom_feature_enables_beyond_plan() {
    let s = with_custom(PlanType::Start, "forecast", true);
    assert!(has_feature(&s, "forecast"));
    assert_eq!(resolve_feature(&s, "forecast").source, FeatureSource::CustomFeature);
}

#[test]
fn custom_feature_false_disables_plan_default() {
    let s = with_custom(PlanType::Enterprise, "sso", false);
    assert!(!has_feature(&s, "sso"));
}

#[test]
fn non_boolean_custom_value_falls_through_to_plan() {
    let mut s = snapshot(PlanType::Pro);
    s.custom_features = Some([("forecast".to_string(), json!(5))].into_iter().collect());
    let decision = resolve_feature(&s, "forecast");
    assert!(decision.enabled);
    assert_eq!(decision.source, FeatureSource::PlanDefault);
}

// ── User overrides ──────────────────────────────────────────────

#[test]
fn user_override_false_beats_custom_true() {
    let mut s = with_custom(PlanType::Start, "reports", true);
    s.user_feature_overrides = Some(vec![FeatureOverride::new("reports", false)]);
    let decision = resolve_feature(&s, "reports");
    assert!(!decision.enabled);
    assert_eq!(decision.source, FeatureSource::UserOverride);
}

#[test]
fn user_override_true_beats_plan_absence() {
    let s = with_override(PlanType::Start, "api_access", true);
    assert!(has_feature(&s, "api_access"));
}

#[test]
fn empty_override_list_is_not_an_override() {
    let mut s = snapshot(PlanType::Pro);
    s.user_feature_overrides = Some(Vec::new());
    assert_eq!(resolve_feature(&s, "forecast").source, FeatureSource::PlanDefault);
}

#[test]
fn override_for_other_key_does_not_apply() {
    let s = with_override(PlanType::Start, "sso", true);
    assert!(!has_feature(&s, "forecast"));
}

// ── Limits ──────────────────────────────────────────────────────

#[test]
fn limit_absent_is_none() {
    assert_eq!(get_limit_value(&snapshot(PlanType::Enterprise), "max_users"), None);
}

#[test]
fn limit_from_limits_map() {
    let mut s = snapshot(PlanType::Pro);
    s.limits.insert("max_users".into(), Some(25));
    s.limits.insert("max_projects".into(), None);
    assert_eq!(get_limit_value(&s, "max_users"), Some(25));
    assert_eq!(get_limit_value(&s, "max_projects"), None);
}

#[test]
fn custom_integer_wins_over_limits_map() {
    let mut s = snapshot(PlanType::Pro);
    s.limits.insert("max_users".into(), Some(25));
    s.custom_features = Some([("max_users".to_string(), json!(100))].into_iter().collect());
    assert_eq!(get_limit_value(&s, "max_users"), Some(100));
}

#[test]
fn custom_null_means_unlimited_over_limits_map() {
    let mut s = snapshot(PlanType::Pro);
    s.limits.insert("users".into(), Some(5));
    s.custom_features = Some([("users".to_string(), json!(null))].into_iter().collect());
    assert_eq!(get_limit_value(&s, "users"), None);
}

#[test]
fn boolean_custom_value_is_not_a_limit() {
    let mut s = snapshot(PlanType::Pro);
    s.limits.insert("max_users".into(), Some(3));
    s.custom_features = Some([("max_users".to_string(), json!(true))].into_iter().collect());
    assert_eq!(get_limit_value(&s, "max_users"), Some(3));
}

// ── Precedence properties ───────────────────────────────────────

fn plan_strategy() -> impl Strategy<Value = PlanType> {
    prop::sample::select(PlanType::ALL.to_vec())
}

fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "planning", "forecast", "reports", "sso", "api_access", "unknown_feature",
    ])
    .prop_map(str::to_string)
}

proptest! {
    #[test]
    fn user_override_always_wins(
        plan in plan_strategy(),
        key in key_strategy(),
        custom in any::<Option<bool>>(),
        enabled in any::<bool>(),
        noise in prop::collection::vec((key_strategy(), any::<bool>()), 0..4),
    ) {
        let mut s = common::snapshot(plan);
        if let Some(c) = custom {
            s.custom_features = Some([(key.clone(), json!(c))].into_iter().collect());
        }
        let mut overrides: Vec<FeatureOverride> = noise
            .into_iter()
            .filter(|(k, _)| k != &key)
            .map(|(k, e)| FeatureOverride::new(k, e))
            .collect();
        let at = overrides.len() / 2;
        overrides.insert(at, FeatureOverride::new(key.clone(), enabled));
        s.user_feature_overrides = Some(overrides);

        prop_assert_eq!(has_feature(&s, &key), enabled);
    }

    #[test]
    fn custom_feature_wins_over_plan(
        plan in plan_strategy(),
        key in key_strategy(),
        enabled in any::<bool>(),
    ) {
        let s = common::with_custom(plan, &key, enabled);
        prop_assert_eq!(has_feature(&s, &key), enabled);
    }

    #[test]
    fn without_overrides_plan_decides(plan in plan_strategy(), key in key_strategy()) {
        let s = common::snapshot(plan);
        prop_assert_eq!(has_feature(&s, &key), plan.includes(&key));
    }
}
