// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    reactive     = { ReactiveMode::Reactive,    "unit-0-r-abc123" },
    non_reactive = { ReactiveMode::NonReactive, "unit-0-n-abc123" },
    unknown      = { ReactiveMode::Unknown,     "unit-0-abc123" },
)]
fn renders_name(mode: ReactiveMode, expected: &str) {
    let id = InstanceId::new("unit-0", mode, "abc123");
    assert_eq!(id.name(), expected);
    assert_eq!(id.to_string(), expected);
}

#[yare::parameterized(
    reactive     = { ReactiveMode::Reactive },
    non_reactive = { ReactiveMode::NonReactive },
    unknown      = { ReactiveMode::Unknown },
)]
fn parse_inverts_render(mode: ReactiveMode) {
    let id = InstanceId::new("unit-0", mode, "x9y8z7");
    let parsed = InstanceId::parse("unit-0", &id.name()).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn parse_handles_prefix_with_dashes() {
    let id = InstanceId::new("my-unit-0", ReactiveMode::Reactive, "suffix1");
    let parsed = InstanceId::parse("my-unit-0", &id.name()).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn parse_rejects_foreign_prefix() {
    let err = InstanceId::parse("unit-0", "other-1-abc123").unwrap_err();
    assert!(matches!(err, InstanceIdError::PrefixMismatch { .. }));
}

#[yare::parameterized(
    empty_suffix   = { "unit-0-" },
    empty_reactive = { "unit-0-r-" },
    bad_chars      = { "unit-0-ab_c!" },
)]
fn parse_rejects_bad_suffix(name: &str) {
    let err = InstanceId::parse("unit-0", name).unwrap_err();
    assert!(matches!(err, InstanceIdError::InvalidSuffix(_)));
}

#[test]
fn generate_is_unique_and_parseable() {
    let a = InstanceId::generate("unit-0", true);
    let b = InstanceId::generate("unit-0", true);
    assert_ne!(a, b);
    assert_eq!(a.reactive, ReactiveMode::Reactive);
    assert_eq!(a.suffix.len(), 8);
    assert_eq!(InstanceId::parse("unit-0", &a.name()).unwrap(), a);

    let c = InstanceId::generate("unit-0", false);
    assert_eq!(c.reactive, ReactiveMode::NonReactive);
}

#[yare::parameterized(
    owned       = { "unit-0", "unit-0-abc", true },
    exact_only  = { "unit-0", "unit-0", false },
    foreign     = { "unit-0", "unit-1-abc", false },
    not_a_dash  = { "unit-0", "unit-0abc", false },
)]
fn name_has_prefix_cases(prefix: &str, name: &str, expected: bool) {
    assert_eq!(InstanceId::name_has_prefix(prefix, name), expected);
}
