// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn base_rules_cover_icmp_ssh_and_tmate() {
    let rules = required_rules(&[]);
    assert_eq!(rules.len(), 3);
    assert!(rules
        .iter()
        .any(|rule| rule.protocol.as_deref() == Some("icmp") && rule.direction == "ingress"));
    assert!(rules.iter().any(|rule| {
        rule.protocol.as_deref() == Some("tcp")
            && rule.direction == "ingress"
            && rule.port_range_min == Some(22)
    }));
    assert!(rules.iter().any(|rule| {
        rule.protocol.as_deref() == Some("tcp")
            && rule.direction == "egress"
            && rule.port_range_min == Some(10022)
    }));
}

#[test]
fn extra_ports_add_ingress_rules() {
    let rules = required_rules(&[8080, 9090]);
    assert_eq!(rules.len(), 5);
    for port in [8080u16, 9090] {
        assert!(rules.iter().any(|rule| {
            rule.direction == "ingress"
                && rule.port_range_min == Some(port)
                && rule.port_range_max == Some(port)
        }));
    }
}

#[test]
fn missing_rules_is_empty_when_all_exist() {
    let expected = required_rules(&[8080]);
    let existing = expected.clone();
    assert!(missing_rules(&expected, &existing).is_empty());
}

#[test]
fn missing_rules_finds_only_the_absent_ones() {
    let expected = required_rules(&[]);
    // Everything but SSH already exists.
    let existing: Vec<SecurityRule> = expected
        .iter()
        .filter(|rule| rule.port_range_min != Some(22))
        .cloned()
        .collect();

    let missing = missing_rules(&expected, &existing);
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].port_range_min, Some(22));
}

#[test]
fn unrelated_existing_rules_do_not_match() {
    let expected = required_rules(&[]);
    // Same port but wrong direction must not satisfy the SSH rule.
    let existing = vec![SecurityRule {
        protocol: Some("tcp".to_string()),
        direction: "egress".to_string(),
        ethertype: "IPv4".to_string(),
        port_range_min: Some(22),
        port_range_max: Some(22),
    }];
    let missing = missing_rules(&expected, &existing);
    assert_eq!(missing.len(), 3);
}

#[test]
fn existing_rules_parse_from_api_payload() {
    let raw = serde_json::json!({
        "id": "rule-1",
        "protocol": "tcp",
        "direction": "ingress",
        "ethertype": "IPv4",
        "port_range_min": 22,
        "port_range_max": 22,
        "remote_ip_prefix": null,
        "security_group_id": "group-1"
    });
    let rule: SecurityRule = serde_json::from_value(raw).unwrap();
    assert_eq!(rule.port_range_min, Some(22));
}
