// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const NEEDLE: &str = "/usr/bin/rfmd consume";

#[test]
fn parse_pids_keeps_only_consumer_lines() {
    let output = "\
/usr/bin/rfmd consume   2302635
-bash                   2302498
/bin/sh -c /usr/bin/rf  1757306
/usr/bin/rfmd consume   1757308
";
    assert_eq!(parse_consumer_pids(output, NEEDLE), vec![2302635, 1757308]);
}

#[test]
fn parse_pids_preserves_start_time_order() {
    let output = "\
/usr/bin/rfmd consume   300
/usr/bin/rfmd consume   200
/usr/bin/rfmd consume   100
";
    // ps sorts newest first; the order is preserved so surplus kills take
    // the newest processes.
    assert_eq!(parse_consumer_pids(output, NEEDLE), vec![300, 200, 100]);
}

#[test]
fn parse_pids_ignores_garbage() {
    let output = "\
/usr/bin/rfmd consume   notanumber
/usr/bin/rfmd consume
";
    assert!(parse_consumer_pids(output, NEEDLE).is_empty());
}

#[test]
fn parse_pids_on_empty_output() {
    assert!(parse_consumer_pids("", NEEDLE).is_empty());
}

#[test]
fn needle_includes_subcommand() {
    let manager = ProcessManager::new("/usr/bin/rfmd", "/etc/rfm.yaml", "/var/log/rfm");
    assert_eq!(manager.needle(), "/usr/bin/rfmd consume");
}
