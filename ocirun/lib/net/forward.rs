//! Host → container TCP port forwarding via packet-filter rules (C5).

use std::{
    net::Ipv4Addr,
    process::{Command, Output},
};

use crate::{config::PortPair, OcirunError, OcirunResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn run(cmd: &mut Command) -> OcirunResult<Output> {
    Ok(cmd.output()?)
}

fn rule_exists(args: &[String]) -> bool {
    let mut check_args = vec!["-C".to_string()];
    check_args.extend(args.iter().cloned());
    Command::new("iptables")
        .args(&check_args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn add_rule(args: &[String]) -> OcirunResult<()> {
    let mut insert_args = vec!["-A".to_string()];
    insert_args.extend(args.iter().cloned());
    let output = run(Command::new("iptables").args(&insert_args))?;
    if !output.status.success() {
        return Err(OcirunError::PortForwardFailed(format!(
            "iptables -A {}: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn remove_rule(args: &[String]) {
    if !rule_exists(args) {
        return;
    }
    let mut delete_args = vec!["-D".to_string()];
    delete_args.extend(args.iter().cloned());
    if let Ok(output) = run(Command::new("iptables").args(&delete_args)) {
        if !output.status.success() {
            tracing::warn!(
                rule = %args.join(" "),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "failed to remove port-forward rule"
            );
        }
    }
}

/// Enables `route_localnet` on `lo` and `all`, allowing DNAT rewrites to
/// reach `127.0.0.1`-originated traffic. Idempotent.
pub fn enable_route_localnet() -> OcirunResult<()> {
    std::fs::write("/proc/sys/net/ipv4/conf/lo/route_localnet", "1")?;
    std::fs::write("/proc/sys/net/ipv4/conf/all/route_localnet", "1")?;
    Ok(())
}

fn rule_args(container_ip: Ipv4Addr, pair: PortPair) -> [Vec<String>; 5] {
    let host_port = pair.host().to_string();
    let container_port = pair.container().to_string();
    let dest = format!("{container_ip}:{container_port}");

    [
        vec![
            "FORWARD".into(),
            "-p".into(),
            "tcp".into(),
            "-d".into(),
            container_ip.to_string(),
            "--dport".into(),
            container_port.clone(),
            "-m".into(),
            "state".into(),
            "--state".into(),
            "NEW".into(),
            "-j".into(),
            "ACCEPT".into(),
        ],
        vec![
            "FORWARD".into(),
            "-p".into(),
            "tcp".into(),
            "-s".into(),
            container_ip.to_string(),
            "--sport".into(),
            container_port.clone(),
            "-j".into(),
            "ACCEPT".into(),
        ],
        vec![
            "PREROUTING".into(),
            "-t".into(),
            "nat".into(),
            "-p".into(),
            "tcp".into(),
            "--dport".into(),
            host_port.clone(),
            "-j".into(),
            "DNAT".into(),
            "--to".into(),
            dest.clone(),
        ],
        vec![
            "OUTPUT".into(),
            "-t".into(),
            "nat".into(),
            "-p".into(),
            "tcp".into(),
            "-d".into(),
            "127.0.0.1".into(),
            "--dport".into(),
            host_port,
            "-j".into(),
            "DNAT".into(),
            "--to".into(),
            dest,
        ],
        vec![
            "POSTROUTING".into(),
            "-t".into(),
            "nat".into(),
            "-p".into(),
            "tcp".into(),
            "-d".into(),
            container_ip.to_string(),
            "--dport".into(),
            container_port,
            "-j".into(),
            "MASQUERADE".into(),
        ],
    ]
}

/// Programs the five packet-filter rules for a single mapping.
///
/// If any rule fails to install, every rule already added *for this
/// mapping* is rolled back before returning [`OcirunError::PortForwardFailed`].
/// Rules from earlier mappings in the same batch are left for the caller's
/// teardown path.
pub fn add_mapping(container_ip: Ipv4Addr, pair: PortPair) -> OcirunResult<()> {
    let rules = rule_args(container_ip, pair);
    let mut installed = Vec::new();

    for rule in &rules {
        match add_rule(rule) {
            Ok(()) => installed.push(rule.clone()),
            Err(e) => {
                for done in installed.iter().rev() {
                    remove_rule(done);
                }
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Removes the five packet-filter rules for a single mapping, tolerating
/// their absence.
pub fn remove_mapping(container_ip: Ipv4Addr, pair: PortPair) {
    let rules = rule_args(container_ip, pair);
    for rule in rules.iter().rev() {
        remove_rule(rule);
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_args_count_and_shape() {
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        let pair = PortPair::distinct(8080, 80);
        let rules = rule_args(ip, pair);

        assert_eq!(rules.len(), 5);
        assert!(rules[2].contains(&"PREROUTING".to_string()));
        assert!(rules[2].contains(&"8080".to_string()));
        assert!(rules[4].contains(&"MASQUERADE".to_string()));
    }
}
