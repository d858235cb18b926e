//! Bridge, veth pair, and network namespace wiring (C4).

use std::{
    net::Ipv4Addr,
    process::{Command, Output},
};

use sha2::{Digest as _, Sha256};

use crate::{
    config::{BRIDGE_NAME, CONTAINER_IFACE, CONTAINER_SUBNET, VETH_HOST_PREFIX},
    OcirunError, OcirunResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The third byte of every deterministic container MAC, matching the
/// locally-administered `02:42:xx:..` convention.
const MAC_PREFIX_BYTE: &str = "42";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn run(cmd: &mut Command) -> OcirunResult<Output> {
    let output = cmd.output()?;
    Ok(output)
}

fn run_ok(cmd: &mut Command, context: &str) -> OcirunResult<()> {
    let output = run(cmd)?;
    if !output.status.success() {
        return Err(OcirunError::NetworkSetupFailed(format!(
            "{context}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn run_tolerant(cmd: &mut Command) {
    if let Err(e) = run(cmd) {
        tracing::warn!(error = %e, "teardown command failed to even execute");
    }
}

/// Derives the host-side veth name from `ns_name`, keeping the result under
/// the 15-character `IFNAMSIZ` limit.
pub fn host_veth_name(ns_name: &str) -> String {
    let hash = Sha256::digest(ns_name.as_bytes());
    let suffix = hex::encode(&hash[..4]);
    format!("{VETH_HOST_PREFIX}{suffix}")
}

/// Derives the deterministic, locally-administered MAC for a container's
/// `eth0`, from its allocated IP.
pub fn container_mac(ip: Ipv4Addr) -> String {
    let octets = ip.octets();
    format!(
        "02:{MAC_PREFIX_BYTE}:{}:{:02x}:{:02x}:00",
        "ac", octets[2], octets[3]
    )
}

fn link_exists(name: &str) -> bool {
    Command::new("ip")
        .args(["link", "show", name])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn iptables_rule_exists(args: &[&str]) -> bool {
    let mut check_args = vec!["-C"];
    check_args.extend_from_slice(args);
    Command::new("iptables")
        .args(&check_args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn iptables_ensure(args: &[&str]) -> OcirunResult<()> {
    if iptables_rule_exists(args) {
        return Ok(());
    }

    let mut insert_args = vec!["-A"];
    insert_args.extend_from_slice(args);
    run_ok(
        Command::new("iptables").args(&insert_args),
        &format!("iptables -A {}", args.join(" ")),
    )
}

/// Ensures the host bridge exists, is up, and carries the subnet's gateway
/// address; idempotent. Also programs the host forwarding policy.
pub fn ensure_bridge() -> OcirunResult<()> {
    let subnet = *CONTAINER_SUBNET;
    let gateway = subnet.network().octets();
    let gateway = Ipv4Addr::new(gateway[0], gateway[1], gateway[2], gateway[3] + 1);
    let prefix = subnet.prefix();

    if !link_exists(BRIDGE_NAME) {
        run_ok(
            Command::new("ip").args(["link", "add", "name", BRIDGE_NAME, "type", "bridge"]),
            "create bridge",
        )?;
        run_ok(
            Command::new("ip").args([
                "addr",
                "add",
                &format!("{gateway}/{prefix}"),
                "dev",
                BRIDGE_NAME,
            ]),
            "assign bridge address",
        )?;
    }

    run_ok(
        Command::new("ip").args(["link", "set", BRIDGE_NAME, "up"]),
        "bring up bridge",
    )?;

    std::fs::write("/proc/sys/net/ipv4/ip_forward", "1")?;

    let subnet_str = subnet.to_string();
    iptables_ensure(&[
        "FORWARD", "-s", &subnet_str, "-d", &subnet_str, "-j", "ACCEPT",
    ])?;
    iptables_ensure(&[
        "FORWARD",
        "-m",
        "state",
        "--state",
        "RELATED,ESTABLISHED",
        "-j",
        "ACCEPT",
    ])?;

    Ok(())
}

/// Creates namespace `ns_name`, wires a veth pair into bridge [`BRIDGE_NAME`],
/// and assigns `container_ip` inside it.
pub fn setup_namespace(ns_name: &str, container_ip: Ipv4Addr) -> OcirunResult<()> {
    ensure_bridge()?;

    run_ok(
        Command::new("ip").args(["netns", "add", ns_name]),
        "create namespace",
    )?;

    let host_end = host_veth_name(ns_name);
    run_ok(
        Command::new("ip").args([
            "link",
            "add",
            &host_end,
            "type",
            "veth",
            "peer",
            "name",
            CONTAINER_IFACE,
        ]),
        "create veth pair",
    )?;

    let mac = container_mac(container_ip);
    run_ok(
        Command::new("ip").args(["link", "set", CONTAINER_IFACE, "address", &mac]),
        "assign container mac",
    )?;

    run_ok(
        Command::new("ip").args(["link", "set", CONTAINER_IFACE, "netns", ns_name]),
        "move veth into namespace",
    )?;

    run_ok(
        Command::new("ip").args(["link", "set", &host_end, "master", BRIDGE_NAME]),
        "attach host veth to bridge",
    )?;
    run_ok(
        Command::new("ip").args(["link", "set", &host_end, "up"]),
        "bring up host veth",
    )?;

    // Best-effort; not every kernel/bridge build exposes these knobs.
    let _ = run(Command::new("ip").args([
        "link", "set", "dev", &host_end, "type", "bridge_slave", "hairpin", "on",
    ]));

    let prefix = CONTAINER_SUBNET.prefix();
    run_ok(
        Command::new("ip").args([
            "netns",
            "exec",
            ns_name,
            "ip",
            "addr",
            "add",
            &format!("{container_ip}/{prefix}"),
            "dev",
            CONTAINER_IFACE,
        ]),
        "assign container address",
    )?;
    run_ok(
        Command::new("ip").args(["netns", "exec", ns_name, "ip", "link", "set", CONTAINER_IFACE, "up"]),
        "bring up container iface",
    )?;
    run_ok(
        Command::new("ip").args(["netns", "exec", ns_name, "ip", "link", "set", "lo", "up"]),
        "bring up loopback",
    )?;

    let gateway_octets = CONTAINER_SUBNET.network().octets();
    let gateway = Ipv4Addr::new(
        gateway_octets[0],
        gateway_octets[1],
        gateway_octets[2],
        gateway_octets[3] + 1,
    );
    run_ok(
        Command::new("ip").args([
            "netns", "exec", ns_name, "ip", "route", "add", "default", "via", &gateway.to_string(),
        ]),
        "add default route",
    )?;

    let _ = run(Command::new("ip").args([
        "netns", "exec", ns_name, "ping", "-c", "1", "-W", "1", &gateway.to_string(),
    ]));

    Ok(())
}

/// Tears down `ns_name`'s veth and namespace. Every step is error-tolerant.
pub fn teardown_namespace(ns_name: &str) {
    let host_end = host_veth_name(ns_name);
    run_tolerant(Command::new("ip").args(["link", "delete", &host_end]));
    run_tolerant(Command::new("ip").args(["netns", "delete", ns_name]));
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_veth_name_is_deterministic_and_short() {
        let a = host_veth_name("ocirun-abc123");
        let b = host_veth_name("ocirun-abc123");
        let c = host_veth_name("ocirun-xyz789");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.len() <= 15, "{a} exceeds IFNAMSIZ");
        assert!(a.starts_with(VETH_HOST_PREFIX));
    }

    #[test]
    fn test_container_mac_is_deterministic_and_locally_administered() {
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        let mac = container_mac(ip);
        assert_eq!(mac, "02:42:ac:00:05:00");
        assert_eq!(container_mac(ip), mac);
    }
}
