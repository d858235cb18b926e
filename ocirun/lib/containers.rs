//! The persistent container registry and IP allocator (C3).
//!
//! A single JSON file maps container name to `{ip, netns}`. Writes are
//! write-temp-then-rename; a file lock serializes the `allocateIp` +
//! `register` pair across concurrent `run` invocations.

use std::{
    collections::BTreeMap,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use file_lock::{FileLock, FileOptions};
use serde::{Deserialize, Serialize};

use crate::{config::CONTAINER_SUBNET, OcirunError, OcirunResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single registered container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// The container's address on the private subnet.
    pub ip: Ipv4Addr,
    /// The kernel-visible network namespace name.
    pub netns: String,
}

/// The canonical on-disk shape: `{"containers": {name: record}}`.
#[derive(Debug, Serialize, Deserialize, Default)]
struct CanonicalFile {
    containers: BTreeMap<String, ContainerRecord>,
}

/// Either on-disk shape readers must tolerate: `{name: record}` or
/// `{"containers": {name: record}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TolerantFile {
    Canonical(CanonicalFile),
    Bare(BTreeMap<String, ContainerRecord>),
}

/// The container registry, bound to a JSON file and a companion lock file.
#[derive(Debug, Clone)]
pub struct ContainerRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerRegistry {
    /// Opens a registry backed by `path`, locked via `lock_path`.
    pub fn new(path: PathBuf, lock_path: PathBuf) -> Self {
        Self { path, lock_path }
    }

    fn read(&self) -> OcirunResult<BTreeMap<String, ContainerRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let parsed: TolerantFile = serde_json::from_str(&contents)?;
        Ok(match parsed {
            TolerantFile::Canonical(file) => file.containers,
            TolerantFile::Bare(map) => map,
        })
    }

    fn write(&self, records: &BTreeMap<String, ContainerRecord>) -> OcirunResult<()> {
        let canonical = CanonicalFile {
            containers: records.clone(),
        };
        let serialized = serde_json::to_string_pretty(&canonical)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> OcirunResult<FileLock> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = FileOptions::new().write(true).create(true).append(true);
        FileLock::lock(&self.lock_path, true, options)
            .map_err(|e| OcirunError::custom(anyhow::anyhow!("failed to acquire lock: {e}")))
    }

    /// Allocates the next free IP in the subnet and registers `name` under
    /// it, atomically with respect to other callers.
    ///
    /// Fails with [`OcirunError::NameConflict`] if `name` is already
    /// registered, or [`OcirunError::SubnetExhausted`] if the subnet has no
    /// addresses left.
    pub fn allocate_and_register(&self, name: &str, netns: &str) -> OcirunResult<Ipv4Addr> {
        let _guard = self.lock()?;

        let mut records = self.read()?;
        if records.contains_key(name) {
            return Err(OcirunError::NameConflict(name.to_string()));
        }

        let ip = self.allocate_ip_locked(&records)?;
        records.insert(
            name.to_string(),
            ContainerRecord {
                ip,
                netns: netns.to_string(),
            },
        );
        self.write(&records)?;

        Ok(ip)
    }

    fn allocate_ip_locked(
        &self,
        records: &BTreeMap<String, ContainerRecord>,
    ) -> OcirunResult<Ipv4Addr> {
        let subnet = *CONTAINER_SUBNET;
        let network = subnet.network().octets();

        let next_octet = match records.values().map(|r| r.ip.octets()[3]).max() {
            None => 2,
            Some(max) => max.checked_add(1).unwrap_or(255),
        };

        if next_octet > 254 {
            return Err(OcirunError::SubnetExhausted(subnet.to_string()));
        }

        Ok(Ipv4Addr::new(
            network[0], network[1], network[2], next_octet,
        ))
    }

    /// Removes `name`'s record, if present. Idempotent.
    pub fn unregister(&self, name: &str) -> OcirunResult<()> {
        let mut records = self.read()?;
        if records.remove(name).is_some() {
            self.write(&records)?;
        }
        Ok(())
    }

    /// Lists every currently registered container, by insertion... order is
    /// not preserved across processes since the backing map is sorted by
    /// name; callers needing insertion order should consult [`hosts_file`]
    /// only for stability of existing entries within a single process.
    pub fn list(&self) -> OcirunResult<Vec<(String, ContainerRecord)>> {
        Ok(self.read()?.into_iter().collect())
    }

    /// Returns the IP registered for `name`, if any.
    pub fn ip_of(&self, name: &str) -> OcirunResult<Option<Ipv4Addr>> {
        Ok(self.read()?.get(name).map(|r| r.ip))
    }

    /// Produces `<ip>\t<name>\n` for every registered container.
    pub fn hosts_file(&self) -> OcirunResult<String> {
        let records = self.read()?;
        let mut out = String::new();
        for (name, record) in records {
            out.push_str(&format!("{}\t{}\n", record.ip, name));
        }
        Ok(out)
    }
}

/// Writes the standard localhost prelude followed by `hosts_body` to `path`.
pub fn write_hosts_file(path: &Path, hosts_body: &str) -> OcirunResult<()> {
    let mut contents = String::from(
        "127.0.0.1\tlocalhost\n::1\tlocalhost ip6-localhost ip6-loopback\n",
    );
    contents.push_str(hosts_body);
    std::fs::write(path, contents)?;
    Ok(())
}

/// Copies the host's `/etc/resolv.conf` into `rootfs_resolv_conf`.
pub fn write_resolv_conf(rootfs_resolv_conf: &Path) -> OcirunResult<()> {
    if let Some(parent) = rootfs_resolv_conf.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy("/etc/resolv.conf", rootfs_resolv_conf)?;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn new_registry(dir: &Path) -> ContainerRegistry {
        ContainerRegistry::new(dir.join("containers.json"), dir.join("containers.lock"))
    }

    #[test_log::test]
    fn test_allocate_first_ip() {
        let dir = tempdir().unwrap();
        let registry = new_registry(dir.path());

        let ip = registry.allocate_and_register("c1", "ocirun-c1").unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(registry.ip_of("c1").unwrap(), Some(ip));
    }

    #[test]
    fn test_allocate_increments_from_max() {
        let dir = tempdir().unwrap();
        let registry = new_registry(dir.path());

        registry.allocate_and_register("c1", "ocirun-c1").unwrap();
        let ip2 = registry.allocate_and_register("c2", "ocirun-c2").unwrap();
        assert_eq!(ip2, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_name_conflict() {
        let dir = tempdir().unwrap();
        let registry = new_registry(dir.path());

        registry.allocate_and_register("c1", "ocirun-c1").unwrap();
        let err = registry.allocate_and_register("c1", "ocirun-other").unwrap_err();
        assert!(matches!(err, OcirunError::NameConflict(_)));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = new_registry(dir.path());

        registry.allocate_and_register("c1", "ocirun-c1").unwrap();
        registry.unregister("c1").unwrap();
        registry.unregister("c1").unwrap();
        assert_eq!(registry.ip_of("c1").unwrap(), None);
    }

    #[test]
    fn test_hosts_file_contains_registered_entries() {
        let dir = tempdir().unwrap();
        let registry = new_registry(dir.path());

        let ip = registry.allocate_and_register("web", "ocirun-web").unwrap();
        let hosts = registry.hosts_file().unwrap();
        assert_eq!(hosts, format!("{}\tweb\n", ip));
    }

    #[test]
    fn test_reads_bare_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("containers.json");
        std::fs::write(
            &path,
            r#"{"web": {"ip": "10.0.0.5", "netns": "ocirun-web"}}"#,
        )
        .unwrap();

        let registry = ContainerRegistry::new(path, dir.path().join("containers.lock"));
        assert_eq!(
            registry.ip_of("web").unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );
    }
}
