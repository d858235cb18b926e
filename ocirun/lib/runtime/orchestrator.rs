//! The container lifecycle state machine (C7).
//!
//! ```text
//! ENTRY -> ROOTFS_READY -> IP_ALLOCATED -> NETNS_UP -> REGISTERED -> PORTS_UP -> RUNNING -> EXITED -> CLEAN
//! ```
//!
//! Each step pushes the closure that undoes it onto a LIFO stack; the stack
//! is drained on both success and failure, and each closure is independently
//! error-tolerant so that one failure cannot suppress another's cleanup.

use std::{
    fs::File,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::Command,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use nix::{
    sched::{setns, CloneFlags},
    sys::signal::{self, Signal},
    unistd::{chdir, chroot, Pid, Uid},
};
use signal_hook::{consts::TERM_SIGNALS, iterator::Signals};

use crate::{
    config::{
        PortPair, ANONYMOUS_CONTAINER_PREFIX, CONTAINER_REGISTRY_LOCK_PATH,
        CONTAINER_REGISTRY_PATH, DEFAULT_HOME, DEFAULT_PATH, DEFAULT_PS1, DEFAULT_SHELL,
        DEFAULT_TERM, NETNS_PREFIX,
    },
    containers::{write_hosts_file, write_resolv_conf, ContainerRegistry},
    net::{fabric, forward},
    oci::{rootfs, Reference},
    OcirunError, OcirunResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything a `run` invocation needs beyond the image reference.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The command and its arguments, run inside the container.
    pub command: Vec<String>,
    /// Host-to-container TCP port mappings.
    pub ports: Vec<PortPair>,
    /// An optional user-chosen container name.
    pub name: Option<String>,
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// The LIFO stack of cleanup actions accumulated across a `run` invocation.
#[derive(Default)]
struct CleanupStack {
    actions: Vec<Cleanup>,
}

impl CleanupStack {
    fn push(&mut self, action: impl FnOnce() + Send + 'static) {
        self.actions.push(Box::new(action));
    }

    fn unwind(mut self) {
        while let Some(action) = self.actions.pop() {
            action();
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs `reference` with `request`, returning the child's exit code.
///
/// A non-zero child exit is not an orchestration error; only failures to
/// reach the `RUNNING` state are returned as `Err`.
pub async fn run(
    artifacts_dir: &Path,
    reference: &Reference,
    request: RunRequest,
) -> OcirunResult<i32> {
    // ENTRY
    if !Uid::effective().is_root() {
        return Err(OcirunError::PermissionDenied);
    }

    let image_dir = artifacts_dir.join(reference.flat_name());
    if !image_dir.exists() {
        return Err(OcirunError::ImageNotFound(reference.to_string()));
    }
    let has_layers = std::fs::read_dir(&image_dir)?
        .filter_map(|e| e.ok())
        .any(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.starts_with("layer_"))
        });
    if !has_layers {
        return Err(OcirunError::NoLayers(reference.to_string()));
    }

    let mut cleanup = CleanupStack::default();

    // ROOTFS_READY
    let rootfs_path = rootfs::build(&image_dir)?;
    {
        let path = rootfs_path.clone();
        cleanup.push(move || {
            if let Err(e) = rootfs::teardown(&path) {
                tracing::warn!(error = %e, path = %path.display(), "failed to remove rootfs");
            }
        });
    }

    let result = run_from_rootfs(&rootfs_path, reference, request, &mut cleanup).await;

    cleanup.unwind();

    result
}

async fn run_from_rootfs(
    rootfs_path: &Path,
    reference: &Reference,
    request: RunRequest,
    cleanup: &mut CleanupStack,
) -> OcirunResult<i32> {
    let registry = ContainerRegistry::new(
        CONTAINER_REGISTRY_PATH.clone(),
        CONTAINER_REGISTRY_LOCK_PATH.clone(),
    );

    let ns_name = format!(
        "{NETNS_PREFIX}{}",
        rootfs_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("container")
    );

    // IP_ALLOCATED + NETNS_UP
    let effective_name = request
        .name
        .clone()
        .unwrap_or_else(|| format!("{ANONYMOUS_CONTAINER_PREFIX}{ns_name}"));

    let ip = registry.allocate_and_register(&effective_name, &ns_name)?;
    {
        let registry = registry.clone();
        let effective_name = effective_name.clone();
        cleanup.push(move || {
            if let Err(e) = registry.unregister(&effective_name) {
                tracing::warn!(error = %e, name = %effective_name, "failed to unregister container");
            }
        });
    }

    fabric::setup_namespace(&ns_name, ip).map_err(|e| {
        OcirunError::NetworkSetupFailed(format!("{reference}: {e}"))
    })?;
    {
        let ns_name = ns_name.clone();
        cleanup.push(move || fabric::teardown_namespace(&ns_name));
    }

    // PORTS_UP
    if !request.ports.is_empty() {
        forward::enable_route_localnet()?;

        let mut installed = Vec::new();
        for pair in &request.ports {
            match forward::add_mapping(ip, *pair) {
                Ok(()) => installed.push(*pair),
                Err(e) => {
                    for pair in installed.iter().rev() {
                        forward::remove_mapping(ip, *pair);
                    }
                    return Err(e);
                }
            }
        }

        let ports = installed;
        cleanup.push(move || {
            for pair in ports.iter().rev() {
                forward::remove_mapping(ip, *pair);
            }
        });
    }

    // RUNNING
    write_resolv_conf(&rootfs_path.join("etc/resolv.conf"))?;
    let hosts_body = registry.hosts_file()?;
    write_hosts_file(&rootfs_path.join("etc/hosts"), &hosts_body)?;

    let exit_code = spawn_and_wait(rootfs_path, &ns_name, &request.command)?;

    // EXITED
    Ok(exit_code)
}

fn spawn_and_wait(rootfs_path: &Path, ns_name: &str, command: &[String]) -> OcirunResult<i32> {
    let Some((program, args)) = command.split_first() else {
        return Err(OcirunError::ChildSpawnFailed("no command given".into()));
    };

    let netns_path = PathBuf::from("/var/run/netns").join(ns_name);
    let rootfs_path = rootfs_path.to_path_buf();

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.env_clear();
    cmd.envs(std::env::vars());
    cmd.env("PATH", DEFAULT_PATH);
    cmd.env("HOME", DEFAULT_HOME);
    cmd.env("PS1", DEFAULT_PS1);
    cmd.env("SHELL", DEFAULT_SHELL);
    cmd.env("TERM", DEFAULT_TERM);

    // Safety: the closure only calls async-signal-safe syscalls (setns,
    // chroot, chdir) between fork and execve, as required by `pre_exec`.
    unsafe {
        cmd.pre_exec(move || {
            let netns_file = File::open(&netns_path)?;
            setns(&netns_file, CloneFlags::CLONE_NEWNET)
                .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            chroot(&rootfs_path).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            chdir("/").map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| OcirunError::ChildSpawnFailed(e.to_string()))?;

    let child_pid = Arc::new(AtomicI32::new(child.id() as i32));
    let signal_thread = spawn_signal_forwarder(child_pid);

    let status = child.wait()?;
    drop(signal_thread);

    Ok(status.code().unwrap_or(1))
}

/// Spawns a background thread that forwards SIGINT/SIGTERM received by this
/// process to the child, escalating to SIGKILL if it lingers.
fn spawn_signal_forwarder(child_pid: Arc<AtomicI32>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let Ok(mut signals) = Signals::new(TERM_SIGNALS) else {
            return;
        };

        if signals.forever().next().is_some() {
            let pid = Pid::from_raw(child_pid.load(Ordering::SeqCst));
            let _ = signal::kill(pid, Signal::SIGTERM);
            std::thread::sleep(Duration::from_secs(5));
            let _ = signal::kill(pid, Signal::SIGKILL);
        }
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_stack_runs_in_reverse_order() {
        use std::sync::{Arc, Mutex};

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::default();

        for i in 0..3 {
            let order = order.clone();
            stack.push(move || order.lock().unwrap().push(i));
        }

        stack.unwind();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }
}
