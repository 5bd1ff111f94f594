//! Host capability detection
//!
//! Everything the host executor needs to know about the machine it runs on
//! goes through `EnvironmentProbe`, so tests can swap in a fake.

use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Questions the host executor asks about its environment
pub trait EnvironmentProbe: Send + Sync {
    /// True when this process already runs inside a disposable container
    fn is_containerized(&self) -> bool;

    /// Resolve an executable on PATH
    fn find_executable(&self, name: &str) -> Option<PathBuf>;

    /// True when `python -m pip` works for this interpreter. Blocking.
    fn has_pip(&self, python: &Path) -> bool;
}

/// Probe backed by the real filesystem and PATH
#[derive(Debug, Clone, Default)]
pub struct SystemProbe;

const CGROUP_MARKERS: [&str; 4] = ["docker", "kubepods", "containerd", "libpod"];

impl SystemProbe {
    pub fn new() -> Self {
        SystemProbe
    }
}

impl EnvironmentProbe for SystemProbe {
    fn is_containerized(&self) -> bool {
        if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
            return true;
        }
        if std::env::var_os("container").is_some() {
            return true;
        }
        std::fs::read_to_string("/proc/1/cgroup")
            .map(|cgroup| cgroup_indicates_container(&cgroup))
            .unwrap_or(false)
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn has_pip(&self, python: &Path) -> bool {
        std::process::Command::new(python)
            .args(["-m", "pip", "--version"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

fn cgroup_indicates_container(cgroup: &str) -> bool {
    cgroup
        .lines()
        .any(|line| CGROUP_MARKERS.iter().any(|marker| line.contains(marker)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cgroup_markers() {
        assert!(cgroup_indicates_container(
            "12:memory:/docker/3f2a1b\n11:cpu:/docker/3f2a1b"
        ));
        assert!(cgroup_indicates_container("0::/kubepods/besteffort/pod1"));
        assert!(!cgroup_indicates_container("0::/init.scope\n1:name=systemd:/"));
    }

    #[test]
    fn test_find_missing_executable() {
        let probe = SystemProbe::new();
        assert!(probe
            .find_executable("pyrun-definitely-not-an-executable")
            .is_none());
    }

    #[test]
    fn test_has_pip_is_false_for_missing_interpreter() {
        let probe = SystemProbe::new();
        assert!(!probe.has_pip(Path::new("/nonexistent/python3")));
    }
}
