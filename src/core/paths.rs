use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

fn home() -> Result<PathBuf> {
    let home = env::var("HOME").map_err(|_| {
        Error::internal_unexpected("HOME environment variable not set".to_string())
    })?;
    Ok(PathBuf::from(home))
}

/// User config directory (~/.config/converge/)
pub fn converge() -> Result<PathBuf> {
    Ok(home()?.join(".config").join("converge"))
}

/// Global converge.json defaults file path
pub fn converge_json() -> Result<PathBuf> {
    Ok(converge()?.join("converge.json"))
}

/// Per-cluster work directory (~/.converge/<cluster>/)
pub fn cluster_dir(cluster_name: &str) -> Result<PathBuf> {
    Ok(home()?.join(".converge").join(cluster_name))
}

/// Persisted cluster file for a named cluster
pub fn cluster_file(cluster_name: &str) -> Result<PathBuf> {
    Ok(cluster_dir(cluster_name)?.join("Clusterfile"))
}

/// Directory a cluster's rootfs is unpacked into, both locally and on every host.
pub fn cluster_rootfs(rootfs_base: &str, cluster_name: &str) -> String {
    format!("{}/{}/rootfs", rootfs_base.trim_end_matches('/'), cluster_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_rootfs_ignores_trailing_slash() {
        assert_eq!(
            cluster_rootfs("/var/lib/converge/data/", "prod"),
            "/var/lib/converge/data/prod/rootfs"
        );
    }
}
