//! Per-host environment substitution for plugin and guest commands.

use std::collections::BTreeMap;

use crate::cluster::Cluster;
use crate::utils::{shell, template};

/// Render `{{KEY}}` placeholders from the host's env and prefix the
/// command with `export KEY=VALUE && ...` so scripts see the same values.
pub fn wrap_command(cluster: &Cluster, ip: &str, command: &str) -> String {
    wrap_with(&cluster.env_for(ip), command)
}

pub fn wrap_with(env: &BTreeMap<String, String>, command: &str) -> String {
    if env.is_empty() {
        return command.to_string();
    }

    let rendered = template::render_map(command, env);
    let exports = env
        .iter()
        .map(|(key, value)| format!("{}={}", key, shell::quote_arg(value)))
        .collect::<Vec<_>>()
        .join(" ");

    format!("export {} && {}", exports, rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Host, MASTER};

    #[test]
    fn empty_env_leaves_command_untouched() {
        assert_eq!(wrap_with(&BTreeMap::new(), "uptime"), "uptime");
    }

    #[test]
    fn exports_sorted_and_placeholders_rendered() {
        let mut group = Host::new(vec!["10.0.0.2".to_string()], vec![MASTER.to_string()]);
        group.env = vec!["ZONE=b".to_string()];
        let mut cluster = Cluster::new("c", "img", vec![group]);
        cluster.spec.env = vec!["NAME=my app".to_string(), "ZONE=a".to_string()];

        let wrapped = wrap_command(&cluster, "10.0.0.2", "echo {{ZONE}} > /tmp/zone");
        assert_eq!(
            wrapped,
            "export NAME='my app' ZONE=b && echo b > /tmp/zone"
        );
    }
}
