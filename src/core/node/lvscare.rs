//! Static pod that keeps the API server VIP's IPVS rules in sync on workers.

use serde_json::json;

use super::commands::API_SERVER_PORT;
use crate::error::{Error, Result};

pub const DEFAULT_IMAGE: &str = "fanux/lvscare:latest";

pub fn static_pod_yaml(vip: &str, masters: &[String], image: &str) -> Result<String> {
    let image = if image.is_empty() { DEFAULT_IMAGE } else { image };

    let mut command = vec![
        "/usr/bin/lvscare".to_string(),
        "care".to_string(),
        "--vs".to_string(),
        format!("{}:{}", vip, API_SERVER_PORT),
        "--health-path".to_string(),
        "/healthz".to_string(),
        "--health-schem".to_string(),
        "https".to_string(),
    ];
    for master in masters {
        command.push("--rs".to_string());
        command.push(format!("{}:{}", master, API_SERVER_PORT));
    }

    let pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "kube-lvscare",
            "namespace": "kube-system",
            "labels": { "component": "kube-lvscare", "tier": "control-plane" }
        },
        "spec": {
            "hostNetwork": true,
            "priorityClassName": "system-node-critical",
            "containers": [{
                "name": "kube-lvscare",
                "image": image,
                "imagePullPolicy": "IfNotPresent",
                "command": command,
                "securityContext": { "privileged": true },
                "volumeMounts": [{
                    "name": "lib-modules",
                    "mountPath": "/lib/modules",
                    "readOnly": true
                }]
            }],
            "volumes": [{
                "name": "lib-modules",
                "hostPath": { "path": "/lib/modules" }
            }]
        }
    });

    serde_yml::to_string(&pod)
        .map_err(|e| Error::internal_unexpected(format!("render lvscare pod: {}", e)))
}
