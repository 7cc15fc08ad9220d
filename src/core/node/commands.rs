//! Remote shell commands issued while joining and deleting nodes.

use crate::utils::shell;

pub const API_SERVER_PORT: u16 = 6443;
pub const LVSCARE_MANIFEST: &str = "/etc/kubernetes/manifests/kube-lvscare.yaml";
pub const ROUTE_OK: &str = "ok";

pub const STATIC_POD_MKDIR: &str = "mkdir -p /etc/kubernetes/manifests";
pub const REMOVE_KUBE_CONFIG: &str = "rm -rf /usr/bin/kube* && rm -rf ~/.kube/";
pub const CGROUP_DRIVER_PROBE: &str = "docker info 2>/dev/null | grep 'Cgroup Driver' || true";
pub const JOIN_COMMAND_PRINT: &str = "kubeadm token create --print-join-command";
pub const UPLOAD_CERTS: &str = "kubeadm init phase upload-certs --upload-certs";
pub const LIST_NODES_WIDE: &str = "kubectl get nodes -o wide --no-headers";

/// Append `<ip> <name>` to /etc/hosts unless the entry is already present.
pub fn add_etc_host(ip: &str, name: &str) -> String {
    let entry = format!("{} {}", ip, name);
    format!(
        "cat /etc/hosts |grep '{}' || echo '{}' >> /etc/hosts",
        shell::escape_single_quote_content(&entry),
        shell::escape_single_quote_content(&entry)
    )
}

/// Drop every /etc/hosts line matching `pattern`.
pub fn remove_etc_host(pattern: &str) -> String {
    format!("echo \"$(sed '/{}/d' /etc/hosts)\" > /etc/hosts", pattern)
}

pub fn docker_login(registry: &str, username: &str, password: &str) -> String {
    format!(
        "docker login {} -u {} -p {}",
        registry,
        shell::quote_arg(username),
        shell::quote_arg(password)
    )
}

pub fn route_check(ip: &str) -> String {
    format!("seautil route check --host {}", ip)
}

pub fn route_add(vip: &str, gateway: &str) -> String {
    format!("seautil route add --host {} --gateway {}", vip, gateway)
}

pub fn route_del(vip: &str, gateway: &str) -> String {
    format!(
        "if command -v seautil > /dev/null 2>&1; then seautil route del --host {} --gateway {}; fi",
        vip, gateway
    )
}

/// Install the IPVS virtual server for the API server VIP, once.
pub fn ipvs_add(vip: &str, masters: &[String]) -> String {
    let real_servers = masters
        .iter()
        .map(|m| format!("--rs {}:{}", m, API_SERVER_PORT))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "seautil ipvs --vs {}:{} {} --health-path /healthz --health-schem https --run-once",
        vip, API_SERVER_PORT, real_servers
    )
}

pub fn join_config_path(rootfs: &str) -> String {
    format!("{}/etc/kubeadm.yml", rootfs)
}

pub fn kubeadm_join(rootfs: &str, verbosity: u8) -> String {
    format!(
        "kubeadm join --config={}{}",
        join_config_path(rootfs),
        verbosity_flag(verbosity)
    )
}

/// Reset kubeadm state and remove kubelet, CNI and etcd artifacts.
pub fn clean_node(verbosity: u8) -> String {
    format!(
        "if which kubeadm > /dev/null 2>&1; then kubeadm reset -f{}; fi && \
modprobe -r ipip && lsmod && \
rm -rf /etc/kubernetes/ && \
rm -rf /etc/systemd/system/kubelet.service.d && rm -rf /etc/systemd/system/kubelet.service && \
rm -rf /usr/bin/kubeadm && rm -rf /usr/bin/kubelet-pre-start.sh && \
rm -rf /usr/bin/kubelet && rm -rf /usr/bin/crictl && \
rm -rf /etc/cni && rm -rf /opt/cni && \
rm -rf /var/lib/etcd && rm -rf /var/etcd",
        verbosity_flag(verbosity)
    )
}

pub fn kubectl_delete_node(hostname: &str) -> String {
    format!("kubectl delete node {}", hostname)
}

fn verbosity_flag(verbosity: u8) -> String {
    if verbosity == 0 {
        String::new()
    } else {
        format!(" -v {}", verbosity)
    }
}
