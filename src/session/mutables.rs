//! 可变资源集合
//!
//! 记录故障注入实际触碰、因而允许 Agent 修改/删除的集群对象（"pod/x"、"service/y"、"namespace/z"）。
//! 只做并集；循环开始前 freeze，之后任何写入都会被拒绝。

use std::collections::BTreeSet;

use crate::session::SessionError;

/// kubectl 资源类型别名 -> 规范单数名
pub fn canonical_kind(kind: &str) -> String {
    let kind = kind.trim().to_lowercase();
    // deployment.apps / deployments.apps/v1 之类只保留资源名
    let base = kind.split('.').next().unwrap_or("");
    let canonical = match base {
        "po" | "pod" | "pods" => "pod",
        "svc" | "service" | "services" => "service",
        "deploy" | "deployment" | "deployments" => "deployment",
        "ns" | "namespace" | "namespaces" => "namespace",
        "cm" | "configmap" | "configmaps" => "configmap",
        "secret" | "secrets" => "secret",
        "sts" | "statefulset" | "statefulsets" => "statefulset",
        "ds" | "daemonset" | "daemonsets" => "daemonset",
        "rs" | "replicaset" | "replicasets" => "replicaset",
        "pvc" | "persistentvolumeclaim" | "persistentvolumeclaims" => "persistentvolumeclaim",
        "pv" | "persistentvolume" | "persistentvolumes" => "persistentvolume",
        "job" | "jobs" => "job",
        "cj" | "cronjob" | "cronjobs" => "cronjob",
        "no" | "node" | "nodes" => "node",
        "sa" | "serviceaccount" | "serviceaccounts" => "serviceaccount",
        "ing" | "ingress" | "ingresses" => "ingress",
        "hpa" | "horizontalpodautoscaler" | "horizontalpodautoscalers" => "horizontalpodautoscaler",
        other => other,
    };
    canonical.to_string()
}

/// "svc/user-service" -> "service/user-service"；不含 '/' 的原样（trim 后）返回
pub fn normalize_ref(reference: &str) -> String {
    let reference = reference.trim();
    match reference.split_once('/') {
        Some((kind, name)) => format!("{}/{}", canonical_kind(kind), name.trim()),
        None => reference.to_string(),
    }
}

#[derive(Clone, Debug, Default)]
pub struct MutableSet {
    items: BTreeSet<String>,
    frozen: bool,
}

impl MutableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 并入一批引用（规范化后）；返回新增数量
    pub fn extend<I, S>(&mut self, refs: I) -> Result<usize, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.frozen {
            return Err(SessionError::MutablesFrozen);
        }
        let before = self.items.len();
        self.items.extend(
            refs.into_iter()
                .map(|r| normalize_ref(r.as_ref()))
                .filter(|r| !r.is_empty()),
        );
        Ok(self.items.len() - before)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.items.contains(&normalize_ref(reference))
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 结果文件中的表示：逗号分隔
    pub fn joined(&self) -> String {
        self.items.iter().cloned().collect::<Vec<_>>().join(",")
    }
}
