//! 非提交类动作的实现：shell、日志、遥测

use std::sync::Arc;

use crate::cluster::Cluster;
use crate::core::OrchestratorError;
use crate::tools::registry::{ActionArgs, ActionKind};
use crate::tools::telemetry::{read_csv, TelemetrySource, TELEMETRY_NOT_CONFIGURED};

/// 用于按服务名定位 Pod 的标签键
const SERVICE_LABEL_KEYS: &[&str] = &[
    "app",
    "io.kompose.service",
    "app.kubernetes.io/name",
    "app.kubernetes.io/component",
];

const DEFAULT_TELEMETRY_MINUTES: u64 = 5;

/// 动作执行所需的环境
#[derive(Clone)]
pub struct ActionContext {
    pub cluster: Cluster,
    pub telemetry: Option<Arc<dyn TelemetrySource>>,
}

impl ActionContext {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            cluster,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub async fn perform(&self, args: &ActionArgs) -> Result<String, OrchestratorError> {
        match args.kind() {
            ActionKind::ExecShell => {
                let command = args.str("command")?;
                let out = self.cluster.exec(command).await?;
                Ok(out.text().to_string())
            }
            ActionKind::GetLogs => {
                self.service_logs(args.str("namespace")?, args.str("service")?)
                    .await
            }
            ActionKind::GetMetrics | ActionKind::GetTraces => {
                let namespace = args.str("namespace")?;
                let minutes = args.u64_or("duration", DEFAULT_TELEMETRY_MINUTES)?;
                let Some(telemetry) = &self.telemetry else {
                    return Ok(TELEMETRY_NOT_CONFIGURED.to_string());
                };
                let dir = if args.kind() == ActionKind::GetMetrics {
                    telemetry.export_metrics(namespace, minutes).await?
                } else {
                    telemetry.export_traces(namespace, minutes).await?
                };
                Ok(dir.display().to_string())
            }
            ActionKind::ReadMetrics | ActionKind::ReadTraces => {
                if self.telemetry.is_none() {
                    return Ok(TELEMETRY_NOT_CONFIGURED.to_string());
                }
                read_csv(args.str("file_path")?)
            }
            ActionKind::Submit => Err(OrchestratorError::invalid_args(
                "submit",
                "submissions are handled by the orchestrator",
            )),
        }
    }

    async fn service_logs(&self, namespace: &str, service: &str) -> Result<String, OrchestratorError> {
        let pods = self.cluster.client().list_pods(namespace).await?;
        let pod = pods
            .iter()
            .find(|p| {
                SERVICE_LABEL_KEYS
                    .iter()
                    .any(|k| p.labels.get(*k).map(String::as_str) == Some(service))
            })
            .or_else(|| pods.iter().find(|p| p.name.starts_with(service)))
            .ok_or_else(|| {
                OrchestratorError::invalid_args(
                    "get_logs",
                    format!("no pod found for service {service} in namespace {namespace}"),
                )
            })?;
        self.cluster.client().pod_logs(namespace, &pod.name).await
    }
}
