//! 内置的参考故障场景

pub mod noop;
pub mod scale_to_zero;
pub mod target_port;

pub use noop::NoopScenario;
pub use scale_to_zero::ScaleToZero;
pub use target_port::TargetPortMisconfig;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::cluster::{Cluster, KubectlClient, ScriptedRunner};
    use crate::config::ClusterSection;

    pub fn scripted_cluster(runner: Arc<ScriptedRunner>) -> Cluster {
        let client = Arc::new(KubectlClient::new(runner.clone(), "kubectl"));
        Cluster::new(runner, client, ClusterSection::default())
    }
}
