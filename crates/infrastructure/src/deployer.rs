use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use mltask_core::traits::{ClusterTopology, ModelDeployer, ModelStore};
use mltask_core::{MlResult, MlTaskError};

/// 记录模型加载位置的部署器
///
/// 只接受模型存储中已注册的模型，目标节点必须在当前拓扑中。
pub struct InMemoryModelDeployer {
    model_store: Arc<dyn ModelStore>,
    topology: Arc<dyn ClusterTopology>,
    deployments: DashMap<String, Vec<String>>,
}

impl InMemoryModelDeployer {
    pub fn new(model_store: Arc<dyn ModelStore>, topology: Arc<dyn ClusterTopology>) -> Self {
        Self {
            model_store,
            topology,
            deployments: DashMap::new(),
        }
    }

    pub fn undeploy(&self, model_id: &str) -> Vec<String> {
        self.deployments
            .remove(model_id)
            .map(|(_, nodes)| nodes)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelDeployer for InMemoryModelDeployer {
    async fn deployed_nodes(&self, model_id: &str) -> MlResult<Vec<String>> {
        Ok(self
            .deployments
            .get(model_id)
            .map(|nodes| nodes.clone())
            .unwrap_or_default())
    }

    async fn deploy_model(&self, model_id: &str, target_nodes: &[String]) -> MlResult<Vec<String>> {
        if self.model_store.get_model(model_id).await?.is_none() {
            return Err(MlTaskError::ModelNotFound {
                model_id: model_id.to_string(),
            });
        }

        let live: HashSet<String> = self
            .topology
            .nodes()
            .await?
            .into_iter()
            .map(|node| node.id)
            .collect();
        let (loaded, skipped): (Vec<String>, Vec<String>) = target_nodes
            .iter()
            .cloned()
            .partition(|node_id| live.contains(node_id));
        if !skipped.is_empty() {
            warn!("模型 {} 跳过不在线的节点 {:?}", model_id, skipped);
        }

        let mut entry = self.deployments.entry(model_id.to_string()).or_default();
        for node_id in &loaded {
            if !entry.contains(node_id) {
                entry.push(node_id.clone());
            }
        }
        info!("模型 {} 已加载到 {:?}", model_id, loaded);
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::StaticTopology;
    use crate::memory_store::InMemoryModelStore;
    use mltask_core::models::{FunctionName, MlModel, NodeInfo, NodeRole};

    fn deployer() -> (InMemoryModelDeployer, String) {
        let store = Arc::new(InMemoryModelStore::new());
        let model_id = store.register(MlModel::new("remote", FunctionName::Remote, None));
        let topology = Arc::new(StaticTopology::new(
            "node-1",
            vec![
                NodeInfo::new("node-1", vec![NodeRole::Ml]),
                NodeInfo::new("node-2", vec![NodeRole::Ml]),
            ],
        ));
        (InMemoryModelDeployer::new(store, topology), model_id)
    }

    #[tokio::test]
    async fn test_deploy_only_to_live_nodes() {
        let (deployer, model_id) = deployer();

        let loaded = deployer
            .deploy_model(&model_id, &["node-1".to_string(), "node-9".to_string()])
            .await
            .unwrap();

        assert_eq!(loaded, vec!["node-1".to_string()]);
        assert_eq!(deployer.deployed_nodes(&model_id).await.unwrap(), loaded);

        deployer
            .deploy_model(&model_id, &["node-1".to_string(), "node-2".to_string()])
            .await
            .unwrap();
        assert_eq!(deployer.deployed_nodes(&model_id).await.unwrap().len(), 2);

        assert_eq!(deployer.undeploy(&model_id).len(), 2);
        assert!(deployer.deployed_nodes(&model_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_unknown_model() {
        let (deployer, _) = deployer();
        let result = deployer.deploy_model("missing", &["node-1".to_string()]).await;
        assert!(matches!(result, Err(MlTaskError::ModelNotFound { .. })));
    }
}
