#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use mltask_core::models::{FunctionName, NodeInfo, NodeRole, NodeStats};
    use mltask_core::traits::{ClusterTopology, NodeStatsCollector};
    use mltask_core::{DispatcherConfig, MlResult, MlTaskError};
    use mltask_dispatcher::{LeastLoadedStrategy, NodeDispatcher, RoundRobinStrategy};

    struct MockTopology {
        local: String,
        nodes: Vec<NodeInfo>,
    }

    #[async_trait]
    impl ClusterTopology for MockTopology {
        fn local_node_id(&self) -> &str {
            &self.local
        }

        async fn nodes(&self) -> MlResult<Vec<NodeInfo>> {
            Ok(self.nodes.clone())
        }
    }

    #[derive(Default)]
    struct MockStatsCollector {
        stats: Mutex<HashMap<String, NodeStats>>,
        fail: bool,
        requested: Mutex<Vec<Vec<String>>>,
        calls: AtomicUsize,
    }

    impl MockStatsCollector {
        fn with(stats: Vec<(&str, f64, i64)>) -> Self {
            let map = stats
                .into_iter()
                .map(|(id, heap, executing)| (id.to_string(), NodeStats::new(heap, executing)))
                .collect();
            Self {
                stats: Mutex::new(map),
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl NodeStatsCollector for MockStatsCollector {
        async fn collect_node_stats(
            &self,
            node_ids: &[String],
        ) -> MlResult<HashMap<String, NodeStats>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(node_ids.to_vec());
            if self.fail {
                return Err(MlTaskError::Transport("stats request timed out".to_string()));
            }
            let stats = self.stats.lock().unwrap();
            Ok(stats
                .iter()
                .filter(|(id, _)| node_ids.contains(id))
                .map(|(id, s)| (id.clone(), s.clone()))
                .collect())
        }
    }

    fn topology(nodes: Vec<(&str, Vec<NodeRole>)>) -> Arc<MockTopology> {
        Arc::new(MockTopology {
            local: nodes[0].0.to_string(),
            nodes: nodes
                .into_iter()
                .map(|(id, roles)| NodeInfo::new(id, roles))
                .collect(),
        })
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            max_heap_usage_percent: 85.0,
            max_ml_tasks_per_node: 2,
            ..Default::default()
        }
    }

    fn dispatcher(
        topology: Arc<MockTopology>,
        stats: Arc<MockStatsCollector>,
        config: DispatcherConfig,
    ) -> NodeDispatcher {
        NodeDispatcher::new(topology, stats, Arc::new(LeastLoadedStrategy::new()), config)
    }

    #[tokio::test]
    async fn test_ml_nodes_take_priority() {
        let topology = topology(vec![
            ("data-1", vec![NodeRole::Data]),
            ("ml-1", vec![NodeRole::Ml]),
            ("ml-2", vec![NodeRole::Ml]),
        ]);
        let stats = Arc::new(MockStatsCollector::default());
        let dispatcher = dispatcher(topology, stats, config());

        let eligible = dispatcher.eligible_nodes(FunctionName::Kmeans).await.unwrap();
        assert_eq!(eligible, vec!["ml-1".to_string(), "ml-2".to_string()]);
    }

    #[tokio::test]
    async fn test_data_nodes_used_without_ml_nodes() {
        let topology = topology(vec![
            ("data-1", vec![NodeRole::Data]),
            ("manager", vec![NodeRole::ClusterManager]),
            ("data-2", vec![NodeRole::Data, NodeRole::Ingest]),
        ]);
        let stats = Arc::new(MockStatsCollector::default());
        let dispatcher = dispatcher(topology, stats, config());

        let eligible = dispatcher.eligible_nodes(FunctionName::Kmeans).await.unwrap();
        assert_eq!(eligible, vec!["data-1".to_string(), "data-2".to_string()]);
    }

    #[tokio::test]
    async fn test_only_run_on_ml_node_without_ml_nodes() {
        let topology = topology(vec![("data-1", vec![NodeRole::Data])]);
        let stats = Arc::new(MockStatsCollector::default());
        let config = DispatcherConfig {
            only_run_on_ml_node: true,
            ..config()
        };
        let dispatcher = dispatcher(topology, stats, config);

        let err = dispatcher.dispatch(FunctionName::Kmeans, None).await.unwrap_err();
        assert!(matches!(err, MlTaskError::DispatchFailed(_)));
    }

    #[tokio::test]
    async fn test_dispatch_picks_least_loaded_node() {
        let topology = topology(vec![
            ("node-1", vec![NodeRole::Data]),
            ("node-2", vec![NodeRole::Data]),
            ("node-3", vec![NodeRole::Data]),
        ]);
        let stats = Arc::new(MockStatsCollector::with(vec![
            ("node-1", 40.0, 1),
            ("node-2", 90.0, 0),
            ("node-3", 50.0, 0),
        ]));
        let dispatcher = dispatcher(topology, stats, config());

        let selected = dispatcher.dispatch(FunctionName::Kmeans, None).await.unwrap();
        // node-2 超过堆内存阈值，node-3 执行中任务最少
        assert_eq!(selected, "node-3");
    }

    #[tokio::test]
    async fn test_all_nodes_over_heap_limit() {
        let topology = topology(vec![
            ("node-1", vec![NodeRole::Data]),
            ("node-2", vec![NodeRole::Data]),
        ]);
        let stats = Arc::new(MockStatsCollector::with(vec![
            ("node-1", 86.0, 0),
            ("node-2", 99.0, 0),
        ]));
        let dispatcher = dispatcher(topology, stats, config());

        let err = dispatcher.dispatch(FunctionName::Kmeans, None).await.unwrap_err();
        assert!(err.is_resource_exhausted());
        assert!(err
            .to_string()
            .contains("Memory exceeds limitation, no eligible node available"));
    }

    #[tokio::test]
    async fn test_all_nodes_over_task_limit() {
        let topology = topology(vec![
            ("node-1", vec![NodeRole::Data]),
            ("node-2", vec![NodeRole::Data]),
        ]);
        let stats = Arc::new(MockStatsCollector::with(vec![
            ("node-1", 10.0, 2),
            ("node-2", 10.0, 5),
        ]));
        let dispatcher = dispatcher(topology, stats, config());

        let err = dispatcher.dispatch(FunctionName::Kmeans, None).await.unwrap_err();
        assert!(matches!(err, MlTaskError::LimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_stats_failure_becomes_dispatch_failure() {
        let topology = topology(vec![("node-1", vec![NodeRole::Data])]);
        let stats = Arc::new(MockStatsCollector::failing());
        let dispatcher = dispatcher(topology, stats, config());

        let err = dispatcher.dispatch(FunctionName::Kmeans, None).await.unwrap_err();
        assert!(matches!(err, MlTaskError::DispatchFailed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_dispatch_restricted_to_candidate_nodes() {
        let topology = topology(vec![
            ("node-1", vec![NodeRole::Ml]),
            ("node-2", vec![NodeRole::Ml]),
        ]);
        let stats = Arc::new(MockStatsCollector::with(vec![
            ("node-1", 10.0, 0),
            ("node-2", 20.0, 1),
        ]));
        let dispatcher = dispatcher(topology, stats.clone(), config());

        let candidates = vec!["node-2".to_string()];
        let selected = dispatcher
            .dispatch(FunctionName::Remote, Some(&candidates))
            .await
            .unwrap();
        assert_eq!(selected, "node-2");
        assert_eq!(stats.requested.lock().unwrap()[0], candidates);
    }

    #[tokio::test]
    async fn test_dispatch_task_prefers_local_node() {
        let topology = topology(vec![
            ("local", vec![NodeRole::Data]),
            ("remote", vec![NodeRole::Data]),
        ]);
        let stats = Arc::new(MockStatsCollector::with(vec![
            ("local", 80.0, 1),
            ("remote", 10.0, 0),
        ]));
        let dispatcher = NodeDispatcher::new(
            topology,
            stats.clone(),
            Arc::new(RoundRobinStrategy::new()),
            config(),
        );

        let selected = dispatcher
            .dispatch_task(FunctionName::LocalSampleCalculator, false)
            .await
            .unwrap();
        assert_eq!(selected, "local");
        assert!(dispatcher.is_local(&selected));
        assert_eq!(stats.calls.load(Ordering::SeqCst), 0);

        let selected = dispatcher
            .dispatch_task(FunctionName::LocalSampleCalculator, true)
            .await
            .unwrap();
        assert_eq!(stats.calls.load(Ordering::SeqCst), 1);
        assert!(selected == "local" || selected == "remote");
    }

    #[tokio::test]
    async fn test_from_config_rejects_unknown_strategy() {
        let topology = topology(vec![("node-1", vec![NodeRole::Data])]);
        let stats = Arc::new(MockStatsCollector::default());
        let config = DispatcherConfig {
            dispatch_strategy: "random".to_string(),
            ..config()
        };

        let result = NodeDispatcher::from_config(topology, stats, config);
        assert!(matches!(result, Err(MlTaskError::Configuration(_))));
    }
}
