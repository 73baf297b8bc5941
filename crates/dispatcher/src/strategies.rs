//! 路由策略
//!
//! 对在线执行器集合的纯选择函数。所有策略先过滤
//! 在线 ∧ current_load < max_concurrent 的节点，过滤后为空返回
//! `NoAvailableExecutor`。分片广播不是选择策略，由调度服务展开
//! 后逐分片走轮询。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use rand::Rng;
use tracing::debug;

use cronplane_domain::{ExecutorNode, RouteStrategy};
use cronplane_errors::{SchedulerError, SchedulerResult};

/// 一致性哈希每个执行器的虚拟节点数
const HASH_REPLICAS: usize = 100;

pub trait Strategy: Send + Sync {
    fn select(&self, candidates: &[ExecutorNode], param: &str) -> SchedulerResult<ExecutorNode>;
    fn name(&self) -> &'static str;
}

fn filter_available(candidates: &[ExecutorNode]) -> Vec<&ExecutorNode> {
    candidates
        .iter()
        .filter(|node| node.is_online() && !node.is_overloaded())
        .collect()
}

// ============================================================================
// 轮询
// ============================================================================

#[derive(Default)]
pub struct RoundRobinStrategy {
    counter: AtomicU64,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobinStrategy {
    fn select(&self, candidates: &[ExecutorNode], _param: &str) -> SchedulerResult<ExecutorNode> {
        let available = filter_available(candidates);
        if available.is_empty() {
            return Err(SchedulerError::NoAvailableExecutor);
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) as usize % available.len();
        debug!("轮询策略选中节点 {} ({}/{})", available[index].id, index, available.len());
        Ok(available[index].clone())
    }

    fn name(&self) -> &'static str {
        "RoundRobin"
    }
}

// ============================================================================
// 随机
// ============================================================================

#[derive(Default)]
pub struct RandomStrategy;

impl Strategy for RandomStrategy {
    fn select(&self, candidates: &[ExecutorNode], _param: &str) -> SchedulerResult<ExecutorNode> {
        let available = filter_available(candidates);
        if available.is_empty() {
            return Err(SchedulerError::NoAvailableExecutor);
        }
        let index = rand::thread_rng().gen_range(0..available.len());
        Ok(available[index].clone())
    }

    fn name(&self) -> &'static str {
        "Random"
    }
}

// ============================================================================
// 一致性哈希
// ============================================================================

/// 每次调用按过滤后的集合重建哈希环。单个任务组的节点数有限，
/// 重建成本可接受
#[derive(Default)]
pub struct ConsistentHashStrategy;

impl Strategy for ConsistentHashStrategy {
    fn select(&self, candidates: &[ExecutorNode], param: &str) -> SchedulerResult<ExecutorNode> {
        let available = filter_available(candidates);
        if available.is_empty() {
            return Err(SchedulerError::NoAvailableExecutor);
        }

        let mut ring: Vec<(u32, usize)> = Vec::with_capacity(available.len() * HASH_REPLICAS);
        for (index, node) in available.iter().enumerate() {
            for replica in 0..HASH_REPLICAS {
                let hash = crc32fast::hash(format!("{}{}", node.id, replica).as_bytes());
                ring.push((hash, index));
            }
        }
        ring.sort_unstable_by_key(|(hash, _)| *hash);

        // 顺时针找第一个不小于 param 哈希的虚拟节点，末尾回绕
        let target = crc32fast::hash(param.as_bytes());
        let position = ring.partition_point(|(hash, _)| *hash < target);
        let (_, index) = ring[position % ring.len()];
        Ok(available[index].clone())
    }

    fn name(&self) -> &'static str {
        "ConsistentHash"
    }
}

// ============================================================================
// 最少使用
// ============================================================================

#[derive(Default)]
pub struct LfuStrategy;

impl Strategy for LfuStrategy {
    fn select(&self, candidates: &[ExecutorNode], _param: &str) -> SchedulerResult<ExecutorNode> {
        let available = filter_available(candidates);
        if available.is_empty() {
            return Err(SchedulerError::NoAvailableExecutor);
        }
        // min_by_key 稳定，负载并列时保持先见顺序
        let node = available
            .iter()
            .min_by_key(|node| node.current_load)
            .expect("过滤后集合非空");
        Ok((*node).clone())
    }

    fn name(&self) -> &'static str {
        "LeastFrequentlyUsed"
    }
}

// ============================================================================
// 最近最少使用
// ============================================================================

pub struct LruStrategy {
    last_used: Mutex<HashMap<String, Instant>>,
}

impl Default for LruStrategy {
    fn default() -> Self {
        Self {
            last_used: Mutex::new(HashMap::new()),
        }
    }
}

impl Strategy for LruStrategy {
    fn select(&self, candidates: &[ExecutorNode], _param: &str) -> SchedulerResult<ExecutorNode> {
        let available = filter_available(candidates);
        if available.is_empty() {
            return Err(SchedulerError::NoAvailableExecutor);
        }

        let mut last_used = self.last_used.lock().unwrap();
        // 没出现过的节点视为"无限久未使用"，优先选中
        let node = available
            .iter()
            .find(|node| !last_used.contains_key(&node.id))
            .or_else(|| {
                available
                    .iter()
                    .min_by_key(|node| last_used.get(&node.id).copied())
            })
            .expect("过滤后集合非空");

        last_used.insert(node.id.clone(), Instant::now());
        Ok((*node).clone())
    }

    fn name(&self) -> &'static str {
        "LeastRecentlyUsed"
    }
}

// ============================================================================
// 故障转移
// ============================================================================

#[derive(Default)]
pub struct FailoverStrategy;

impl Strategy for FailoverStrategy {
    fn select(&self, candidates: &[ExecutorNode], _param: &str) -> SchedulerResult<ExecutorNode> {
        let mut sorted: Vec<&ExecutorNode> = candidates.iter().collect();
        sorted.sort_by(|a, b| b.weight.cmp(&a.weight));

        sorted
            .into_iter()
            .find(|node| node.is_online() && !node.is_overloaded())
            .cloned()
            .ok_or(SchedulerError::NoAvailableExecutor)
    }

    fn name(&self) -> &'static str {
        "Failover"
    }
}

// ============================================================================
// 策略路由器
// ============================================================================

/// 持有各策略的单例，轮询计数器与 LRU 记录在副本内存中存续
pub struct StrategyRouter {
    round_robin: RoundRobinStrategy,
    random: RandomStrategy,
    consistent_hash: ConsistentHashStrategy,
    lfu: LfuStrategy,
    lru: LruStrategy,
    failover: FailoverStrategy,
}

impl Default for StrategyRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRouter {
    pub fn new() -> Self {
        Self {
            round_robin: RoundRobinStrategy::new(),
            random: RandomStrategy,
            consistent_hash: ConsistentHashStrategy,
            lfu: LfuStrategy,
            lru: LruStrategy::default(),
            failover: FailoverStrategy,
        }
    }

    pub fn select(
        &self,
        strategy: RouteStrategy,
        candidates: &[ExecutorNode],
        param: &str,
    ) -> SchedulerResult<ExecutorNode> {
        let strategy: &dyn Strategy = match strategy {
            RouteStrategy::RoundRobin => &self.round_robin,
            RouteStrategy::Random => &self.random,
            RouteStrategy::ConsistentHash => &self.consistent_hash,
            RouteStrategy::LeastFrequentlyUsed => &self.lfu,
            RouteStrategy::LeastRecentlyUsed => &self.lru,
            RouteStrategy::Failover => &self.failover,
            // 分片广播逐分片独立路由，落到轮询
            RouteStrategy::ShardingBroadcast => &self.round_robin,
        };
        strategy.select(candidates, param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronplane_domain::ExecutorStatus;

    fn node(id: &str, load: i32, max: i32, weight: i32) -> ExecutorNode {
        let mut node = ExecutorNode::new(1, "demo".into(), "10.0.0.1".into(), 8080, max);
        node.id = id.to_string();
        node.current_load = load;
        node.weight = weight;
        node
    }

    fn offline(mut n: ExecutorNode) -> ExecutorNode {
        n.status = ExecutorStatus::Offline;
        n
    }

    #[test]
    fn test_filter_excludes_offline_and_overloaded() {
        let nodes = vec![
            node("a", 0, 10, 100),
            offline(node("b", 0, 10, 100)),
            node("c", 10, 10, 100),
        ];
        let available = filter_available(&nodes);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "a");
    }

    #[test]
    fn test_empty_candidates() {
        let router = StrategyRouter::new();
        for strategy in [
            RouteStrategy::RoundRobin,
            RouteStrategy::Random,
            RouteStrategy::ConsistentHash,
            RouteStrategy::LeastFrequentlyUsed,
            RouteStrategy::LeastRecentlyUsed,
            RouteStrategy::Failover,
        ] {
            let err = router.select(strategy, &[], "").unwrap_err();
            assert!(matches!(err, SchedulerError::NoAvailableExecutor));
        }
    }

    #[test]
    fn test_round_robin_cycles() {
        let strategy = RoundRobinStrategy::new();
        let nodes = vec![node("a", 0, 10, 100), node("b", 0, 10, 100), node("c", 0, 10, 100)];

        let picks: Vec<String> = (0..6)
            .map(|_| strategy.select(&nodes, "").unwrap().id)
            .collect();
        assert_eq!(picks[0..3], picks[3..6]);
        // 三次内每个节点都被选中一次
        let mut first_round = picks[0..3].to_vec();
        first_round.sort();
        assert_eq!(first_round, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_consistent_hash_is_stable() {
        let strategy = ConsistentHashStrategy;
        let nodes = vec![node("a", 0, 10, 100), node("b", 0, 10, 100), node("c", 0, 10, 100)];

        let first = strategy.select(&nodes, "order-42").unwrap().id;
        for _ in 0..10 {
            assert_eq!(strategy.select(&nodes, "order-42").unwrap().id, first);
        }
        // 与节点顺序无关
        let reversed: Vec<ExecutorNode> = nodes.iter().rev().cloned().collect();
        assert_eq!(strategy.select(&reversed, "order-42").unwrap().id, first);
    }

    #[test]
    fn test_lfu_picks_least_loaded() {
        let strategy = LfuStrategy;
        let nodes = vec![node("a", 5, 10, 100), node("b", 2, 10, 100), node("c", 8, 10, 100)];
        assert_eq!(strategy.select(&nodes, "").unwrap().id, "b");

        // 并列时保持先见顺序
        let tied = vec![node("x", 3, 10, 100), node("y", 3, 10, 100)];
        assert_eq!(strategy.select(&tied, "").unwrap().id, "x");
    }

    #[test]
    fn test_lru_prefers_unseen_then_oldest() {
        let strategy = LruStrategy::default();
        let nodes = vec![node("a", 0, 10, 100), node("b", 0, 10, 100)];

        let first = strategy.select(&nodes, "").unwrap().id;
        let second = strategy.select(&nodes, "").unwrap().id;
        assert_ne!(first, second, "未见过的节点优先");

        // 两个都见过后，轮换选择最久未用的
        let third = strategy.select(&nodes, "").unwrap().id;
        assert_eq!(third, first);
    }

    #[test]
    fn test_failover_honors_weight() {
        let strategy = FailoverStrategy;
        let nodes = vec![
            node("low", 0, 10, 10),
            node("high", 0, 10, 200),
            node("mid", 0, 10, 100),
        ];
        assert_eq!(strategy.select(&nodes, "").unwrap().id, "high");

        // 高权重节点过载时落到次高
        let nodes = vec![
            node("low", 0, 10, 10),
            node("high", 10, 10, 200),
            node("mid", 0, 10, 100),
        ];
        assert_eq!(strategy.select(&nodes, "").unwrap().id, "mid");
    }
}
