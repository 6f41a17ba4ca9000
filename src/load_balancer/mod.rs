// src/load_balancer/mod.rs
mod algorithm;
mod balancer;
mod basic;
mod least_connections;
mod least_latency;
mod round_robin;

pub use algorithm::LoadBalancer; // trait
pub use balancer::Balancer;
pub use basic::BasicBalancer;
pub use least_connections::LeastConnectionsBalancer;
pub use least_latency::LeastLatencyBalancer;
pub use round_robin::RoundRobinBalancer;
pub use crate::config::LoadBalancerAlgorithm;

use std::sync::Arc;

pub fn create_load_balancer(algorithm: LoadBalancerAlgorithm) -> Arc<dyn LoadBalancer> {
    match algorithm {
        LoadBalancerAlgorithm::Basic => Arc::new(BasicBalancer::new()),
        LoadBalancerAlgorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        LoadBalancerAlgorithm::LeastConnections => Arc::new(LeastConnectionsBalancer::new()),
        LoadBalancerAlgorithm::LeastLatency => Arc::new(LeastLatencyBalancer::new()),
        reserved @ (LoadBalancerAlgorithm::WeightedRoundRobin | LoadBalancerAlgorithm::Random) => {
            tracing::warn!(
                "Load balancing algorithm {:?} is not implemented, falling back to round robin",
                reserved
            );
            Arc::new(RoundRobinBalancer::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_algorithm_builds_its_own_strategy() {
        let cases = [
            (LoadBalancerAlgorithm::Basic, "basic"),
            (LoadBalancerAlgorithm::RoundRobin, "round_robin"),
            (LoadBalancerAlgorithm::LeastConnections, "least_connections"),
            (LoadBalancerAlgorithm::LeastLatency, "least_latency"),
            (LoadBalancerAlgorithm::WeightedRoundRobin, "round_robin"),
            (LoadBalancerAlgorithm::Random, "round_robin"),
        ];
        for (algorithm, name) in cases {
            assert_eq!(create_load_balancer(algorithm).name(), name);
        }
    }
}
