use std::collections::HashMap;

use super::types::{Node, SchedulerKind};
use crate::tasks::types::Task;

/// Placement policy: filter, score, then pick the lowest score.
pub trait Scheduler: Send + Sync {
    fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes
            .iter()
            .filter(|node| node.fits(task.memory))
            .cloned()
            .collect()
    }

    /// Lower is better. Keyed by node name.
    fn score(&mut self, task: &Task, nodes: &[Node]) -> HashMap<String, f64>;

    fn pick(&self, scores: &HashMap<String, f64>, candidates: &[Node]) -> Option<Node> {
        let mut best: Option<(&Node, f64)> = None;
        for node in candidates {
            let Some(score) = scores.get(&node.name).copied() else {
                continue;
            };
            if best.is_none_or(|(_, best_score)| score < best_score) {
                best = Some((node, score));
            }
        }
        best.map(|(node, _)| node.clone())
    }
}

/// Runs the three scheduling phases for `task`.
pub fn select_worker(scheduler: &mut dyn Scheduler, task: &Task, nodes: &[Node]) -> Option<Node> {
    let candidates = scheduler.select_candidate_nodes(task, nodes);
    if candidates.is_empty() {
        return None;
    }
    let scores = scheduler.score(task, &candidates);
    scheduler.pick(&scores, &candidates)
}

pub fn new_scheduler(kind: SchedulerKind) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::RoundRobin => Box::new(RoundRobin::default()),
        SchedulerKind::LeastLoaded => Box::new(LeastLoaded),
    }
}

/// Hands tasks to the candidates in turn.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next_worker: usize,
}

impl Scheduler for RoundRobin {
    fn score(&mut self, _task: &Task, nodes: &[Node]) -> HashMap<String, f64> {
        let chosen = self.next_worker % nodes.len().max(1);
        self.next_worker = chosen + 1;
        nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name.clone(), if i == chosen { 0.1 } else { 1.0 }))
            .collect()
    }
}

/// Prefers the node with the fewest tasks, then the most free memory.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl Scheduler for LeastLoaded {
    fn score(&mut self, _task: &Task, nodes: &[Node]) -> HashMap<String, f64> {
        nodes
            .iter()
            .map(|node| {
                let memory_load = if node.memory > 0 {
                    node.memory_allocated as f64 / node.memory as f64
                } else {
                    0.0
                };
                (node.name.clone(), node.task_count as f64 + memory_load)
            })
            .collect()
    }
}
