//! Monitor - 一つの作業単位の階層的な時間・メモリ計測
//!
//! ツリーは arena 構造: ノードは `Vec` に並び、互いを index で参照する
//! （root は index 0）。monitor は呼び出し側で作られ、envelope に入って
//! worker に渡り、task の実行中に埋められ、結果と一緒に戻ってきて呼び出し側の
//! monitor にマージされる。wire から来たツリーは index を検証してから使う。

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParallelError;
use crate::impls::system_memory::current_process_memory;

const ROOT: usize = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorNode {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub duration: Duration,
    pub calls: u64,
    /// Highest resident memory (bytes) observed around a measured operation.
    pub peak_memory: Option<u64>,
    pub first_started: Option<DateTime<Utc>>,
}

impl MonitorNode {
    fn new(name: impl Into<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent,
            children: Vec::new(),
            duration: Duration::ZERO,
            calls: 0,
            peak_memory: None,
            first_started: None,
        }
    }
}

/// One line of a flattened monitor report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorRow {
    pub path: String,
    pub duration: Duration,
    pub calls: u64,
    pub peak_memory: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MonitorTree")]
pub struct Monitor {
    nodes: Vec<MonitorNode>,
    /// Node that new measurements attach to.
    #[serde(skip)]
    cursor: usize,
    /// Name of the task currently running with this monitor; flushing is
    /// forbidden while it is set.
    #[serde(skip)]
    lock: Option<String>,
}

/// Wire form of a monitor, checked before it becomes a `Monitor`.
#[derive(Deserialize)]
struct MonitorTree {
    nodes: Vec<MonitorNode>,
}

impl TryFrom<MonitorTree> for Monitor {
    type Error = String;

    /// Every index used by the tree walks must be valid: a root without a
    /// parent, and every other node listed exactly once as the child of its
    /// parent.
    fn try_from(tree: MonitorTree) -> Result<Self, String> {
        let nodes = tree.nodes;
        let root = nodes.get(ROOT).ok_or("monitor without a root node")?;
        if root.parent.is_some() {
            return Err("monitor root has a parent".to_string());
        }
        let mut listed = vec![false; nodes.len()];
        for (index, node) in nodes.iter().enumerate() {
            for &child in &node.children {
                let Some(child_node) = nodes.get(child) else {
                    return Err(format!("node {index} lists missing child {child}"));
                };
                if child == ROOT || listed[child] || child_node.parent != Some(index) {
                    return Err(format!("node {child} is not a proper child of node {index}"));
                }
                listed[child] = true;
            }
        }
        if let Some(orphan) = (1..nodes.len()).find(|&i| !listed[i]) {
            return Err(format!("node {orphan} is not linked to the tree"));
        }
        Ok(Self {
            nodes,
            cursor: ROOT,
            lock: None,
        })
    }
}

impl Monitor {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            nodes: vec![MonitorNode::new(operation, None)],
            cursor: ROOT,
            lock: None,
        }
    }

    pub fn operation(&self) -> &str {
        &self.nodes[ROOT].name
    }

    pub fn root(&self) -> &MonitorNode {
        &self.nodes[ROOT]
    }

    pub fn nodes(&self) -> &[MonitorNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&MonitorNode> {
        self.nodes.get(index)
    }

    /// Index of the child of `parent` called `name`, created if missing.
    pub fn child(&mut self, parent: usize, name: &str) -> usize {
        if let Some(&existing) = self.nodes[parent]
            .children
            .iter()
            .find(|&&c| self.nodes[c].name == name)
        {
            return existing;
        }
        let index = self.nodes.len();
        self.nodes.push(MonitorNode::new(name, Some(parent)));
        self.nodes[parent].children.push(index);
        index
    }

    /// Look a node up by its names below the root.
    pub fn find(&self, path: &[&str]) -> Option<&MonitorNode> {
        let mut current = ROOT;
        for name in path {
            current = *self.nodes[current]
                .children
                .iter()
                .find(|&&c| self.nodes[c].name == *name)?;
        }
        Some(&self.nodes[current])
    }

    /// Time `f` as the operation `name`, nested under the operation being
    /// measured when this is called (the root otherwise).
    pub fn time<R>(&mut self, name: &str, f: impl FnOnce(&mut Monitor) -> R) -> R {
        self.measure(name, false, f)
    }

    /// Like [`Monitor::time`], also recording the process memory peak.
    pub fn time_with_memory<R>(&mut self, name: &str, f: impl FnOnce(&mut Monitor) -> R) -> R {
        self.measure(name, true, f)
    }

    fn measure<R>(&mut self, name: &str, with_memory: bool, f: impl FnOnce(&mut Monitor) -> R) -> R {
        let parent = self.cursor;
        let index = self.child(parent, name);
        if self.nodes[index].first_started.is_none() {
            self.nodes[index].first_started = Some(Utc::now());
        }
        let memory_before = if with_memory {
            current_process_memory()
        } else {
            None
        };

        self.cursor = index;
        let started = Instant::now();
        let result = f(self);
        let elapsed = started.elapsed();
        self.cursor = parent;

        let memory_after = if with_memory {
            current_process_memory()
        } else {
            None
        };
        let node = &mut self.nodes[index];
        node.duration += elapsed;
        node.calls += 1;
        node.peak_memory = [node.peak_memory, memory_before, memory_after]
            .into_iter()
            .flatten()
            .max();
        result
    }

    /// Fold `other` into this monitor, matching nodes by name path.
    /// Durations and call counts add up, memory peaks take the maximum.
    pub fn merge(&mut self, other: &Monitor) {
        self.merge_node(ROOT, other, ROOT);
    }

    fn merge_node(&mut self, into: usize, other: &Monitor, from: usize) {
        let source = &other.nodes[from];
        let target = &mut self.nodes[into];
        target.duration += source.duration;
        target.calls += source.calls;
        target.peak_memory = target.peak_memory.max(source.peak_memory);
        target.first_started = match (target.first_started, source.first_started) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        for &child in &source.children {
            let name = other.nodes[child].name.clone();
            let index = self.child(into, &name);
            self.merge_node(index, other, child);
        }
    }

    /// Hand the collected measurements over to `sink` and start afresh.
    pub fn flush(&mut self, sink: &mut Monitor) -> Result<(), ParallelError> {
        if let Some(task) = &self.lock {
            return Err(ParallelError::FlushForbidden {
                operation: self.operation().to_string(),
                task: task.clone(),
            });
        }
        sink.merge(self);
        let operation = self.operation().to_string();
        *self = Monitor::new(operation);
        Ok(())
    }

    /// Mark the monitor as owned by a running task.
    pub fn lock(&mut self, task: &str) {
        self.lock = Some(task.to_string());
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Drop the per-run state (cursor, task lock) so that only the
    /// measurements remain. Called once the task has finished, also after a
    /// panic left the cursor in the middle of the tree.
    pub fn detach_transient(&mut self) {
        self.cursor = ROOT;
        self.lock = None;
    }

    /// Total time of the top-level operations.
    pub fn total_duration(&self) -> Duration {
        self.nodes[ROOT]
            .children
            .iter()
            .map(|&c| self.nodes[c].duration)
            .sum()
    }

    /// Depth-first flattening, paths joined with `/`.
    pub fn rows(&self) -> Vec<MonitorRow> {
        let mut rows = Vec::new();
        let mut stack: Vec<(usize, String)> = self.nodes[ROOT]
            .children
            .iter()
            .rev()
            .map(|&c| (c, self.nodes[c].name.clone()))
            .collect();
        while let Some((index, path)) = stack.pop() {
            let node = &self.nodes[index];
            for &child in node.children.iter().rev() {
                stack.push((child, format!("{path}/{}", self.nodes[child].name)));
            }
            rows.push(MonitorRow {
                path,
                duration: node.duration,
                calls: node.calls,
                peak_memory: node.peak_memory,
            });
        }
        rows
    }
}
