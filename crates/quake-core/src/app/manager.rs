//! TaskManager - chunk を submit し、結果を畳み込む
//!
//! # 二つのモード
//! - **no-distribute**: submit した時点で呼び出し元プロセス内で実行し、
//!   結果は `ready` に積まれる
//! - **pooled**: envelope 化して `WorkerPool` に dispatch し、`reduce` が
//!   完了順に結果を拾う
//!
//! どちらのモードでも task の失敗は `submit` ではなく `reduce` で表面化し、
//! 最初の失敗で止まる。
//!
//! # 学習ポイント
//! - `JoinSet` による完了順の収集と `detach_all` による破棄
//! - 状態遷移 `Idle → Submitting → Collecting → Reducing → Idle`

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::info;

use crate::config::ParallelConfig;
use crate::domain::{
    BlockSplitter, Chunk, Envelope, EnvelopeCache, Monitor, PoolId, TaskCall, TaskResult,
    human_size,
};
use crate::error::ParallelError;
use crate::typed::Task;

use super::memory_guard::MemoryGuard;
use super::pool::WorkerPool;
use super::progress::Progress;
use super::safe_call::safely_call;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Submitting,
    Collecting,
    Reducing,
}

type InFlight = (PoolId, Result<Envelope, ParallelError>);

pub struct TaskManager<T: Task> {
    task: Arc<T>,
    name: String,
    pool: Arc<WorkerPool>,
    no_distribute: bool,
    guard: MemoryGuard,
    monitor: Monitor,
    state: ManagerState,
    ready: VecDeque<TaskResult<T::Output>>,
    in_flight: JoinSet<InFlight>,
    sent: u64,
    received: u64,
    last_chunk_lengths: Vec<usize>,
}

impl<T: Task> TaskManager<T> {
    pub fn new(task: T, pool: Arc<WorkerPool>, config: &ParallelConfig) -> Self {
        Self::with_shared_task(Arc::new(task), pool, config)
    }

    pub fn with_shared_task(task: Arc<T>, pool: Arc<WorkerPool>, config: &ParallelConfig) -> Self {
        Self {
            task,
            name: T::NAME.to_string(),
            pool,
            no_distribute: config.no_distribute,
            guard: MemoryGuard::from_config(config),
            monitor: Monitor::new(T::NAME),
            state: ManagerState::Idle,
            ready: VecDeque::new(),
            in_flight: JoinSet::new(),
            sent: 0,
            received: 0,
            last_chunk_lengths: Vec::new(),
        }
    }

    /// Name used in log lines and for the monitors of submitted calls.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Monitor that collects the measurements of every result.
    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_memory_guard(mut self, guard: MemoryGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn into_monitor(self) -> Monitor {
        self.monitor
    }

    pub fn is_distributed(&self) -> bool {
        !self.no_distribute
    }

    /// Bytes of enveloped inputs dispatched so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Bytes of enveloped results collected so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Results not yet consumed by `reduce`.
    pub fn pending(&self) -> usize {
        self.ready.len() + self.in_flight.len()
    }

    /// Chunk sizes of the last `apply_reduce`.
    pub fn last_chunk_lengths(&self) -> &[usize] {
        &self.last_chunk_lengths
    }

    /// Submit one chunk. A refused submission drops every pending result.
    pub fn submit(&mut self, items: Vec<T::Item>, args: &T::Args) -> Result<(), ParallelError> {
        let mut cache = EnvelopeCache::new();
        let submitted = self.submit_with(items, args, &mut cache);
        if submitted.is_err() {
            self.discard();
        }
        submitted
    }

    fn submit_with<'a>(
        &mut self,
        items: Vec<T::Item>,
        args: &'a T::Args,
        cache: &mut EnvelopeCache<'a>,
    ) -> Result<(), ParallelError> {
        self.guard.check()?;
        self.state = ManagerState::Submitting;

        if self.no_distribute {
            let result = safely_call(&*self.task, items, args, Monitor::new(&self.name));
            self.ready.push_back(result);
            return Ok(());
        }

        let call = TaskCall::new(
            T::NAME,
            Envelope::wrap(&items)?,
            cache.wrap_value(args)?,
            Envelope::wrap(&Monitor::new(&self.name))?,
        );
        let size = call.transfer_size() as u64;
        let dispatched = self.pool.dispatch(call)?;
        self.sent += size;

        let generation = dispatched.generation;
        let result = dispatched.result;
        self.in_flight
            .spawn(async move { (generation, result.await) });
        Ok(())
    }

    /// Submit every `(items, args)` pair in order. Arguments passed by the
    /// same reference are serialized once.
    pub fn starmap<'a, I>(&mut self, calls: I) -> Result<(), ParallelError>
    where
        I: IntoIterator<Item = (Vec<T::Item>, &'a T::Args)>,
        T::Args: 'a,
    {
        let calls: Vec<_> = calls.into_iter().collect();
        let total = calls.len();
        let mut cache = EnvelopeCache::new();
        for (i, (items, args)) in calls.into_iter().enumerate() {
            info!("{} {}/{}", self.name, i + 1, total);
            if let Err(e) = self.submit_with(items, args, &mut cache) {
                self.discard();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Split `items`, run the task on every chunk and fold the outputs into
    /// `acc` with `agg`.
    ///
    /// - no items: `acc` is returned as is
    /// - a single item: run in this process, without chunking or the pool
    /// - hint `0` or no-distribute: every chunk runs in this process
    pub async fn apply_reduce<A, F, K>(
        &mut self,
        items: Vec<T::Item>,
        args: &T::Args,
        splitter: &BlockSplitter<T::Item, K>,
        mut agg: F,
        acc: A,
    ) -> Result<A, ParallelError>
    where
        F: FnMut(A, T::Output) -> A,
        K: Eq + Hash,
    {
        self.last_chunk_lengths.clear();
        if items.is_empty() {
            return Ok(acc);
        }
        if items.len() == 1 {
            self.last_chunk_lengths.push(1);
            let result = safely_call(&*self.task, items, args, Monitor::new(&self.name));
            let value = self.absorb(result)?;
            return Ok(agg(acc, value));
        }

        let chunks = splitter.split(items)?;
        self.last_chunk_lengths = chunks.iter().map(Chunk::len).collect();

        if splitter.hint() == 0 || self.no_distribute {
            let mut acc = acc;
            for chunk in chunks {
                self.guard.check()?;
                let result =
                    safely_call(&*self.task, chunk.into_items(), args, Monitor::new(&self.name));
                let value = self.absorb(result)?;
                acc = agg(acc, value);
            }
            return Ok(acc);
        }

        info!("Starting {} tasks", chunks.len());
        self.starmap(chunks.into_iter().map(|chunk| (chunk.into_items(), args)))?;
        self.reduce(agg, acc).await
    }

    /// Fold every pending result into `acc`, in completion order.
    ///
    /// Stops at the first failed task, lost worker, stale generation or
    /// memory exhaustion. Pending results are dropped either way and the
    /// manager is idle again afterwards.
    pub async fn reduce<A, F>(&mut self, mut agg: F, acc: A) -> Result<A, ParallelError>
    where
        F: FnMut(A, T::Output) -> A,
    {
        let outcome = self.collect(&mut agg, acc).await;
        self.discard();
        outcome
    }

    /// Wait for every pending result and return how many completed.
    pub async fn wait(&mut self) -> Result<usize, ParallelError> {
        self.reduce(|done, _| done + 1, 0).await
    }

    async fn collect<A, F>(&mut self, agg: &mut F, mut acc: A) -> Result<A, ParallelError>
    where
        F: FnMut(A, T::Output) -> A,
    {
        self.state = ManagerState::Collecting;
        let mut progress = Progress::new(self.name.clone(), self.pending());
        if self.is_distributed() {
            info!("Sent {}", human_size(self.sent));
        }

        while let Some(result) = self.ready.pop_front() {
            self.guard.check()?;
            let value = self.absorb(result)?;
            acc = agg(acc, value);
            progress.advance();
        }

        while let Some(joined) = self.in_flight.join_next().await {
            self.guard.check()?;
            let (generation, envelope) = joined
                .map_err(|e| ParallelError::Protocol(format!("result collector failed: {e}")))?;
            let current = self.pool.generation();
            if current != Some(generation) {
                return Err(ParallelError::PoolGeneration {
                    found: generation,
                    current: current.map_or_else(|| "none".to_string(), |id| id.to_string()),
                });
            }
            let envelope = envelope?;
            self.received += envelope.len() as u64;
            let result: TaskResult<T::Output> = envelope.unwrap()?;
            let value = self.absorb(result)?;
            acc = agg(acc, value);
            progress.advance();
        }

        if self.is_distributed() {
            info!("Received {}", human_size(self.received));
        }
        Ok(acc)
    }

    /// Merge the measurements of `result` and extract its value.
    fn absorb(&mut self, result: TaskResult<T::Output>) -> Result<T::Output, ParallelError> {
        let previous = self.state;
        self.state = ManagerState::Reducing;
        let (value, monitor) = result.into_parts();
        self.monitor.merge(&monitor);
        self.state = previous;
        value
    }

    /// Forget pending results. In-flight calls keep running; their replies
    /// are dropped.
    fn discard(&mut self) {
        self.ready.clear();
        self.in_flight.detach_all();
        self.state = ManagerState::Idle;
    }
}
