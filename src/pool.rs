use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use thiserror::Error;

use crate::engine::{Engine, EngineError, EngineFactory, TestOutcome};
use crate::filter::{SiteMeta, SiteTask};
use crate::matrix::Submatrix;

/// Completed work for one site. Per-site engine failures ride along in
/// `outcome` so the orchestrator can apply permissive or strict semantics at
/// the site's ordered position.
#[derive(Debug)]
pub struct TaskResult {
    pub seq: u64,
    pub meta: SiteMeta,
    pub outcome: Result<TestOutcome, EngineError>,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("worker thread panicked")]
    WorkerPanicked,
}

/// Maximum number of submitted-but-unfinished tasks queued ahead of the
/// workers. Keeps memory bounded on arbitrarily long inputs.
const TASK_QUEUE_DEPTH: usize = 64;

/// Fixed pool of worker threads, each owning one engine, with results
/// released strictly in submission order.
///
/// Callers must assign sequence indices densely from zero in submission
/// order. `submit` applies backpressure: once `TASK_QUEUE_DEPTH + threads`
/// tasks are in flight it blocks until a result returns. The result channel
/// has the same capacity, so a worker can always deposit a finished result
/// and the pipeline cannot deadlock.
pub struct Dispatcher {
    task_tx: Option<Sender<SiteTask>>,
    result_rx: Receiver<TaskResult>,
    workers: Vec<JoinHandle<()>>,
    pending: BinaryHeap<Reverse<PendingResult>>,
    next_seq: u64,
    in_flight: usize,
    capacity: usize,
}

impl Dispatcher {
    /// Spawns `threads` workers, building one engine per worker up front so
    /// engine start-up failures surface before any input is consumed.
    pub fn new(
        threads: usize,
        factory: &dyn EngineFactory,
        matrix: &Submatrix,
    ) -> Result<Self, PoolError> {
        let capacity = TASK_QUEUE_DEPTH + threads;
        let (task_tx, task_rx) = bounded::<SiteTask>(TASK_QUEUE_DEPTH);
        let (result_tx, result_rx) = bounded::<TaskResult>(capacity);

        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let engine = factory.create(matrix)?;
            let tasks = task_rx.clone();
            let results = result_tx.clone();
            workers.push(thread::spawn(move || worker_loop(engine, tasks, results)));
        }

        Ok(Self {
            task_tx: Some(task_tx),
            result_rx,
            workers,
            pending: BinaryHeap::new(),
            next_seq: 0,
            in_flight: 0,
            capacity,
        })
    }

    /// Hands one task to the pool. Results that became releasable are
    /// appended to `ready`, in sequence order.
    pub fn submit(&mut self, task: SiteTask, ready: &mut Vec<TaskResult>) -> Result<(), PoolError> {
        loop {
            match self.result_rx.try_recv() {
                Ok(result) => self.receive(result),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(PoolError::WorkerPanicked),
            }
        }
        if self.in_flight == self.capacity {
            let result = self
                .result_rx
                .recv()
                .map_err(|_| PoolError::WorkerPanicked)?;
            self.receive(result);
        }

        let Some(task_tx) = &self.task_tx else {
            return Err(PoolError::WorkerPanicked);
        };
        task_tx
            .send(task)
            .map_err(|_| PoolError::WorkerPanicked)?;
        self.in_flight += 1;

        self.release(ready);
        Ok(())
    }

    /// Stops accepting work, drains every in-flight task, and joins the
    /// workers. All remaining results land in `ready`, in sequence order.
    /// Used for normal completion and for cancellation alike; the caller
    /// decides what to do with the drained results.
    pub fn finish(&mut self, ready: &mut Vec<TaskResult>) -> Result<(), PoolError> {
        self.task_tx.take();
        while let Ok(result) = self.result_rx.recv() {
            self.receive(result);
        }
        self.release(ready);

        let mut panicked = false;
        for worker in self.workers.drain(..) {
            panicked |= worker.join().is_err();
        }
        if panicked {
            return Err(PoolError::WorkerPanicked);
        }
        Ok(())
    }

    fn receive(&mut self, result: TaskResult) {
        self.in_flight -= 1;
        self.pending.push(Reverse(PendingResult(result)));
    }

    fn release(&mut self, ready: &mut Vec<TaskResult>) {
        while let Some(Reverse(next)) = self.pending.peek() {
            if next.0.seq != self.next_seq {
                break;
            }
            if let Some(Reverse(PendingResult(result))) = self.pending.pop() {
                self.next_seq += 1;
                ready.push(result);
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Reached without finish() only on error paths. Close the task
        // channel, keep draining so no worker blocks on a full result
        // channel, then join.
        self.task_tx.take();
        while self.result_rx.recv().is_ok() {}
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    mut engine: Box<dyn Engine>,
    tasks: Receiver<SiteTask>,
    results: Sender<TaskResult>,
) {
    for task in tasks.iter() {
        let outcome = engine.compute(&task.genotypes);
        let result = TaskResult {
            seq: task.seq,
            meta: task.meta,
            outcome,
        };
        if results.send(result).is_err() {
            break;
        }
    }
}

struct PendingResult(TaskResult);

impl PartialEq for PendingResult {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for PendingResult {}

impl PartialOrd for PendingResult {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingResult {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.seq.cmp(&other.0.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::DistanceMatrix;
    use crate::table::NamedTable;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct JitterEngine {
        fail_on_sum: Option<u32>,
    }

    impl Engine for JitterEngine {
        fn compute(&mut self, genotypes: &[u8]) -> Result<TestOutcome, EngineError> {
            let sum: u32 = genotypes.iter().map(|&g| u32::from(g)).sum();
            // Vary completion order across workers.
            thread::sleep(Duration::from_millis(u64::from(sum % 4)));
            if self.fail_on_sum == Some(sum) {
                return Err(EngineError::Computation {
                    message: "forced failure".to_string(),
                });
            }
            Ok(TestOutcome {
                statistic: f64::from(sum),
                p_value: 1.0 / (1.0 + f64::from(sum)),
            })
        }
    }

    struct JitterFactory {
        fail_on_sum: Option<u32>,
        fail_creation_at: Option<usize>,
        created: AtomicUsize,
    }

    impl JitterFactory {
        fn new() -> Self {
            Self {
                fail_on_sum: None,
                fail_creation_at: None,
                created: AtomicUsize::new(0),
            }
        }
    }

    impl EngineFactory for JitterFactory {
        fn create(&self, _matrix: &Submatrix) -> Result<Box<dyn Engine>, EngineError> {
            let index = self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail_creation_at == Some(index) {
                return Err(EngineError::Computation {
                    message: "creation failure".to_string(),
                });
            }
            Ok(Box::new(JitterEngine {
                fail_on_sum: self.fail_on_sum,
            }))
        }
    }

    fn submatrix() -> Submatrix {
        let table = NamedTable::read(Cursor::new(",a,b\na,0,1\nb,1,0\n".to_string())).unwrap();
        let matrix = DistanceMatrix::from_table(&table).unwrap();
        matrix
            .submatrix(&["a".to_string(), "b".to_string()])
            .unwrap()
    }

    fn task(seq: u64) -> SiteTask {
        SiteTask {
            seq,
            meta: SiteMeta {
                chrom: "1".to_string(),
                pos: 100 + seq,
                snp: format!("rs{seq}"),
                a1: "A".to_string(),
                a2: "T".to_string(),
                a2_freq: 0.5,
                maf: 0.2,
                r2: 0.9,
            },
            genotypes: vec![(seq % 3) as u8, ((seq + 1) % 3) as u8],
        }
    }

    fn run(threads: usize, count: u64, factory: &JitterFactory) -> Vec<TaskResult> {
        let matrix = submatrix();
        let mut dispatcher = Dispatcher::new(threads, factory, &matrix).unwrap();
        let mut ready = Vec::new();
        for seq in 0..count {
            dispatcher.submit(task(seq), &mut ready).unwrap();
        }
        dispatcher.finish(&mut ready).unwrap();
        ready
    }

    #[test]
    fn results_come_back_in_submission_order() {
        let factory = JitterFactory::new();
        let results = run(4, 200, &factory);
        let seqs: Vec<u64> = results.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (0..200).collect::<Vec<_>>());
        assert_eq!(factory.created.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn single_worker_behaves_the_same() {
        let factory = JitterFactory::new();
        let results = run(1, 20, &factory);
        assert_eq!(results.len(), 20);
        assert!(results.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn backpressure_survives_more_tasks_than_capacity() {
        let factory = JitterFactory::new();
        let results = run(2, (TASK_QUEUE_DEPTH as u64 + 2) * 3, &factory);
        assert_eq!(results.len(), (TASK_QUEUE_DEPTH + 2) * 3);
    }

    #[test]
    fn per_site_failure_stays_in_its_slot() {
        let factory = JitterFactory {
            // tasks with seq % 3 == 1 have genotypes [1, 2], which sum to 3
            fail_on_sum: Some(3),
            fail_creation_at: None,
            created: AtomicUsize::new(0),
        };
        let results = run(2, 6, &factory);
        assert_eq!(results.len(), 6);
        for result in &results {
            let failed = result.outcome.is_err();
            assert_eq!(failed, result.seq % 3 == 1, "seq {}", result.seq);
        }
    }

    #[test]
    fn engine_creation_failure_aborts_construction() {
        let factory = JitterFactory {
            fail_on_sum: None,
            fail_creation_at: Some(1),
            created: AtomicUsize::new(0),
        };
        let matrix = submatrix();
        assert!(matches!(
            Dispatcher::new(2, &factory, &matrix),
            Err(PoolError::Engine(_))
        ));
    }

    #[test]
    fn finish_without_work_is_clean() {
        let factory = JitterFactory::new();
        let matrix = submatrix();
        let mut dispatcher = Dispatcher::new(3, &factory, &matrix).unwrap();
        let mut ready = Vec::new();
        dispatcher.finish(&mut ready).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn drop_without_finish_shuts_down() {
        let factory = JitterFactory::new();
        let matrix = submatrix();
        let mut dispatcher = Dispatcher::new(2, &factory, &matrix).unwrap();
        let mut ready = Vec::new();
        for seq in 0..10 {
            dispatcher.submit(task(seq), &mut ready).unwrap();
        }
        drop(dispatcher);
    }
}
