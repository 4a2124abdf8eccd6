//! Request-keyed result cache backed by a single background worker.
//!
//! Callers never block: [`CalcCache::request`] returns the cached output or
//! queues the request and answers [`Poll::Pending`]. A request is queued at
//! most once until its output is published, no matter how many callers ask
//! for it in the meantime.

use super::calculator::{CalcError, CalcStrategy};
use crate::cancel::CancelToken;
use crate::lock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::task::Poll;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheState {
    Stopped = 0,
    Running = 1,
    Draining = 2,
}

impl CacheState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CacheState::Running,
            2 => CacheState::Draining,
            _ => CacheState::Stopped,
        }
    }
}

struct WorkQueue<R> {
    queue: VecDeque<R>,
    /// Everything queued or being computed right now.
    pending: HashSet<R>,
}

impl<R> Default for WorkQueue<R> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            pending: HashSet::new(),
        }
    }
}

struct Shared<S: CalcStrategy> {
    work: Mutex<WorkQueue<S::Request>>,
    work_ready: Condvar,
    results: Mutex<HashMap<S::Request, S::Output>>,
    state: AtomicU8,
    computed: AtomicUsize,
    stop: CancelToken,
}

struct Control<S: CalcStrategy> {
    target: Option<Arc<S::Target>>,
    worker: Option<JoinHandle<()>>,
}

pub struct CalcCache<S: CalcStrategy> {
    strategy: Arc<S>,
    shared: Arc<Shared<S>>,
    control: Mutex<Control<S>>,
}

impl<S: CalcStrategy> CalcCache<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy: Arc::new(strategy),
            shared: Arc::new(Shared {
                work: Mutex::new(WorkQueue::default()),
                work_ready: Condvar::new(),
                results: Mutex::new(HashMap::new()),
                state: AtomicU8::new(CacheState::Stopped as u8),
                computed: AtomicUsize::new(0),
                stop: CancelToken::new(),
            }),
            control: Mutex::new(Control {
                target: None,
                worker: None,
            }),
        }
    }

    pub fn state(&self) -> CacheState {
        CacheState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn target(&self) -> Option<Arc<S::Target>> {
        lock(&self.control).target.clone()
    }

    /// Returns the output for `request`, or queues it.
    ///
    /// Without a target nothing is queued and the answer is always
    /// `Pending`.
    pub fn request(&self, request: S::Request) -> Poll<S::Output> {
        if let Some(output) = self.peek(&request) {
            return Poll::Ready(output);
        }

        let mut work = lock(&self.shared.work);
        if self.state() != CacheState::Running {
            return Poll::Pending;
        }
        if work.pending.insert(request.clone()) {
            work.queue.push_back(request);
            self.shared.work_ready.notify_one();
        }
        Poll::Pending
    }

    /// Cached output only; never queues.
    pub fn peek(&self, request: &S::Request) -> Option<S::Output> {
        lock(&self.shared.results).get(request).cloned()
    }

    /// Queued or being computed. A request that is neither cached nor in
    /// flight either failed or was never accepted.
    pub fn is_in_flight(&self, request: &S::Request) -> bool {
        lock(&self.shared.work).pending.contains(request)
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.shared.work).pending.len()
    }

    pub fn queued_len(&self) -> usize {
        lock(&self.shared.work).queue.len()
    }

    pub fn cached_len(&self) -> usize {
        lock(&self.shared.results).len()
    }

    /// Number of outputs published since the cache was created.
    pub fn computed_count(&self) -> usize {
        self.shared.computed.load(Ordering::Acquire)
    }

    /// Binds the cache to `target`. An equal target keeps everything; any
    /// other value stops the worker, drops every cached output and queued
    /// request, then starts a fresh worker.
    pub fn set_target(&self, target: Option<Arc<S::Target>>) {
        let mut control = lock(&self.control);
        if control.target.as_deref() == target.as_deref() {
            return;
        }

        self.shutdown(&mut control);

        let Some(target) = target else {
            return;
        };
        control.target = Some(Arc::clone(&target));

        let strategy = Arc::clone(&self.strategy);
        let shared = Arc::clone(&self.shared);
        let name = format!("{}-calc", self.strategy.name());
        self.shared
            .state
            .store(CacheState::Running as u8, Ordering::Release);

        match thread::Builder::new()
            .name(name)
            .spawn(move || run_worker(strategy, shared, target))
        {
            Ok(handle) => control.worker = Some(handle),
            Err(e) => {
                log::error!("CALC: Failed to spawn {} worker: {}", self.strategy.name(), e);
                self.shared
                    .state
                    .store(CacheState::Stopped as u8, Ordering::Release);
                control.target = None;
            }
        }
    }

    /// Stops the worker and forgets the target. Calling it again is a no-op.
    pub fn abort(&self) {
        let mut control = lock(&self.control);
        self.shutdown(&mut control);
    }

    fn shutdown(&self, control: &mut Control<S>) {
        if control.target.is_none() && control.worker.is_none() {
            return;
        }

        self.shared
            .state
            .store(CacheState::Draining as u8, Ordering::Release);
        self.shared.stop.cancel();
        {
            let _work = lock(&self.shared.work);
            self.shared.work_ready.notify_all();
        }

        if let Some(handle) = control.worker.take() {
            if handle.join().is_err() {
                log::error!("CALC: {} worker panicked", self.strategy.name());
            }
        }

        {
            let mut work = lock(&self.shared.work);
            work.queue.clear();
            work.pending.clear();
        }
        lock(&self.shared.results).clear();

        control.target = None;
        self.shared.stop.reset();
        self.shared
            .state
            .store(CacheState::Stopped as u8, Ordering::Release);
    }
}

impl<S: CalcStrategy> Drop for CalcCache<S> {
    fn drop(&mut self) {
        self.abort();
    }
}

fn next_request<S: CalcStrategy>(shared: &Shared<S>) -> Option<S::Request> {
    let mut work = lock(&shared.work);
    loop {
        if shared.stop.should_stop() {
            return None;
        }
        if let Some(request) = work.queue.pop_front() {
            return Some(request);
        }
        work = shared
            .work_ready
            .wait(work)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

fn run_worker<S: CalcStrategy>(strategy: Arc<S>, shared: Arc<Shared<S>>, target: Arc<S::Target>) {
    log::debug!("CALC: {} worker started", strategy.name());
    let mut memo = S::Memo::default();

    while let Some(request) = next_request(&shared) {
        // A caller may have re-queued a request whose output was published
        // between its cache miss and its enqueue.
        if lock(&shared.results).contains_key(&request) {
            lock(&shared.work).pending.remove(&request);
            continue;
        }

        match strategy.compute(&target, &mut memo, &request, &shared.stop) {
            Ok(output) => {
                if !shared.stop.should_stop() {
                    lock(&shared.results).insert(request.clone(), output);
                    shared.computed.fetch_add(1, Ordering::AcqRel);
                }
            }
            Err(CalcError::Interrupted) => {
                lock(&shared.work).pending.remove(&request);
                break;
            }
            Err(e) => {
                log::warn!("CALC: {} failed for {:?}: {}", strategy.name(), request, e);
            }
        }
        lock(&shared.work).pending.remove(&request);
    }

    log::debug!("CALC: {} worker stopped", strategy.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, Sender, unbounded};
    use std::time::{Duration, Instant};

    /// Squares numbers. Each computation waits for a ticket on `gate`, so a
    /// test decides exactly when results appear.
    struct Square {
        gate: Receiver<()>,
        calls: Arc<AtomicUsize>,
    }

    impl CalcStrategy for Square {
        type Target = u32;
        type Request = u32;
        type Output = u64;
        type Memo = Vec<u32>;

        fn name(&self) -> &str {
            "square"
        }

        fn compute(
            &self,
            target: &u32,
            memo: &mut Vec<u32>,
            request: &u32,
            stop: &CancelToken,
        ) -> Result<u64, CalcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            memo.push(*request);
            loop {
                if stop.should_stop() {
                    return Err(CalcError::Interrupted);
                }
                if self.gate.recv_timeout(Duration::from_millis(5)).is_ok() {
                    break;
                }
            }
            if *request == 13 {
                return Err(CalcError::InvalidBeatmap("unlucky".into()));
            }
            Ok(u64::from(*request) * u64::from(*request) + u64::from(*target))
        }
    }

    fn square_cache() -> (CalcCache<Square>, Sender<()>, Arc<AtomicUsize>) {
        let (tx, rx) = unbounded();
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CalcCache::new(Square {
            gate: rx,
            calls: Arc::clone(&calls),
        });
        (cache, tx, calls)
    }

    fn wait_ready(cache: &CalcCache<Square>, request: u32) -> u64 {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Poll::Ready(value) = cache.request(request) {
                return value;
            }
            assert!(Instant::now() < deadline, "request {} never finished", request);
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition never held");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn no_target_means_pending_and_nothing_queued() {
        let (cache, _tx, calls) = square_cache();
        assert_eq!(cache.request(3), Poll::Pending);
        assert_eq!(cache.pending_len(), 0);
        assert_eq!(cache.state(), CacheState::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_identical_requests_compute_once() {
        let (cache, tx, calls) = square_cache();
        cache.set_target(Some(Arc::new(0)));

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..50 {
                        assert_eq!(cache.request(7), Poll::Pending);
                    }
                });
            }
        });
        assert_eq!(cache.pending_len(), 1);

        tx.send(()).unwrap();
        assert_eq!(wait_ready(&cache, 7), 49);
        assert_eq!(cache.request(7), Poll::Ready(49));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.computed_count(), 1);
        wait_until(|| cache.pending_len() == 0);
    }

    #[test]
    fn retargeting_invalidates_results() {
        let (cache, tx, calls) = square_cache();
        cache.set_target(Some(Arc::new(0)));
        let _ = cache.request(2);
        tx.send(()).unwrap();
        assert_eq!(wait_ready(&cache, 2), 4);

        cache.set_target(Some(Arc::new(0)));
        assert_eq!(cache.peek(&2), Some(4), "equal target keeps the cache");

        cache.set_target(Some(Arc::new(100)));
        assert_eq!(cache.peek(&2), None);
        assert_eq!(cache.request(2), Poll::Pending);
        tx.send(()).unwrap();
        assert_eq!(wait_ready(&cache, 2), 104);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let (cache, tx, _calls) = square_cache();
        cache.set_target(Some(Arc::new(0)));
        let _ = cache.request(13);
        tx.send(()).unwrap();
        wait_until(|| cache.pending_len() == 0);
        assert_eq!(cache.peek(&13), None);
        assert_eq!(cache.cached_len(), 0);
    }

    #[test]
    fn abort_interrupts_in_flight_work() {
        let (cache, _tx, calls) = square_cache();
        cache.set_target(Some(Arc::new(0)));
        let _ = cache.request(5);
        let _ = cache.request(6);
        wait_until(|| calls.load(Ordering::SeqCst) == 1);

        cache.abort();
        assert_eq!(cache.state(), CacheState::Stopped);
        assert_eq!(cache.pending_len(), 0);
        assert_eq!(cache.queued_len(), 0);
        assert_eq!(cache.cached_len(), 0);
        assert!(cache.target().is_none());

        cache.abort();
        assert_eq!(cache.state(), CacheState::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn restart_after_abort() {
        let (cache, tx, _calls) = square_cache();
        cache.set_target(Some(Arc::new(1)));
        cache.abort();
        cache.set_target(Some(Arc::new(1)));
        assert_eq!(cache.state(), CacheState::Running);
        let _ = cache.request(3);
        tx.send(()).unwrap();
        assert_eq!(wait_ready(&cache, 3), 10);
    }
}
