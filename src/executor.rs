use futures::{
    future::{FutureExt, LocalBoxFuture},
    task::{waker_ref, ArcWake, Context, Poll},
};
use futures_channel::oneshot;
use intmap::IntMap;
use queues::{IsQueue, Queue};
use std::{
    cell::{Cell, RefCell},
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{TbError, TbResult};

type TaskId = u64;

// Wakers must be Send + Sync, so the ready queue is the only piece of executor
// state behind a Mutex. Futures themselves stay local to the executor thread.
struct ReadyQueue(Mutex<Queue<TaskId>>);

impl ReadyQueue {
    fn new() -> Self {
        ReadyQueue(Mutex::new(Queue::new()))
    }
    fn schedule(&self, id: TaskId) {
        let mut queue = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        // Queue::add only fails for bounded queues
        let _ = queue.add(id);
    }
    fn next(&self) -> Option<TaskId> {
        let mut queue = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        queue.remove().ok()
    }
}

struct TaskWaker {
    id: TaskId,
    ready: Arc<ReadyQueue>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.ready.schedule(arc_self.id);
    }
}

struct Task {
    name: String,
    // None while the task is being polled
    future: Option<LocalBoxFuture<'static, ()>>,
    waker: Arc<TaskWaker>,
}

struct ExecutorInner {
    tasks: RefCell<IntMap<Task>>,
    ready: Arc<ReadyQueue>,
    next_id: Cell<TaskId>,
}

impl ExecutorInner {
    fn spawn<T: 'static>(
        &self,
        weak: Weak<ExecutorInner>,
        name: &str,
        future: impl Future<Output = T> + 'static,
    ) -> JoinHandle<T> {
        let (tx, rx) = oneshot::channel::<T>();
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let wrapped = async move {
            let result = future.await;
            // receiver may have been dropped, nobody is interested then
            let _ = tx.send(result);
        };
        let task = Task {
            name: name.to_string(),
            future: Some(wrapped.boxed_local()),
            waker: Arc::new(TaskWaker {
                id,
                ready: self.ready.clone(),
            }),
        };
        self.tasks.borrow_mut().insert(id, task);
        self.ready.schedule(id);
        log::trace!("spawned task '{}' ({})", name, id);

        JoinHandle {
            id,
            name: name.to_string(),
            join_rx: rx,
            executor: weak,
        }
    }
}

/// Single-threaded cooperative executor.
///
/// Tasks only run from [`Executor::run_once`]. Dropping the executor drops
/// every unfinished task without polling it again.
pub struct Executor {
    inner: Rc<ExecutorInner>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ExecutorInner {
                tasks: RefCell::new(IntMap::new()),
                ready: Arc::new(ReadyQueue::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn spawner(&self) -> Spawner {
        Spawner {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn spawn<T: 'static>(
        &self,
        name: &str,
        future: impl Future<Output = T> + 'static,
    ) -> JoinHandle<T> {
        self.inner
            .spawn(Rc::downgrade(&self.inner), name, future)
    }

    /// Poll ready tasks until none is left.
    #[inline]
    pub fn run_once(&self) {
        while let Some(id) = self.inner.ready.next() {
            self.process_task(id);
        }
    }

    #[inline]
    fn process_task(&self, id: TaskId) {
        let (mut future, waker) = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let Some(task) = tasks.get_mut(id) else {
                // woken after completion or cancellation
                return;
            };
            match task.future.take() {
                Some(future) => (future, task.waker.clone()),
                None => return,
            }
        };

        let waker = waker_ref(&waker);
        let context = &mut Context::from_waker(&waker);
        match future.as_mut().poll(context) {
            Poll::Pending => {
                let mut tasks = self.inner.tasks.borrow_mut();
                if let Some(task) = tasks.get_mut(id) {
                    task.future = Some(future);
                }
            }
            Poll::Ready(()) => {
                let task = self.inner.tasks.borrow_mut().remove(id);
                if let Some(task) = task {
                    log::trace!("task '{}' ({}) complete", task.name, id);
                }
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }
}

/// Cloneable handle for forking tasks from inside running tasks.
#[derive(Clone)]
pub struct Spawner {
    inner: Weak<ExecutorInner>,
}

impl Spawner {
    pub fn spawn<T: 'static>(
        &self,
        name: &str,
        future: impl Future<Output = T> + 'static,
    ) -> JoinHandle<T> {
        match self.inner.upgrade() {
            Some(inner) => inner.spawn(self.inner.clone(), name, future),
            None => {
                log::warn!("executor gone, task '{}' not spawned", name);
                let (_, rx) = oneshot::channel();
                JoinHandle {
                    id: TaskId::MAX,
                    name: name.to_string(),
                    join_rx: rx,
                    executor: Weak::new(),
                }
            }
        }
    }
}

pub struct JoinHandle<T> {
    id: TaskId,
    name: String,
    join_rx: oneshot::Receiver<T>,
    executor: Weak<ExecutorInner>,
}

impl<T> JoinHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop the task without polling it again.
    pub fn cancel(self) {
        if let Some(inner) = self.executor.upgrade() {
            let task = inner.tasks.borrow_mut().remove(self.id);
            drop(task);
        }
    }

    /// Non-blocking check for the task result.
    pub fn try_result(&mut self) -> Option<TbResult<T>> {
        match self.join_rx.try_recv() {
            Ok(Some(result)) => Some(Ok(result)),
            Ok(None) => None,
            Err(_) => Some(Err(TbError::Cancelled {
                task: self.name.clone(),
            })),
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = TbResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.join_rx.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(Ok(result)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TbError::Cancelled {
                task: self.name.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;

    #[test]
    fn spawned_task_runs_on_run_once() {
        let exec = Executor::new();
        let mut handle = exec.spawn("answer", async { 42 });
        assert!(handle.try_result().is_none());
        exec.run_once();
        assert_eq!(handle.try_result().unwrap().unwrap(), 42);
        assert_eq!(exec.task_count(), 0);
    }

    #[test]
    fn tasks_can_fork_and_join() {
        let exec = Executor::new();
        let spawner = exec.spawner();
        let mut handle = exec.spawn("parent", async move {
            let child = spawner.spawn("child", async { 5 });
            child.await.unwrap() * 2
        });
        exec.run_once();
        assert_eq!(handle.try_result().unwrap().unwrap(), 10);
    }

    #[test]
    fn channel_wakeups_are_scheduled() {
        let exec = Executor::new();
        let (tx, mut rx) = mpsc::unbounded::<u32>();
        let mut handle = exec.spawn("sum", async move {
            let mut sum = 0;
            while let Some(v) = rx.next().await {
                sum += v;
            }
            sum
        });
        exec.run_once();
        tx.unbounded_send(1).unwrap();
        tx.unbounded_send(2).unwrap();
        exec.run_once();
        assert!(handle.try_result().is_none());
        drop(tx);
        exec.run_once();
        assert_eq!(handle.try_result().unwrap().unwrap(), 3);
    }

    #[test]
    fn dropping_executor_abandons_tasks() {
        let exec = Executor::new();
        let (_tx, rx) = oneshot::channel::<()>();
        let mut handle = exec.spawn("waiting", async move {
            let _ = rx.await;
        });
        exec.run_once();
        assert!(handle.try_result().is_none());
        drop(exec);
        assert!(matches!(
            handle.try_result(),
            Some(Err(TbError::Cancelled { .. }))
        ));
    }

    #[test]
    fn cancel_removes_task() {
        let exec = Executor::new();
        let (_tx, rx) = oneshot::channel::<()>();
        let mut handle = exec.spawn("waiting", async move {
            let _ = rx.await;
        });
        exec.run_once();
        assert!(handle.try_result().is_none());
        handle.cancel();
        assert_eq!(exec.task_count(), 0);
    }
}
