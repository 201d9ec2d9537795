// SPDX-License-Identifier: GPL-3.0-only

use calloop::ping::Ping;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use tracing::{error, trace};

/// Unit of work for a [`BackgroundWorker`].
pub trait Job: Send + 'static {
    type Output: Send + 'static;

    fn run(self) -> Self::Output;

    /// Waiting jobs with the same key replace each other, so only the
    /// latest one runs. Jobs without a key run in submission order.
    fn coalesce_key(&self) -> Option<String> {
        None
    }
}

struct Queue<J: Job> {
    busy: bool,
    pending: VecDeque<J>,
    done: Vec<J::Output>,
}

/// Runs slow jobs off the owning thread, one at a time.
///
/// Results are collected by [`BackgroundWorker::poll`] on the owning
/// thread. Once the worker is dropped, the job in flight still completes
/// but its result is discarded.
pub struct BackgroundWorker<J: Job> {
    name: &'static str,
    queue: Arc<Mutex<Queue<J>>>,
    alive: Arc<AtomicBool>,
    ping: Option<Ping>,
}

impl<J: Job> BackgroundWorker<J> {
    pub fn new(name: &'static str) -> BackgroundWorker<J> {
        BackgroundWorker {
            name,
            queue: Arc::new(Mutex::new(Queue {
                busy: false,
                pending: VecDeque::new(),
                done: Vec::new(),
            })),
            alive: Arc::new(AtomicBool::new(true)),
            ping: None,
        }
    }

    /// Wakes the event loop whenever results are ready.
    pub fn with_ping(mut self, ping: Ping) -> BackgroundWorker<J> {
        self.ping = Some(ping);
        self
    }

    pub fn is_busy(&self) -> bool {
        self.queue.lock().busy
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().pending.len()
    }

    pub fn submit(&self, job: J) {
        let mut queue = self.queue.lock();
        if let Some(key) = job.coalesce_key() {
            if let Some(waiting) = queue
                .pending
                .iter_mut()
                .find(|waiting| waiting.coalesce_key().as_deref() == Some(key.as_str()))
            {
                trace!(worker = self.name, key, "Replacing queued job");
                *waiting = job;
                return;
            }
        }
        queue.pending.push_back(job);

        if !queue.busy {
            self.spawn(&mut queue);
        }
    }

    /// Takes the results of all jobs finished since the last call.
    pub fn poll(&self) -> Vec<J::Output> {
        std::mem::take(&mut self.queue.lock().done)
    }

    fn spawn(&self, queue: &mut Queue<J>) {
        let Some(first) = queue.pending.pop_front() else {
            return;
        };
        queue.busy = true;

        let shared = self.queue.clone();
        let alive = self.alive.clone();
        let ping = self.ping.clone();
        let res = thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || {
                let mut job = first;
                loop {
                    let output = job.run();
                    let mut queue = shared.lock();
                    if alive.load(Ordering::Acquire) {
                        queue.done.push(output);
                    }
                    match queue.pending.pop_front() {
                        Some(next) => job = next,
                        None => {
                            queue.busy = false;
                            break;
                        }
                    }
                }
                if alive.load(Ordering::Acquire) {
                    if let Some(ping) = ping {
                        ping.ping();
                    }
                }
            });

        if let Err(err) = res {
            error!(?err, worker = self.name, "Failed to spawn worker thread");
            queue.busy = false;
        }
    }
}

impl<J: Job> Drop for BackgroundWorker<J> {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    struct Gated {
        key: Option<&'static str>,
        value: u32,
        gate: Option<mpsc::Receiver<()>>,
    }

    impl Job for Gated {
        type Output = u32;

        fn run(self) -> u32 {
            if let Some(gate) = self.gate {
                let _ = gate.recv();
            }
            self.value
        }

        fn coalesce_key(&self) -> Option<String> {
            self.key.map(String::from)
        }
    }

    fn job(key: Option<&'static str>, value: u32) -> Gated {
        Gated {
            key,
            value,
            gate: None,
        }
    }

    fn gated(value: u32) -> (Gated, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (
            Gated {
                key: Some("gate"),
                value,
                gate: Some(rx),
            },
            tx,
        )
    }

    fn wait_idle<J: Job>(worker: &BackgroundWorker<J>) {
        let start = Instant::now();
        while worker.is_busy() {
            assert!(start.elapsed() < Duration::from_secs(5), "worker stuck");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn latest_value_wins_while_busy() {
        let worker = BackgroundWorker::new("test");
        let (first, release) = gated(1);
        worker.submit(first);
        worker.submit(job(Some("dp-2"), 2));
        worker.submit(job(Some("dp-2"), 3));
        worker.submit(job(Some("dp-2"), 4));
        assert!(worker.is_busy());
        assert_eq!(worker.pending(), 1);

        release.send(()).unwrap();
        wait_idle(&worker);
        assert_eq!(worker.poll(), vec![1, 4]);
        assert!(worker.poll().is_empty());
    }

    #[test]
    fn unkeyed_jobs_keep_order() {
        let worker = BackgroundWorker::new("test");
        let (first, release) = gated(0);
        worker.submit(first);
        for value in 1..=5 {
            worker.submit(job(None, value));
        }
        assert_eq!(worker.pending(), 5);

        release.send(()).unwrap();
        wait_idle(&worker);
        assert_eq!(worker.poll(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn different_keys_are_not_merged() {
        let worker = BackgroundWorker::new("test");
        let (first, release) = gated(0);
        worker.submit(first);
        worker.submit(job(Some("eDP-1"), 1));
        worker.submit(job(Some("DP-1"), 2));
        worker.submit(job(Some("eDP-1"), 3));

        release.send(()).unwrap();
        wait_idle(&worker);
        assert_eq!(worker.poll(), vec![0, 3, 2]);
    }

    #[test]
    fn results_after_drop_are_discarded() {
        let (done_tx, done_rx) = mpsc::channel();

        struct Notify(mpsc::Receiver<()>, mpsc::Sender<()>);
        impl Job for Notify {
            type Output = ();
            fn run(self) {
                let _ = self.0.recv();
                let _ = self.1.send(());
            }
        }

        let (release, gate) = mpsc::channel();
        let worker = BackgroundWorker::new("test");
        worker.submit(Notify(gate, done_tx));
        let queue = worker.queue.clone();
        drop(worker);

        release.send(()).unwrap();
        // the job itself still runs to completion
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let start = Instant::now();
        while queue.lock().busy {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(1));
        }
        assert!(queue.lock().done.is_empty());
    }
}
