use super::executor::{JobExecutor, QueuedJob};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<QueuedJob>>>;

/// Fixed set of named workers pulling from one in-process queue.
#[derive(Debug)]
pub struct WorkerPool {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` workers named `background-worker-{n}`.
    pub fn start(
        executor: JobExecutor,
        receiver: mpsc::UnboundedReceiver<QueuedJob>,
        workers: usize,
    ) -> Self {
        let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));
        let (stop, stop_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(workers);

        for i in 1..=workers.max(1) {
            let name = format!("background-worker-{i}");
            info!(worker.name = %name, "Starting worker…");

            let worker = Worker {
                executor: executor.clone(),
                receiver: receiver.clone(),
                stop: stop_rx.clone(),
            };
            let span = info_span!("worker", worker.name = %name);
            handles.push(tokio::spawn(async move { worker.run().instrument(span).await }));
        }

        Self { stop, handles }
    }

    /// Stop accepting jobs, let the workers drain what is already queued,
    /// and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        join_all(self.handles).await.into_iter().for_each(|result| {
            if let Err(error) = result {
                warn!(%error, "Background worker task panicked");
            }
        });
        info!("All background workers stopped");
    }
}

struct Worker {
    executor: JobExecutor,
    receiver: SharedReceiver,
    stop: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let Some(job) = self.next().await else {
                debug!("queue closed, worker exiting");
                return;
            };
            let job_id = job.job_id;
            self.executor
                .execute(job)
                .instrument(info_span!("job", %job_id))
                .await;
        }
    }

    /// Next queued job, or `None` once the queue is closed and empty.
    ///
    /// Only the worker holding the lock waits on the channel, so it is also
    /// the one that observes the stop signal and closes the queue. The
    /// others then find a closed channel as soon as they get the lock.
    async fn next(&mut self) -> Option<QueuedJob> {
        let mut rx = self.receiver.lock().await;
        tokio::select! {
            biased;
            job = rx.recv() => job,
            _ = self.stop.changed() => {
                rx.close();
                rx.recv().await
            }
        }
    }
}
