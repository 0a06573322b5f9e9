//! Background thread for persistent-tier storage jobs.
//!
//! Jobs run one at a time in submission order, so a write and a later delete
//! queued for the same file never overtake each other.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Sender, SyncSender};
use std::thread::{self, JoinHandle};

use tracing::warn;

use super::entry::EntryMeta;
use super::error::TierError;
use super::tier::{JobKind, TierJob};

/// Called after a write job failed. Returns follow-up jobs to run.
pub(crate) type WriteFailed = Box<dyn Fn(&str, EntryMeta) -> Vec<TierJob> + Send>;

enum Message {
    Run(Vec<TierJob>),
    Flush(SyncSender<()>),
}

pub(crate) struct TierWorker {
    sender: Option<Sender<Message>>,
    handle: Option<JoinHandle<()>>,
}

impl TierWorker {
    pub(crate) fn spawn(on_write_failed: WriteFailed) -> Result<Self, TierError> {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("gazette-tier-io".to_string())
            .spawn(move || {
                for message in receiver {
                    match message {
                        Message::Run(jobs) => run_jobs(jobs, &on_write_failed),
                        Message::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub(crate) fn submit(&self, jobs: Vec<TierJob>) {
        if jobs.is_empty() {
            return;
        }
        let count = jobs.len();
        let sent = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(Message::Run(jobs)).is_ok());
        if !sent {
            warn!(jobs = count, "Tier worker stopped; storage jobs dropped");
        }
    }

    /// Block until every job submitted so far has run.
    pub(crate) fn flush(&self) {
        let (done, finished) = mpsc::sync_channel(1);
        let sent = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(Message::Flush(done)).is_ok());
        if sent {
            let _ = finished.recv();
        }
    }
}

impl Drop for TierWorker {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain its queue and exit.
        self.sender.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Tier worker panicked");
        }
    }
}

fn run_jobs(jobs: Vec<TierJob>, on_write_failed: &WriteFailed) {
    let mut queue = VecDeque::from(jobs);
    while let Some(TierJob { kind, run }) = queue.pop_front() {
        let Err(err) = run() else {
            continue;
        };
        match kind {
            JobKind::Write { key, meta } => {
                warn!(
                    key = %key,
                    error = %err,
                    "Dropping demoted entry after persistent tier write failure"
                );
                queue.extend(on_write_failed(&key, meta));
            }
            JobKind::Delete { path } => {
                warn!(path = %path.display(), error = %err, "Failed to remove cache file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use time::OffsetDateTime;

    use super::*;

    fn meta() -> EntryMeta {
        let now = OffsetDateTime::now_utc();
        EntryMeta {
            created_at: now,
            expires_at: now + Duration::from_secs(60),
            size_bytes: 1,
            access_count: 0,
        }
    }

    fn no_follow_up() -> WriteFailed {
        Box::new(|_: &str, _: EntryMeta| Vec::new())
    }

    #[test]
    fn runs_jobs_in_submission_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = TierWorker::spawn(no_follow_up()).expect("spawn");

        for step in 0..5 {
            let seen = Arc::clone(&seen);
            let job = TierJob::new(
                JobKind::Delete {
                    path: PathBuf::from(format!("{step}.entry")),
                },
                move || {
                    seen.lock().expect("seen").push(step);
                    Ok(())
                },
            );
            worker.submit(vec![job]);
        }
        worker.flush();

        assert_eq!(*seen.lock().expect("seen"), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn failed_write_runs_follow_up_jobs() {
        let followed_up = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let worker = {
            let followed_up = Arc::clone(&followed_up);
            let failures = Arc::clone(&failures);
            TierWorker::spawn(Box::new(move |key: &str, _: EntryMeta| {
                failures.lock().expect("failures").push(key.to_string());
                let followed_up = Arc::clone(&followed_up);
                vec![TierJob::new(
                    JobKind::Delete {
                        path: PathBuf::from("a.entry"),
                    },
                    move || {
                        followed_up.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                )]
            }))
            .expect("spawn")
        };

        let write = TierJob::new(
            JobKind::Write {
                key: "a".to_string(),
                meta: meta(),
            },
            || Err(TierError::Io(std::io::Error::other("disk full"))),
        );
        worker.submit(vec![write]);
        worker.flush();

        assert_eq!(*failures.lock().expect("failures"), vec!["a".to_string()]);
        assert_eq!(followed_up.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_drains_pending_jobs() {
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let worker = TierWorker::spawn(no_follow_up()).expect("spawn");
            for _ in 0..3 {
                let ran = Arc::clone(&ran);
                worker.submit(vec![TierJob::new(
                    JobKind::Delete {
                        path: PathBuf::from("x.entry"),
                    },
                    move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                )]);
            }
        }
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }
}
