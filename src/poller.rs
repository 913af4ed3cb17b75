//! Background threads that periodically refresh experiments and flush metrics.
use std::{
    sync::mpsc::{RecvTimeoutError, SyncSender},
    thread::JoinHandle,
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{Error, Result};

/// Pacing of a [`PollerThread`].
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Interval to wait between task runs.
    pub interval: Duration,
    /// Randomized duration subtracted from `interval`. Keeps multiple server instances from
    /// synchronizing and producing spiky load.
    pub jitter: Duration,
}

/// A named background thread that runs a task every [`PollerThreadConfig::interval`].
///
/// The first run happens after one interval. Use [`Client::start_refresh_thread`] and
/// [`Client::start_flush_thread`] to get an instance.
///
/// [`Client::start_refresh_thread`]: crate::Client::start_refresh_thread
/// [`Client::start_flush_thread`]: crate::Client::start_flush_thread
pub struct PollerThread {
    join_handle: JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: SyncSender<()>,
}

impl PollerThread {
    /// # Errors
    ///
    /// - IO Error if the thread failed to start.
    pub(crate) fn start(
        name: &str,
        config: PollerThreadConfig,
        mut task: impl FnMut() + Send + 'static,
    ) -> Result<PollerThread> {
        // Using `sync_channel` here as it makes `stop_sender` `Sync`. Buffer size of 1 is enough:
        // if the buffer is full, another stop command is already pending.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let thread_name = name.to_owned();
        let join_handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || loop {
                let timeout = jitter(config.interval, config.jitter);
                match stop_receiver.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {
                        log::debug!(target: "simpleab",
                            thread = thread_name.as_str();
                            "running periodic task");
                        task();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        log::debug!(target: "simpleab",
                            thread = thread_name.as_str();
                            "poller thread received stop command");
                        return;
                    }
                }
            })?;

        Ok(PollerThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or that another stop command
        // is already queued. Either way the thread is stopping.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// A task run in progress is completed first.
    ///
    /// # Errors
    ///
    /// - [`Error::PollerThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::{PollerThread, PollerThreadConfig};
    use crate::Error;

    fn config(interval: Duration) -> PollerThreadConfig {
        PollerThreadConfig {
            interval,
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn runs_task_periodically() {
        let runs = Arc::new(AtomicUsize::new(0));
        let thread = {
            let runs = runs.clone();
            PollerThread::start("test-poller", config(Duration::from_millis(5)), move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };

        while runs.load(Ordering::SeqCst) < 3 {
            std::thread::sleep(Duration::from_millis(5));
        }
        thread.shutdown().unwrap();
    }

    #[test]
    fn shutdown_interrupts_the_wait() {
        let runs = Arc::new(AtomicUsize::new(0));
        let thread = {
            let runs = runs.clone();
            PollerThread::start("test-poller", config(Duration::from_secs(3600)), move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };

        thread.shutdown().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reports_panicked_thread() {
        let thread = PollerThread::start("test-poller", config(Duration::ZERO), || {
            panic!("task failed");
        })
        .unwrap();

        // Give the task a chance to run before asking the thread to stop.
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(thread.shutdown(), Err(Error::PollerThreadPanicked)));
    }

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(30);
        let result = super::jitter(interval, Duration::from_secs(30));
        assert!(result <= interval, "{result:?} must be <= {interval:?}");
    }

    #[test]
    fn jitter_truncates_to_zero() {
        assert_eq!(
            super::jitter(Duration::ZERO, Duration::from_secs(30)),
            Duration::ZERO
        );
    }

    #[test]
    fn jitter_works_with_zero_jitter() {
        let interval = Duration::from_secs(30);
        assert_eq!(super::jitter(interval, Duration::ZERO), interval);
    }
}
