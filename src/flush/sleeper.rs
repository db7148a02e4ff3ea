/*!
 * Sleep Abstraction
 * Injectable delay so retry backoff can be exercised without real time passing
 */

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Waits between retry attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

/// Real sleeping on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Returns immediately and remembers every requested delay
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested delays, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        self.delays.lock().push(duration);
        Box::pin(std::future::ready(()))
    }
}
