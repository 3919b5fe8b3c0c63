use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// A group flushes as soon as it holds this many operations.
    pub batch_size: NonZeroUsize,
    /// A group flushes this long after its oldest operation at the latest.
    pub max_wait: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl From<&crate::config::BatcherSettings> for BatcherConfig {
    fn from(settings: &crate::config::BatcherSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            max_wait: settings.max_wait,
        }
    }
}
