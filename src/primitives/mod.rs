//! Low-level building blocks shared by every subsystem: admission control
//! (token bucket, semaphore), bounded history (circular buffer, rolling
//! window), and instrumentation (counters/gauges/histograms/timers).

pub mod circular_buffer;
pub mod metrics;
pub mod rolling_window;
pub mod semaphore;
pub mod token_bucket;

pub use circular_buffer::CircularBuffer;
pub use metrics::{Counter, Gauge, Histogram, HistogramSnapshot, MetricsRegistry, Timer};
pub use rolling_window::RollingWindow;
pub use semaphore::CountingSemaphore;
pub use token_bucket::TokenBucket;
