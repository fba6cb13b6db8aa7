pub mod circular;
pub mod expansion;
pub mod models;

pub use circular::CircularBuffer;
pub use expansion::BufferConsumer;
pub use models::{BufferedTagValue, Quality, WriteBatch, WriterMetrics};
