pub mod feed;
pub mod kline_stream;
pub mod snapshot_buffer;

#[cfg(test)]
pub(crate) mod scripted;

pub use feed::{CandleFeed, CandleStream, Channel, Subscription};
pub use kline_stream::BinanceKlineFeed;
pub use snapshot_buffer::SnapshotBuffer;
