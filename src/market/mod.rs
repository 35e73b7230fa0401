pub mod candle;

pub use candle::derive;
