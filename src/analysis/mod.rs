pub mod monitor;

pub use monitor::{SpectrumFeed, SpectrumMonitor};
