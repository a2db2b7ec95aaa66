pub mod buffer;
pub mod completion;
pub mod scan_receiver;

pub use buffer::SeriesBuffer;
pub use completion::CompletionTable;
pub use scan_receiver::{ReceiverSettings, ScanReceiver};
