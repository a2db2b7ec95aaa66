pub mod server;
pub mod store;

pub use server::{ResultsServer, ResultsSettings};
pub use store::{ResultsStore, FOUND_RESULTS_KEY};
