pub mod poll_sync;

pub use poll_sync::PollSyncWorker;
