pub mod broadcast;
pub mod gateway;
pub mod ingest;
pub mod merge;
pub mod send;
