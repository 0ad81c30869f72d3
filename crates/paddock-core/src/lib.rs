pub mod accuracy;
pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod ingest;
pub mod model;
pub mod pipelines;
pub mod predict;
pub mod providers;
pub mod ratings;
pub mod report;
pub mod retention;
pub mod retry;
pub mod season;
pub mod storage;
pub mod validate;
