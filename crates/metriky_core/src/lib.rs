pub mod analytics;
pub mod config;
pub mod error;
pub mod locate;
pub mod metrics;
pub mod morphology;
pub mod pipeline;
pub mod report;
pub mod wiki;
pub mod window;
