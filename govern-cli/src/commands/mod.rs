pub mod apply;
pub mod config;
pub mod destroy;
pub mod import;
pub mod plan;
pub mod refresh;
pub mod report;
pub mod status;
