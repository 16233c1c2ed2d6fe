pub mod action;
pub mod aggregate;
pub mod config;
pub mod event;
pub mod format;
pub mod logging;
pub mod rank;
pub mod report;
pub mod system;
pub mod view_model;
