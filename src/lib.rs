pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod countdown;
pub mod location;
pub mod models;
pub mod settings;
pub mod sync;
pub mod ui;
pub mod view;
