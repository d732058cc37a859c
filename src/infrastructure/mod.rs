pub mod db;
pub mod event_bus;
pub mod logging;
