pub mod command_errors;
pub mod confirm;
pub mod event_manager;
pub mod locks;
