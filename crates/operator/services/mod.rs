pub mod run_service;
pub mod webhook_service;
