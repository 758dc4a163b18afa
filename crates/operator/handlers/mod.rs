pub mod health;
pub mod metrics;
pub mod run;
pub mod webhook;
