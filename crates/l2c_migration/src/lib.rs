pub mod api;
pub mod bridge;
pub mod cluster;
pub mod controllers;
pub mod quality;
pub mod resources;
pub mod util;

#[cfg(test)]
pub mod tests;
