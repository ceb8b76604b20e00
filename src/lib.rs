pub mod app;
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod list;
pub mod record;
pub mod session;
pub mod upload;

#[cfg(test)]
mod tests;
