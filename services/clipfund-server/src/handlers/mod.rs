//! Request handlers

pub mod admin;
pub mod cron;
pub mod health;
pub mod webhook;
