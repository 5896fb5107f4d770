pub mod backend;
pub mod config;
pub mod database;
pub mod models;
pub mod services;
pub mod session;
pub mod web;
