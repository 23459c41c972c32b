pub mod config;
pub mod db;
pub mod importers;
pub mod services;
pub mod utils;
