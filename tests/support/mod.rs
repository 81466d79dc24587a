pub mod helpers;
pub mod service;
