#[path = "../support/mod.rs"]
mod support;

mod distributed;
mod runner;
