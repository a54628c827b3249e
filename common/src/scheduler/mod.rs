// Scheduler module for due-job detection and dispatch

pub mod engine;

pub use engine::{Scheduler, SchedulerEngine};
