//! Job definitions registered with the scheduler.

pub mod drain;
