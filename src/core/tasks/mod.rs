// src/core/tasks/mod.rs

//! Background tasks that run on a client's I/O runtime.

pub mod timeout_watchdog;
