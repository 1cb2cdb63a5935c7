pub mod projection_scheduler;
