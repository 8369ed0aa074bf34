//! CourseHub library
//!
//! Local-first record store behind the CourseHub e-learning front-end:
//! accounts and the signed-in session, published courses with embedded
//! attachments, enrollments, comments, ratings and teacher notifications.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod services;
pub mod storage;

pub use app::{init_logging, AppState};
pub use error::{AppError, Result};
