//! Points ledger, level derivation and leaderboards for the EduHub platform.
//!
//! [`engine::PointsEngine`] is the entry point: it awards points (append a ledger row and update
//! the user's running total in one transaction) and ranks users overall, for the current month,
//! or within a department. Storage sits behind [`db::repositories::PointStore`], with a Postgres
//! implementation for deployments and an in-memory one for development and tests.

pub mod api;
pub mod constants;
pub mod db;
pub mod engine;
pub mod util;
