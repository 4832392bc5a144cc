pub mod admin;
pub mod auth;
pub mod health;
pub mod history;
pub mod predictions;
pub mod uploads;
