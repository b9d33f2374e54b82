// src/handlers/mod.rs

pub mod auth;
pub mod booking;
pub mod friends;
pub mod profile;
pub mod wishes;
