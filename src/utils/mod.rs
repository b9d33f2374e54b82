// src/utils/mod.rs

pub mod crypto;
pub mod hash;
pub mod html;
pub mod jwt;
