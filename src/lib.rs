#![doc = include_str!("../README.md")]

pub mod docstore;
pub mod logger;
