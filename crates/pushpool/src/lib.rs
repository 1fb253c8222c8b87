#![doc = include_str!("../README.md")]

mod config;
mod connection;
mod error;
mod pool;

pub use crate::config::*;
pub use crate::connection::*;
pub use crate::error::*;
pub use crate::pool::*;
