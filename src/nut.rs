// Licensed under the Open Software License version 3.0
pub mod client;
pub mod config;
pub mod connection;
pub mod listen;
pub mod protocol;
