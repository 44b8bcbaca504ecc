//! `huginn` runs the detection geometry on network outputs dumped to JSON.

pub mod cli;
pub mod dump;
