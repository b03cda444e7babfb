#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod annotations;
pub mod cli;
pub mod config;
pub mod domain_xml;
pub mod error;
pub mod hook;
pub mod logging;
pub mod paths;
pub mod rules;
pub mod server;
