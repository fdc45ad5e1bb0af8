//! Internal plumbing shared by the public entry points.

pub mod control;
pub mod line_codec;
pub mod message_parser;
pub mod query;
pub mod sanitize;
