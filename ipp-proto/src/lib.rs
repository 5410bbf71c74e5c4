//! Binary codec for the Internet Printing Protocol (RFC 8010 framing,
//! RFC 8011 / RFC 2911 semantics).
//!
//! This crate only knows about bytes: it parses an IPP message into a
//! header plus ordered attribute groups and builds responses back out.
//! HTTP transport, chunked reads and operation dispatch live in the
//! daemon that consumes it.

pub mod builder;
pub mod model;
pub mod parser;

pub use builder::ResponseBuilder;
pub use parser::{Attribute, AttributeGroup, ParseError, Request};
