//! Last-mile webhook delivery.
//!
//! A [`Forwarder`] turns one relayed webhook [`Event`] into an HTTP request to
//! `meta.output_destination` and always answers with an [`EventStatus`];
//! failures are described in the status rather than returned as errors.
//!
//! [`Event`]: relay_protocol_types::Event
//! [`EventStatus`]: relay_protocol_types::EventStatus

mod forwarder;

pub use forwarder::{DefaultForwarder, Forwarder, ForwarderConfig};
