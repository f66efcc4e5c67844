//! Provider transports.
//!
//! The [`backend::ObjectApi`] trait abstracts over how requests reach
//! the object store.  [`http::HttpObjectApi`] speaks path-style S3 over
//! HTTP; [`memory::MemoryObjectApi`] keeps everything in process.
//! [`connection`] turns a remote's configuration into a ready transport.

pub mod backend;
pub mod connection;
pub mod http;
pub mod memory;
