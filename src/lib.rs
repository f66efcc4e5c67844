//! s3remote library: an S3-compatible object store as a remote filesystem.
//!
//! This crate provides the pieces a sync engine needs to treat a bucket
//! like a directory tree: remote path resolution, request signing, a
//! provider transport with bounded retry, lazy cancellable listings,
//! modification times kept in object metadata, chunked uploads, and an
//! explicit registry of backend factories.

pub mod auth;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod registry;
pub mod remote;
pub mod rest;
pub mod s3;
pub mod storage;
pub mod xml;
