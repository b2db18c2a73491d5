//! Generated protobuf message types for the Mumble control channel.
//!
//! `mumble.rs` is produced at build time by `build.rs` (via
//! `protobuf-codegen-pure`) from `proto/Mumble.proto` and is not checked in.
pub mod mumble;
