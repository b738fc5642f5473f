//! Remote buckets over gRPC.
//!
//! [`RpcBackend`] is a [`lobby_bucket::Backend`] whose buckets live in another
//! process; [`BucketServer`] is the other end, serving any backend as
//! `lobby.BucketService`. Failures of the channel surface as
//! `BucketError::Transport`, failures reported by the server as
//! `BucketError::Remote` (or `KeyNotFound` for a missing key).

pub mod client;
pub mod proto;
pub mod server;
pub mod status;

pub use client::{RpcBackend, RpcBucket, RpcOptions};
pub use server::{bind_unix, socket_path, BucketServer, ServeError};
pub use status::{error_from_status, status_from_error};
