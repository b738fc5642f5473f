//! Translation between gRPC statuses and [`BucketError`].
//!
//! Every client operation goes through [`error_from_status`] and every server
//! handler through [`status_from_error`], so both directions apply one set of
//! rules.

use std::error::Error;

use lobby_bucket::BucketError;
use tonic::{Code, Status};

/// Classify the status returned by a remote call.
///
/// - Connection and deadline failures, and any status produced by the local
///   transport stack (these carry an error source; statuses decoded from the
///   server never do), become `Transport`.
/// - `NOT_FOUND` becomes `KeyNotFound`.
/// - Everything else is surfaced as `Remote` with the server's message.
pub fn error_from_status(status: Status) -> BucketError {
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
            BucketError::Transport(describe(&status))
        }
        _ if status.source().is_some() => BucketError::Transport(describe(&status)),
        Code::NotFound => BucketError::KeyNotFound(status.message().to_string()),
        code => BucketError::Remote {
            code: format!("{:?}", code),
            message: status.message().to_string(),
        },
    }
}

fn describe(status: &Status) -> String {
    match status.source() {
        Some(source) => format!("{}: {}", status.message(), source),
        None => status.message().to_string(),
    }
}

/// Status a server sends for a failed backend call.
///
/// Only a missing key maps to `NOT_FOUND`: clients read that code as
/// `KeyNotFound`, so missing buckets and backends use `FAILED_PRECONDITION`.
pub fn status_from_error(err: BucketError) -> Status {
    match err {
        BucketError::KeyNotFound(key) => Status::not_found(key),
        e @ (BucketError::BucketNotFound(_) | BucketError::BackendNotFound(_)) => {
            Status::failed_precondition(e.to_string())
        }
        e @ BucketError::BucketAlreadyExists(_) => Status::already_exists(e.to_string()),
        e @ BucketError::InvalidArgument(_) => Status::invalid_argument(e.to_string()),
        e @ (BucketError::Closed(_) | BucketError::Transport(_)) => {
            Status::unavailable(e.to_string())
        }
        e @ (BucketError::Remote { .. } | BucketError::Storage(_)) => {
            Status::internal(e.to_string())
        }
    }
}
