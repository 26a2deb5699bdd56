//! Append-mostly ordered streams (comments, history).

mod ordered;

pub use ordered::{CommentStream, HistoryStream, OrderedStream, StreamDiff, StreamEntry};
