//! Sessions and their push streams.
//!
//! A session is created when a client opens the stream endpoint and lives
//! until that stream ends. It owns exactly one [`StreamChannel`] and the table
//! of calls accepted for it that have not resolved yet.

mod manager;
mod stream;

pub use manager::{Delivery, Session, SessionId, SessionManager};
pub use stream::{stream_channel, StreamChannel, StreamEvent, StreamReceiver};
