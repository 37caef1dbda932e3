//! Request/response plumbing shared by every firmware dialect
//!
//! - [`checksum`]: line-check framing
//! - [`queue`]: per-connection task serializer
//! - [`matcher`]: response recognition and retry policy
//! - [`correlator`]: routes inbound messages to the waiting request

pub mod checksum;
pub mod correlator;
pub mod matcher;
pub mod queue;

pub use checksum::{frame_line, line_checksum};
pub use correlator::{ProgressListener, ResponseCorrelator, DEFAULT_TIMEOUT_MS};
pub use matcher::{
    AnyReply, ExchangeOptions, OkReply, RawBuffer, RawOk, ResponseMatcher, RetryPolicy, Verdict,
};
pub use queue::{CommandQueue, MAX_TASK_QUEUE};
