//! Live-stream chat relay.
//!
//! The server keeps one upstream danmaku connection per active room and fans
//! received chat messages out to any number of local WebSocket subscribers.
//! Rooms are created on the first subscription and torn down when the last
//! subscriber leaves or the upstream session fails.

pub mod api;
pub mod logging;
pub mod room;
