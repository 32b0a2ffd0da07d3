pub mod danmaku;
pub mod live;
