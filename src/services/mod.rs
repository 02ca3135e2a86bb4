pub mod gateway;
pub mod http;
pub mod segmenter;
pub mod storage;
