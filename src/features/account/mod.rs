pub mod credential;
pub mod handler;
pub mod models;
pub mod quota;
pub mod reset;
pub mod storage;
