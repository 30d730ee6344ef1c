pub mod events;
pub mod gallery;
pub mod models;
pub mod payload;
pub mod receipts;
pub mod storage;
pub mod wire;
