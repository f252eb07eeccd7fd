pub mod base;
pub mod mshr;
pub mod sim;
pub mod timeq;
pub mod traffic;
pub mod ui;
