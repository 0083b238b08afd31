pub mod credit;
pub mod notification;
