pub mod dispatch;
pub mod notification_service;
pub mod store;
