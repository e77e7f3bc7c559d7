pub mod fcm;
pub mod push;
pub mod rabbitmq;
