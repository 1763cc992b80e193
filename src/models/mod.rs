pub mod booking;
pub mod caller;
pub mod event;
pub mod money;
pub mod payment;
pub mod ticket;
