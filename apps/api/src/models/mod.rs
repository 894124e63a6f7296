pub mod case;
pub mod checkin;
pub mod contact;
pub mod event;
pub mod notification;
pub mod wellness;
pub mod zone;
