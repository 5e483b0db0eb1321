pub mod dispatch;
pub mod feed;
pub mod location;
pub mod session;
pub mod verify;
