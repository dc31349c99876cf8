pub mod flight;
pub mod notification;
pub mod stand;
pub mod tow;
