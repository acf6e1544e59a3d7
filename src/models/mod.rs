pub mod chat;
pub mod cook;
pub mod de;
pub mod location;
pub mod order;
pub mod tracking;
