pub mod chat;
pub mod geolocation;
pub mod location;
pub mod optimistic;
pub mod poll_loop;
pub mod poller;
pub mod registry;
pub mod tracker;
