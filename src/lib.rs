pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod room;
pub mod routes;
pub mod session;
pub mod store;
pub mod utils {
    pub mod jwt;
}
