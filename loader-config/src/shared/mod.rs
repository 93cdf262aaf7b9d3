mod base;
mod connection;
mod destination;
mod kind;
mod schema;
mod settings;
mod staging;

pub use base::*;
pub use connection::*;
pub use destination::*;
pub use kind::*;
pub use schema::*;
pub use settings::*;
pub use staging::*;
