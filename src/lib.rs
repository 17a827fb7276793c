pub mod core;
pub mod io;
pub mod api_server;
