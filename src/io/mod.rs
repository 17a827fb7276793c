pub mod actuation;
pub mod capture;
pub mod history;
pub mod status;
