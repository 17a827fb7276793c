pub mod action;
pub mod backoff;
pub mod fingerprint;
pub mod gate;
pub mod r#loop;
pub mod oracle;
pub mod session;
pub mod snapshot;
pub mod state;
