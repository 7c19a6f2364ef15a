//! QR-code attendance check-in service.
//!
//! Teachers issue short-lived signed tokens rendered as QR codes, students
//! scan them to check in, and dashboards follow attendance live over a
//! WebSocket.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod token_codec;
}

pub mod models {
    pub mod attendance;
    pub mod session;
    pub mod token;
    pub mod user;
}

pub mod repositories {
    pub mod attendance;
    pub mod memory;
}

pub mod services {
    pub mod access;
    pub mod admission;
    pub mod credentials;
    pub mod rate_limiter;
    pub mod tokens;
}

pub mod realtime {
    pub mod gateway;
    pub mod hub;
    pub mod messages;
}

pub mod handlers {
    pub mod attendance;
    pub mod health;
    pub mod qr;
    pub mod realtime;
    pub mod reply;
}

pub mod middleware_layer {
    pub mod auth;
}

pub mod validation {
    pub mod attendance;
}
