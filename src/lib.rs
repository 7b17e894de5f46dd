pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod cipher;
}

pub mod rcon {
    pub mod client;
    pub mod error;
    pub mod packet;
    pub mod retry;
    pub mod transport;
}

pub mod models {
    pub mod command;
    pub mod server;
    pub mod session;
}

pub mod repositories {
    pub mod gateway;
    pub mod memory;
    pub mod postgres;
}

pub mod services {
    pub mod session;
    pub mod session_cache;
}

pub mod handlers {
    pub mod sessions;
}

pub mod middleware_layer {
    pub mod auth;
}

pub mod validation {
    pub mod rcon;
}
