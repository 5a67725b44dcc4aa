pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod guard;
pub mod history;
pub mod parser;
pub mod record;
pub mod scheduler;
pub mod snapshot;
pub mod velocity;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
