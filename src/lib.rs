pub mod archive;
pub mod config;
pub mod db;
pub mod fetch;
pub mod localize;
pub mod logbook;
pub mod outcome;
pub mod parser;
pub mod snapshots;
pub mod stops;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
