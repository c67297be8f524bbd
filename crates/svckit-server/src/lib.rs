#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{
    Registration, RpcRoutes, Service, ServiceError, ServiceHandle, Settings, StandardAddrs, State,
    StreamShape, start,
};
