//! Backtesting platform core.
//!
//! Three tightly coupled subsystems — [`event_bus`] (C2), [`replay_controller`]
//! (C5), and [`snapshot_manager`] (C4) — plus the data model they share
//! ([`event`], [`snapshot`]) and the thin session/command boundary that
//! fronts them ([`command`], [`session`]). The matching engine, strategy
//! runtime, metrics, and optimizer stay opaque collaborators behind the
//! trait boundaries in [`command::OrderSink`] and
//! [`strategy_loader::StrategyRegistry`].

pub mod command;
pub mod config;
pub mod data_provider;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod replay_controller;
pub mod session;
pub mod snapshot;
pub mod snapshot_manager;
pub mod strategy_loader;
