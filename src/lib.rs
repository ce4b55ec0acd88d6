//! # Equilibrium Arb
//!
//! Scanner and autonomous trader for YES/NO equilibrium deviations on Polymarket.
//!
//! ## Architecture
//!
//! - `config`: Process configuration and the persisted trading settings
//! - `exchange`: Venue gateway trait, Polymarket REST client, paper and mock venues
//! - `strategy`: Scoring, caching, scanning and the entry policy
//! - `risk`: Exit evaluation (GLOBAL / INDEPENDENT) and position closing
//! - `controller`: The start/stop/pause/resume/panic control loop
//! - `persistence`: SQLite ledger of positions, trades and opportunities
//! - `events`: Lifecycle events and opportunity alerts
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod controller;
pub mod events;
pub mod exchange;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
