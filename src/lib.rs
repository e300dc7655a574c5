//! Stockledger API Library
//!
//! Multi-tenant inventory ledger & valuation engine: perpetual inventory
//! levels, an append-only movement ledger, batch/lot tracking with
//! FIFO/LIFO/FEFO consumption orderings, multi-method cost valuation, and
//! expected-vs-actual reconciliation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: services::AppServices,
}

impl AppState {
    /// Wires every service over one pool and event channel. The returned
    /// receiver is handed to [`events::process_events`] or the embedding
    /// application's own dispatcher.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
    ) -> (Self, tokio::sync::mpsc::Receiver<events::Event>) {
        let (event_sender, receiver) = events::EventSender::channel(1024);
        let services = services::AppServices::build(db.clone(), event_sender.clone());

        (
            Self {
                db,
                config,
                event_sender,
                services,
            },
            receiver,
        )
    }
}

pub mod prelude {
    pub use crate::cache::{CacheBackend, CacheEntity, CacheKey, InMemoryCache};
    pub use crate::db::{connect, establish_connection, DbPool};
    pub use crate::errors::ServiceError;
    pub use crate::events::{Event, EventSender};
    pub use crate::services::batch_tracker::{BatchTrackerService, ConsumptionOrder, NewBatch};
    pub use crate::services::movement_ledger::{
        MovementFilter, MovementLedgerService, NewMovement,
    };
    pub use crate::services::perpetual_inventory::{
        ExpectedCount, NewLevel, PerpetualInventoryService, PerpetualUpdate, TransferRequest,
    };
    pub use crate::services::reservations::{InventoryReservationService, ReserveRequest};
    pub use crate::services::valuation::{Valuation, ValuationService};
    pub use crate::services::{AppServices, LevelKey};
}
