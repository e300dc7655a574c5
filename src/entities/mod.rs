pub mod inventory_batch;
pub mod inventory_level;
pub mod inventory_movement;
pub mod inventory_reservation;
