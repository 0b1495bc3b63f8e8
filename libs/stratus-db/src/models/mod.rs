pub mod payment;
pub mod plan;
pub mod promo;
pub mod store;
pub mod vps;
