pub mod vps_service;
