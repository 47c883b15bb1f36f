pub mod coap;
pub mod observe_handler;
pub mod persistence;
pub mod sensor_service;
pub mod watchdog_service;
