//! Concrete cloud providers

mod digitalocean;

pub use digitalocean::DigitalOceanProvider;
