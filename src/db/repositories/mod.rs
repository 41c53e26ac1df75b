mod focus;
mod metrics;
mod shame;
