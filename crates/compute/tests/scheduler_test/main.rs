/// Integration tests for the event scheduler covering slot turnover, views,
/// occupancy sampling, shared resources and asynchronous algorithms.

mod helpers;
mod occupancy;
mod resources;
mod suspension;
mod views;
