#[macro_use]
extern crate rocket;

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod resolver;
pub mod scrapers;

use rocket::{figment::Figment, Build, Rocket};

use resolver::Resolver;

/// Assembles the HTTP front door around an already constructed resolver.
pub fn build(figment: Figment, resolver: Resolver) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(resolver)
        .mount("/", routes![api::search::index, api::search::search_image])
}
