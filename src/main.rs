#[macro_use]
extern crate rocket;

mod article;
mod comment;
mod config;
mod db;
mod profile;
mod tag;
mod types;
mod users;
mod utils;

use rocket::response::content::RawJson;

use crate::config::Config;

#[catch(400)]
fn bad_request() -> RawJson<String> {
    let json = serde_json::json!({
        "errors": ["bad request"]
    });
    RawJson(json.to_string())
}

#[catch(401)]
fn unauthorized() -> RawJson<String> {
    let json = serde_json::json!({
        "errors": { "status": "401 Unauthorized" }
    });
    RawJson(json.to_string())
}

#[catch(404)]
fn not_found() -> RawJson<String> {
    let json = serde_json::json!({
        "errors": ["entity not found"]
    });
    RawJson(json.to_string())
}

#[catch(422)]
fn unprocessable() -> RawJson<String> {
    let json = serde_json::json!({
        "errors": ["malformed request body"]
    });
    RawJson(json.to_string())
}

#[catch(500)]
fn internal_error() -> RawJson<String> {
    let json = serde_json::json!({
        "errors": ["internal error"]
    });
    RawJson(json.to_string())
}

#[launch]
fn rocket() -> _ {
    let config = Config::load().expect("DATABASE_URL must be set");
    let pool = db::init_pool(&config.database_url).expect("Failed to create database pool");
    rocket::build()
        .manage(pool)
        .manage(config)
        .mount("/api/users", routes![users::register, users::login])
        .mount("/api", routes![users::current, users::update])
        .mount(
            "/api",
            routes![profile::profile, profile::follow, profile::unfollow],
        )
        .mount(
            "/api/articles",
            routes![
                article::list,
                article::feed,
                article::create,
                article::get,
                article::update,
                article::delete,
                article::favorite,
                article::unfavorite,
                comment::add,
                comment::get,
                comment::delete,
            ],
        )
        .mount("/api/tags", routes![tag::list])
        .register(
            "/",
            catchers![
                bad_request,
                unauthorized,
                not_found,
                unprocessable,
                internal_error
            ],
        )
}
